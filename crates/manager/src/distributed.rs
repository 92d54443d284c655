use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use taskgrid_execution::{
    CallbackList, ExecutionContext, ExecutionStack, ScopeFrame, Task, TaskError, TaskGroup, TaskOutcome,
    WorkUnitCallback,
};
use tracing::{debug, info, warn};

use crate::channel::ManagerClient;
use crate::request::{DistributedRequest, ResourceEstimate, StatusReply};

/// Estimates the resources a task needs on its destination.
pub trait ResourceEstimator: Send + Sync {
    fn estimate(&self, task: &dyn Task) -> ResourceEstimate;
}

/// Same estimate for every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedResourceEstimator {
    estimate: ResourceEstimate,
}

impl FixedResourceEstimator {
    pub fn new(cpus: u32, memory_mb: u32, time_hours: u32) -> Self {
        Self {
            estimate: ResourceEstimate {
                cpus,
                memory_mb,
                time_hours,
            },
        }
    }
}

impl ResourceEstimator for FixedResourceEstimator {
    fn estimate(&self, _task: &dyn Task) -> ResourceEstimate {
        self.estimate
    }
}

/// A unit sent through the manager whose outcome has not been delivered.
struct SentUnit {
    request: DistributedRequest,
    frame: Option<ScopeFrame>,
    callback: WorkUnitCallback,
}

/// Runs tasks on remote nodes through a [`ManagerClient`].
///
/// Tasks must provide a payload. Destinations are used round-robin, status
/// is polled on an interval, and a request the manager no longer knows is
/// submitted again.
pub struct DistributedContext {
    stack: ExecutionStack,
    callbacks: CallbackList,
    client: Arc<dyn ManagerClient>,
    project_name: String,
    source_name: String,
    destinations: Vec<String>,
    next_destination: usize,
    estimator: Box<dyn ResourceEstimator>,
    sent: Vec<SentUnit>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl DistributedContext {
    pub fn new(
        client: Arc<dyn ManagerClient>,
        project_name: impl Into<String>,
        source_name: impl Into<String>,
        destinations: Vec<String>,
    ) -> Self {
        Self {
            stack: ExecutionStack::new(),
            callbacks: CallbackList::new(),
            client,
            project_name: project_name.into(),
            source_name: source_name.into(),
            destinations,
            next_destination: 0,
            estimator: Box::new(FixedResourceEstimator::default()),
            sent: Vec::new(),
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }

    pub fn with_estimator(mut self, estimator: impl ResourceEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Give up waiting after `timeout`; pending units then fail as crashed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Requests sent and not yet delivered.
    pub fn sent_requests(&self) -> Vec<DistributedRequest> {
        self.sent.iter().map(|u| u.request.clone()).collect()
    }

    fn pick_destination(&mut self) -> Option<String> {
        if self.destinations.is_empty() {
            return None;
        }
        let destination = self.destinations[self.next_destination % self.destinations.len()].clone();
        self.next_destination = (self.next_destination + 1) % self.destinations.len();
        Some(destination)
    }

    fn send(&mut self, task: &Arc<dyn Task>) -> Result<DistributedRequest, TaskError> {
        let payload = task
            .payload()
            .ok_or_else(|| TaskError::NotDistributable(task.name().to_string()))?;
        let destination = self
            .pick_destination()
            .ok_or_else(|| TaskError::NotSent("no destination configured".to_string()))?;

        let mut request = DistributedRequest::new(&self.project_name, &self.source_name, destination, payload)
            .with_resources(self.estimator.estimate(task.as_ref()));
        request.unique_id = self
            .client
            .submit(request.clone())
            .map_err(|e| TaskError::NotSent(e.to_string()))?;
        request.status = crate::request::RequestStatus::Waiting;

        info!(
            request_id = request.unique_id,
            task = task.name(),
            destination = %request.destination_name,
            "task sent"
        );
        Ok(request)
    }

    /// Outcome of `unit` if its request reached a terminal state.
    fn poll_unit(&self, unit: &mut SentUnit) -> Option<TaskOutcome> {
        match self.client.request_status(&unit.request) {
            Ok(StatusReply::Finished) | Ok(StatusReply::Crashed) => match self.client.fetch_result(&unit.request) {
                Ok(Some(outcome)) => Some(outcome),
                Ok(None) => Some(Err(TaskError::Crashed(format!(
                    "request {} settled without a result",
                    unit.request.unique_id
                )))),
                Err(e) => {
                    warn!(request_id = unit.request.unique_id, error = %e, "could not fetch result");
                    None
                }
            },
            Ok(StatusReply::UnknownRequest) => {
                warn!(request_id = unit.request.unique_id, "manager lost the request, sending it again");
                let mut retry = unit.request.clone();
                retry.unique_id = 0;
                match self.client.submit(retry.clone()) {
                    Ok(id) => {
                        retry.unique_id = id;
                        unit.request = retry;
                        None
                    }
                    Err(e) => Some(Err(TaskError::NotSent(e.to_string()))),
                }
            }
            Ok(StatusReply::Waiting) | Ok(StatusReply::Running) => None,
            Err(e) => {
                debug!(request_id = unit.request.unique_id, error = %e, "status poll failed");
                None
            }
        }
    }

    fn deliver(&mut self, unit: SentUnit, outcome: TaskOutcome) {
        if let Some(frame) = &unit.frame {
            self.callbacks.notify_post_execution(&self.stack, frame, &outcome);
        }
        (unit.callback)(outcome);
    }

    /// Fail every unit still pending.
    fn expire_all(&mut self, waited: Duration) {
        let units: Vec<SentUnit> = self.sent.drain(..).collect();
        for unit in units {
            warn!(request_id = unit.request.unique_id, ?waited, "gave up waiting for request");
            let outcome = Err(TaskError::Crashed(format!("timed out after {:?}", waited)));
            self.deliver(unit, outcome);
        }
    }

    /// Poll until `done` holds or the timeout expires.
    fn wait_for(&mut self, done: impl Fn(&Self) -> bool) {
        let started = Instant::now();
        loop {
            self.flush_callbacks();
            if done(&*self) {
                return;
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    self.expire_all(started.elapsed());
                    return;
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ExecutionContext for DistributedContext {
    fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut ExecutionStack {
        &mut self.stack
    }

    fn callbacks(&self) -> &CallbackList {
        &self.callbacks
    }

    fn callbacks_mut(&mut self) -> &mut CallbackList {
        &mut self.callbacks
    }

    fn describe(&self) -> String {
        format!("Distributed({} -> {})", self.project_name, self.destinations.join(", "))
    }

    fn is_multi_thread(&self) -> bool {
        true
    }

    fn run(&mut self, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome {
        let slot: Arc<Mutex<Option<TaskOutcome>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        self.push_work_unit(
            task,
            push_to_stack,
            Box::new(move |outcome| {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            }),
        );
        self.wait_for(|_| slot.lock().map(|s| s.is_some()).unwrap_or(true));

        let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        outcome.unwrap_or_else(|| Err(TaskError::Crashed("no outcome delivered".to_string())))
    }

    fn run_group(&mut self, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome> {
        if push_to_stack {
            self.enter_scope(group.name(), None);
        }

        let slots: Arc<Mutex<Vec<Option<TaskOutcome>>>> = Arc::new(Mutex::new(vec![None; group.len()]));
        for (index, task) in group.tasks().iter().enumerate() {
            let sink = Arc::clone(&slots);
            self.push_work_unit(
                Arc::clone(task),
                group.push_children_into_stack(),
                Box::new(move |outcome| {
                    sink.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(outcome);
                }),
            );
        }
        self.wait_for(|_| {
            slots
                .lock()
                .map(|s| s.iter().all(Option::is_some))
                .unwrap_or(true)
        });

        let outcomes: Vec<TaskOutcome> = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .map(|o| o.unwrap_or_else(|| Err(TaskError::Crashed("no outcome delivered".to_string()))))
            .collect();

        if push_to_stack {
            self.leave_scope(&TaskGroup::aggregate(&outcomes));
        }
        outcomes
    }

    /// Scope events of a pushed unit are reported around the stack without
    /// pushing onto it, since several units are pending at once.
    fn push_work_unit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback) {
        match self.send(&task) {
            Ok(request) => {
                let frame = push_to_stack.then(|| {
                    self.callbacks
                        .notify_pre_execution(&self.stack, task.name(), Some(&task));
                    ScopeFrame::new(task.name(), Some(Arc::clone(&task)))
                });
                self.sent.push(SentUnit { request, frame, callback });
            }
            Err(e) => {
                warn!(task = task.name(), error = %e, "task not sent");
                callback(Err(e));
            }
        }
    }

    fn flush_callbacks(&mut self) {
        let mut index = 0;
        while index < self.sent.len() {
            let mut unit = self.sent.swap_remove(index);
            match self.poll_unit(&mut unit) {
                Some(outcome) => self.deliver(unit, outcome),
                None => {
                    self.sent.push(unit);
                    let last = self.sent.len() - 1;
                    self.sent.swap(index, last);
                    index += 1;
                }
            }
        }
    }

    fn wait_until_all_work_units_are_done(&mut self) {
        self.wait_for(|ctx| ctx.sent.is_empty());
    }

    fn num_in_flight(&self) -> usize {
        self.sent.len()
    }
}
