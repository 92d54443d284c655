use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskgrid_execution::{
    ExecutionContext, ExecutionTrace, TaskError, TaskOutcome, TaskRegistry, TraceCallback, TracedTask,
    WorkerPoolContext,
};
use tracing::{debug, info, warn};

use crate::channel::{ManagerClient, NodeChannel};
use crate::error::ChannelError;
use crate::request::{DistributedRequest, RequestId, StatusReply};

#[derive(Debug, Clone)]
enum JobState {
    Running,
    Finished(TaskOutcome, ExecutionTrace),
    Crashed(String, Option<ExecutionTrace>),
}

impl JobState {
    fn reply(&self) -> StatusReply {
        match self {
            Self::Running => StatusReply::Running,
            Self::Finished(..) => StatusReply::Finished,
            Self::Crashed(..) => StatusReply::Crashed,
        }
    }

    fn outcome(&self) -> Option<TaskOutcome> {
        match self {
            Self::Running => None,
            Self::Finished(outcome, _) => Some(outcome.clone()),
            Self::Crashed(reason, _) => Some(Err(TaskError::Crashed(reason.clone()))),
        }
    }

    fn trace(&self) -> Option<ExecutionTrace> {
        match self {
            Self::Running => None,
            Self::Finished(_, trace) => Some(trace.clone()),
            Self::Crashed(_, trace) => trace.clone(),
        }
    }
}

type JobTable = Arc<Mutex<HashMap<RequestId, JobState>>>;

/// Destination side of the distributed strategy.
///
/// Claims the requests waiting for it, rebuilds their tasks through a
/// [`TaskRegistry`], runs them on a worker pool, and answers status polls.
/// Every job runs under its own trace recorder; the trace travels with the
/// final status report.
/// Jobs are only known in memory: after a restart every old request is
/// answered with `UnknownRequest`, which makes the manager re-queue it.
pub struct WorkerNode {
    name: String,
    client: Arc<dyn ManagerClient>,
    registry: Arc<TaskRegistry>,
    context: Mutex<WorkerPoolContext>,
    jobs: JobTable,
}

impl WorkerNode {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ManagerClient>,
        registry: Arc<TaskRegistry>,
        context: WorkerPoolContext,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            registry,
            context: Mutex::new(context),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> MutexGuard<'_, WorkerPoolContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<RequestId, JobState>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce this node to the manager.
    pub fn register(&self) -> Result<(), ChannelError> {
        self.client.register_node(&self.name)?;
        info!(node = %self.name, "node registered");
        Ok(())
    }

    /// Claim waiting requests and start them. Returns how many were claimed.
    pub fn poll_requests(&self) -> Result<usize, ChannelError> {
        let requests = self.client.waiting_requests(&self.name)?;
        let count = requests.len();
        for request in requests {
            self.start(request);
        }
        self.flush();
        Ok(count)
    }

    fn start(&self, request: DistributedRequest) {
        let id = request.unique_id;
        let task = match self.registry.build(&request.task) {
            Ok(task) => task,
            Err(e) => {
                warn!(node = %self.name, request_id = id, error = %e, "could not rebuild task");
                let state = JobState::Crashed(e.to_string(), None);
                self.report(id, &state);
                self.jobs().insert(id, state);
                return;
            }
        };

        self.jobs().insert(id, JobState::Running);
        self.report(id, &JobState::Running);
        debug!(node = %self.name, request_id = id, task = task.name(), "request started");

        let recorder = Arc::new(TraceCallback::new(format!("{} request {}", self.name, id)));
        let traced = TracedTask::shared(task, Arc::clone(&recorder));
        let jobs = Arc::clone(&self.jobs);
        let client = Arc::clone(&self.client);
        let node = self.name.clone();
        self.context().push_work_unit(
            traced,
            false,
            Box::new(move |outcome| {
                let trace = recorder.snapshot();
                let state = match outcome {
                    Err(TaskError::Panicked(message)) => JobState::Crashed(message, Some(trace)),
                    other => JobState::Finished(other, trace),
                };
                debug!(node = %node, request_id = id, status = ?state.reply(), "request done");
                if let Err(e) = client.report_status(&node, id, state.reply(), state.outcome(), state.trace()) {
                    warn!(node = %node, request_id = id, error = %e, "could not report status");
                }
                jobs.lock().unwrap_or_else(PoisonError::into_inner).insert(id, state);
            }),
        );
    }

    fn report(&self, id: RequestId, state: &JobState) {
        if let Err(e) = self
            .client
            .report_status(&self.name, id, state.reply(), state.outcome(), state.trace())
        {
            warn!(node = %self.name, request_id = id, error = %e, "could not report status");
        }
    }

    /// Deliver completions of finished jobs.
    pub fn flush(&self) {
        self.context().flush_callbacks();
    }

    /// Block until every started job has completed.
    pub fn wait_idle(&self) {
        self.context().wait_until_all_work_units_are_done();
    }

    pub fn num_running(&self) -> usize {
        self.context().num_in_flight()
    }

    pub fn job_status(&self, id: RequestId) -> StatusReply {
        self.jobs()
            .get(&id)
            .map(JobState::reply)
            .unwrap_or(StatusReply::UnknownRequest)
    }
}

impl NodeChannel for WorkerNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn request_status(&self, request: &DistributedRequest) -> Result<StatusReply, ChannelError> {
        self.flush();
        Ok(self.job_status(request.unique_id))
    }

    fn fetch_result(&self, request: &DistributedRequest) -> Result<TaskOutcome, ChannelError> {
        self.flush();
        let id = request.unique_id;
        match self.jobs().get(&id) {
            Some(state) => state.outcome().ok_or(ChannelError::NotReady(id)),
            None => Err(ChannelError::UnknownRequest(id)),
        }
    }

    fn fetch_trace(&self, request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ChannelError> {
        self.flush();
        let id = request.unique_id;
        match self.jobs().get(&id) {
            Some(state) => Ok(state.trace()),
            None => Err(ChannelError::UnknownRequest(id)),
        }
    }
}
