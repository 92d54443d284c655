use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::callback::CallbackList;
use crate::context::{run_inline, ExecutionContext, WorkUnitCallback};
use crate::notification::{Notification, UnitId};
use crate::stack::ExecutionStack;
use crate::task::{Task, TaskError, TaskGroup, TaskOutcome};

use super::core::WorkerPoolContext;
use super::worker::WorkerThreadContext;

impl WorkerPoolContext {
    /// Hand `task` to the pool. The stack is snapshotted now, so scopes the
    /// caller opens later do not leak into the unit.
    pub(super) fn submit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback) -> UnitId {
        let unit = self.next_unit;
        self.next_unit += 1;
        self.pending.insert(unit, callback);

        let parent = self.stack.snapshot();
        let sender = self.queue.sender();
        self.pool.spawn(move || {
            let mut context = WorkerThreadContext::new(parent, sender.clone());
            context.callbacks().notify_thread_begin(context.stack());
            let outcome = run_inline(&mut context, task, push_to_stack);
            context.callbacks().notify_thread_end(context.stack());
            sender.send(Notification::WorkUnitFinished { unit, outcome });
        });
        unit
    }

    fn deliver(&mut self, notification: Notification) {
        if let Some((unit, outcome)) = notification.dispatch(&self.callbacks) {
            match self.pending.remove(&unit) {
                Some(callback) => callback(outcome),
                None => warn!("Completion for unknown work unit {}", unit),
            }
        }
    }

    /// Deliver notifications until `done` holds, sleeping on the queue
    /// between checks.
    fn wait_for(&mut self, done: impl Fn(&Self) -> bool) {
        loop {
            self.flush_callbacks();
            if done(&*self) {
                return;
            }
            if let Some(notification) = self.queue.next_timeout(self.poll_interval) {
                self.deliver(notification);
            }
        }
    }
}

impl ExecutionContext for WorkerPoolContext {
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
        format!("WorkerPool({} threads)", self.num_threads)
    }

    fn is_multi_thread(&self) -> bool {
        self.num_threads > 1
    }

    fn run(&mut self, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome {
        let slot: Arc<Mutex<Option<TaskOutcome>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        self.submit(
            task,
            push_to_stack,
            Box::new(move |outcome| {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            }),
        );
        self.wait_for(|_| slot.lock().map(|s| s.is_some()).unwrap_or(true));

        let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        outcome.unwrap_or_else(|| Err(TaskError::failed("work unit produced no outcome")))
    }

    fn run_group(&mut self, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome> {
        if push_to_stack {
            self.enter_scope(group.name(), None);
        }

        let slots: Arc<Mutex<Vec<Option<TaskOutcome>>>> = Arc::new(Mutex::new(vec![None; group.len()]));
        for (index, task) in group.tasks().iter().enumerate() {
            let sink = Arc::clone(&slots);
            self.submit(
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
            .map(|o| o.unwrap_or_else(|| Err(TaskError::failed("work unit produced no outcome"))))
            .collect();

        if push_to_stack {
            self.leave_scope(&TaskGroup::aggregate(&outcomes));
        }
        outcomes
    }

    fn push_work_unit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback) {
        self.submit(task, push_to_stack, callback);
    }

    fn flush_callbacks(&mut self) {
        while let Some(notification) = self.queue.try_next() {
            self.deliver(notification);
        }
    }

    fn wait_until_all_work_units_are_done(&mut self) {
        self.wait_for(|ctx| ctx.pending.is_empty());
    }

    fn num_in_flight(&self) -> usize {
        self.pending.len()
    }
}
