use std::sync::Arc;

use rayon::prelude::*;

use crate::callback::CallbackList;
use crate::context::{run_inline, ExecutionContext, WorkUnitCallback};
use crate::notification::{NotificationForwarder, NotificationSender};
use crate::stack::ExecutionStack;
use crate::task::{Task, TaskGroup, TaskOutcome};

/// Context handed to a task running on a pool thread.
///
/// Its stack continues from a snapshot of the pusher's stack, and its only
/// observer forwards events to the owning context's queue.
pub struct WorkerThreadContext {
    stack: ExecutionStack,
    callbacks: CallbackList,
    sender: NotificationSender,
}

impl WorkerThreadContext {
    pub(crate) fn new(parent: Arc<ExecutionStack>, sender: NotificationSender) -> Self {
        let mut callbacks = CallbackList::new();
        callbacks.append(Arc::new(NotificationForwarder::new(sender.clone())));
        Self {
            stack: ExecutionStack::with_parent(parent),
            callbacks,
            sender,
        }
    }
}

impl ExecutionContext for WorkerThreadContext {
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
        "WorkerThread".to_string()
    }

    fn is_multi_thread(&self) -> bool {
        true
    }

    fn run(&mut self, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome {
        run_inline(self, task, push_to_stack)
    }

    /// Members are spread over the pool; each runs in a context forked from
    /// the current stack.
    fn run_group(&mut self, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome> {
        if push_to_stack {
            self.enter_scope(group.name(), None);
        }
        let parent = self.stack.snapshot();
        let sender = self.sender.clone();
        let push_children = group.push_children_into_stack();

        let outcomes: Vec<TaskOutcome> = group
            .tasks()
            .par_iter()
            .map(|task| {
                let mut child = WorkerThreadContext::new(Arc::clone(&parent), sender.clone());
                run_inline(&mut child, Arc::clone(task), push_children)
            })
            .collect();

        if push_to_stack {
            self.leave_scope(&TaskGroup::aggregate(&outcomes));
        }
        outcomes
    }

    /// Nested pushes run inline on this worker.
    fn push_work_unit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback) {
        let outcome = run_inline(self, task, push_to_stack);
        callback(outcome);
    }
}
