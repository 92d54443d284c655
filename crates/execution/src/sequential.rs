use std::sync::Arc;

use crate::callback::CallbackList;
use crate::context::{run_group_inline, run_inline, ExecutionContext, WorkUnitCallback};
use crate::stack::ExecutionStack;
use crate::task::{Task, TaskGroup, TaskOutcome};

/// Runs everything inline on the calling thread.
#[derive(Default)]
pub struct SequentialContext {
    stack: ExecutionStack,
    callbacks: CallbackList,
}

impl SequentialContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionContext for SequentialContext {
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
        "Sequential".to_string()
    }

    fn run(&mut self, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome {
        run_inline(self, task, push_to_stack)
    }

    fn run_group(&mut self, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome> {
        run_group_inline(self, group, push_to_stack)
    }

    fn push_work_unit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback) {
        let outcome = run_inline(self, task, push_to_stack);
        callback(outcome);
    }
}
