use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::callback::{CallbackList, ExecutionCallback, MessageLevel};
use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::{panic_message, ProgressState, Task, TaskError, TaskGroup, TaskOutcome};

/// Completion handler for [`ExecutionContext::push_work_unit`].
pub type WorkUnitCallback = Box<dyn FnOnce(TaskOutcome) + Send>;

/// Strategy for running tasks.
///
/// Implementations own a scope stack and an observer list; scope management
/// and event emission are provided on top of those accessors.
pub trait ExecutionContext {
    fn stack(&self) -> &ExecutionStack;
    fn stack_mut(&mut self) -> &mut ExecutionStack;
    fn callbacks(&self) -> &CallbackList;
    fn callbacks_mut(&mut self) -> &mut CallbackList;

    /// Human-readable strategy name.
    fn describe(&self) -> String;

    /// Whether pushed work may run concurrently with the caller.
    fn is_multi_thread(&self) -> bool {
        false
    }

    /// Run `task` and block until it finishes.
    fn run(&mut self, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome;

    /// Run every member of `group`; outcomes keep the group's order.
    fn run_group(&mut self, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome>;

    /// Start `task` and invoke `callback` with its outcome once it is done.
    fn push_work_unit(&mut self, task: Arc<dyn Task>, push_to_stack: bool, callback: WorkUnitCallback);

    /// Deliver completions and queued observer events.
    fn flush_callbacks(&mut self) {}

    /// Block until every pushed unit has completed and its callback has run.
    fn wait_until_all_work_units_are_done(&mut self) {
        self.flush_callbacks();
    }

    /// Units pushed whose callback has not run yet.
    fn num_in_flight(&self) -> usize {
        0
    }

    fn append_callback(&mut self, callback: Arc<dyn ExecutionCallback>) {
        self.callbacks_mut().append(callback);
    }

    fn remove_callback(&mut self, callback: &Arc<dyn ExecutionCallback>) -> bool {
        self.callbacks_mut().remove(callback)
    }

    fn enter_scope(&mut self, description: &str, task: Option<Arc<dyn Task>>) {
        self.callbacks()
            .notify_pre_execution(self.stack(), description, task.as_ref());
        self.stack_mut().push(ScopeFrame::new(description, task));
    }

    /// Close the innermost scope.
    ///
    /// # Panics
    ///
    /// Panics when no scope is open: an unbalanced leave is a programming error.
    fn leave_scope(&mut self, outcome: &TaskOutcome) -> ScopeFrame {
        let frame = match self.stack_mut().pop() {
            Some(frame) => frame,
            None => panic!("leave_scope called with no open scope"),
        };
        self.callbacks()
            .notify_post_execution(self.stack(), &frame, outcome);
        frame
    }

    fn progress(&self, progress: ProgressState) {
        self.callbacks().notify_progress(self.stack(), &progress);
    }

    fn result(&self, name: &str, value: Value) {
        self.callbacks().notify_result(self.stack(), name, &value);
    }

    fn information(&self, location: &str, what: &str) {
        self.callbacks()
            .notify_message(MessageLevel::Information, location, what);
    }

    fn warning(&self, location: &str, what: &str) {
        self.callbacks()
            .notify_message(MessageLevel::Warning, location, what);
    }

    fn error(&self, location: &str, what: &str) {
        self.callbacks().notify_message(MessageLevel::Error, location, what);
    }
}

/// Run `task` on the calling thread inside `context`.
///
/// A panic raised by the task becomes [`TaskError::Panicked`]. Scopes the
/// task left open, on any exit path, are closed with its outcome so the stack
/// returns to its depth before the call.
pub fn run_inline(context: &mut dyn ExecutionContext, task: Arc<dyn Task>, push_to_stack: bool) -> TaskOutcome {
    if push_to_stack {
        context.enter_scope(task.name(), Some(Arc::clone(&task)));
    }
    let scope_depth = context.stack().depth();

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.run(&mut *context))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
    };

    let left_open = context.stack().depth().saturating_sub(scope_depth);
    if left_open > 0 {
        if !matches!(outcome, Err(TaskError::Panicked(_))) {
            warn!(task = task.name(), left_open, "task returned with scopes still open");
        }
        while context.stack().depth() > scope_depth {
            context.leave_scope(&outcome);
        }
    }
    if context.stack().depth() < scope_depth {
        error!(task = task.name(), "task closed scopes it did not open");
        return outcome;
    }

    if push_to_stack {
        context.leave_scope(&outcome);
    }
    outcome
}

/// Run the members of `group` one after the other through `context.run`.
pub fn run_group_inline(context: &mut dyn ExecutionContext, group: &TaskGroup, push_to_stack: bool) -> Vec<TaskOutcome> {
    if push_to_stack {
        context.enter_scope(group.name(), None);
    }
    let mut outcomes = Vec::with_capacity(group.len());
    for task in group.tasks() {
        outcomes.push(context.run(Arc::clone(task), group.push_children_into_stack()));
    }
    if push_to_stack {
        context.leave_scope(&TaskGroup::aggregate(&outcomes));
    }
    outcomes
}
