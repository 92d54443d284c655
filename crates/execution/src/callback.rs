use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::{ProgressState, Task, TaskOutcome};

/// Severity of a free-form observer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Information,
    Warning,
    Error,
}

/// Observer of execution events. Every method defaults to a no-op.
///
/// On a worker pool, observers registered on the owning context are only
/// ever invoked from the owning thread.
pub trait ExecutionCallback: Send + Sync {
    /// A scope is about to open. `stack` does not contain it yet.
    fn pre_execution(&self, _stack: &ExecutionStack, _description: &str, _task: Option<&Arc<dyn Task>>) {}

    /// A scope closed. `stack` no longer contains `frame`.
    fn post_execution(&self, _stack: &ExecutionStack, _frame: &ScopeFrame, _outcome: &TaskOutcome) {}

    fn progress(&self, _stack: &ExecutionStack, _progress: &ProgressState) {}

    fn result(&self, _stack: &ExecutionStack, _name: &str, _value: &Value) {}

    fn message(&self, _level: MessageLevel, _location: &str, _what: &str) {}

    fn thread_begin(&self, _stack: &ExecutionStack) {}

    fn thread_end(&self, _stack: &ExecutionStack) {}
}

/// Ordered observer list attached to a context.
///
/// Dispatch iterates over a snapshot so an observer may add or remove
/// observers while being notified.
#[derive(Clone, Default)]
pub struct CallbackList {
    callbacks: Vec<Arc<dyn ExecutionCallback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, callback: Arc<dyn ExecutionCallback>) {
        self.callbacks.push(callback);
    }

    /// Remove by identity. Returns false when the observer was not registered.
    pub fn remove(&mut self, callback: &Arc<dyn ExecutionCallback>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        self.callbacks.len() != before
    }

    pub fn clear(&mut self) {
        self.callbacks.clear();
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ExecutionCallback>> {
        self.callbacks.clone()
    }

    pub fn notify_pre_execution(&self, stack: &ExecutionStack, description: &str, task: Option<&Arc<dyn Task>>) {
        for cb in self.snapshot() {
            cb.pre_execution(stack, description, task);
        }
    }

    /// Post events run in reverse registration order.
    pub fn notify_post_execution(&self, stack: &ExecutionStack, frame: &ScopeFrame, outcome: &TaskOutcome) {
        for cb in self.snapshot().iter().rev() {
            cb.post_execution(stack, frame, outcome);
        }
    }

    pub fn notify_progress(&self, stack: &ExecutionStack, progress: &ProgressState) {
        for cb in self.snapshot() {
            cb.progress(stack, progress);
        }
    }

    pub fn notify_result(&self, stack: &ExecutionStack, name: &str, value: &Value) {
        for cb in self.snapshot() {
            cb.result(stack, name, value);
        }
    }

    pub fn notify_message(&self, level: MessageLevel, location: &str, what: &str) {
        for cb in self.snapshot() {
            cb.message(level, location, what);
        }
    }

    pub fn notify_thread_begin(&self, stack: &ExecutionStack) {
        for cb in self.snapshot() {
            cb.thread_begin(stack);
        }
    }

    pub fn notify_thread_end(&self, stack: &ExecutionStack) {
        for cb in self.snapshot().iter().rev() {
            cb.thread_end(stack);
        }
    }
}
