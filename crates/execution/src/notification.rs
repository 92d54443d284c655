use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::callback::{CallbackList, ExecutionCallback, MessageLevel};
use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::{ProgressState, Task, TaskOutcome};

/// Identifier of a unit pushed on a worker pool.
pub type UnitId = u64;

/// Event produced on a worker thread, replayed on the owning thread.
pub enum Notification {
    PreExecution {
        stack: Arc<ExecutionStack>,
        description: String,
        task: Option<Arc<dyn Task>>,
    },
    PostExecution {
        stack: Arc<ExecutionStack>,
        frame: ScopeFrame,
        outcome: TaskOutcome,
    },
    Progress {
        stack: Arc<ExecutionStack>,
        progress: ProgressState,
    },
    Result {
        stack: Arc<ExecutionStack>,
        name: String,
        value: Value,
    },
    Message {
        level: MessageLevel,
        location: String,
        what: String,
    },
    ThreadBegin {
        stack: Arc<ExecutionStack>,
    },
    ThreadEnd {
        stack: Arc<ExecutionStack>,
    },
    WorkUnitFinished {
        unit: UnitId,
        outcome: TaskOutcome,
    },
}

impl Notification {
    /// Replay an observer event on `callbacks`. Work unit completions are
    /// handed back to the caller instead.
    pub fn dispatch(self, callbacks: &CallbackList) -> Option<(UnitId, TaskOutcome)> {
        match self {
            Notification::PreExecution { stack, description, task } => {
                callbacks.notify_pre_execution(&stack, &description, task.as_ref());
            }
            Notification::PostExecution { stack, frame, outcome } => {
                callbacks.notify_post_execution(&stack, &frame, &outcome);
            }
            Notification::Progress { stack, progress } => callbacks.notify_progress(&stack, &progress),
            Notification::Result { stack, name, value } => callbacks.notify_result(&stack, &name, &value),
            Notification::Message { level, location, what } => {
                callbacks.notify_message(level, &location, &what);
            }
            Notification::ThreadBegin { stack } => callbacks.notify_thread_begin(&stack),
            Notification::ThreadEnd { stack } => callbacks.notify_thread_end(&stack),
            Notification::WorkUnitFinished { unit, outcome } => return Some((unit, outcome)),
        }
        None
    }
}

/// Sending half, cloned into every worker.
#[derive(Clone)]
pub struct NotificationSender {
    inner: Sender<Notification>,
}

impl NotificationSender {
    pub fn send(&self, notification: Notification) {
        if self.inner.send(notification).is_err() {
            debug!("Notification dropped: owning context is gone");
        }
    }
}

/// FIFO queue of notifications owned by a worker pool context.
pub struct NotificationQueue {
    sender: Sender<Notification>,
    receiver: Receiver<Notification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            inner: self.sender.clone(),
        }
    }

    /// Next notification if one is ready.
    pub fn try_next(&self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next notification.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.receiver.recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer installed on worker-thread contexts: turns every event into a
/// queued notification carrying a snapshot of the stack.
pub struct NotificationForwarder {
    sender: NotificationSender,
}

impl NotificationForwarder {
    pub fn new(sender: NotificationSender) -> Self {
        Self { sender }
    }
}

impl ExecutionCallback for NotificationForwarder {
    fn pre_execution(&self, stack: &ExecutionStack, description: &str, task: Option<&Arc<dyn Task>>) {
        self.sender.send(Notification::PreExecution {
            stack: stack.snapshot(),
            description: description.to_string(),
            task: task.cloned(),
        });
    }

    fn post_execution(&self, stack: &ExecutionStack, frame: &ScopeFrame, outcome: &TaskOutcome) {
        self.sender.send(Notification::PostExecution {
            stack: stack.snapshot(),
            frame: frame.clone(),
            outcome: outcome.clone(),
        });
    }

    fn progress(&self, stack: &ExecutionStack, progress: &ProgressState) {
        self.sender.send(Notification::Progress {
            stack: stack.snapshot(),
            progress: progress.clone(),
        });
    }

    fn result(&self, stack: &ExecutionStack, name: &str, value: &Value) {
        self.sender.send(Notification::Result {
            stack: stack.snapshot(),
            name: name.to_string(),
            value: value.clone(),
        });
    }

    fn message(&self, level: MessageLevel, location: &str, what: &str) {
        self.sender.send(Notification::Message {
            level,
            location: location.to_string(),
            what: what.to_string(),
        });
    }

    fn thread_begin(&self, stack: &ExecutionStack) {
        self.sender.send(Notification::ThreadBegin { stack: stack.snapshot() });
    }

    fn thread_end(&self, stack: &ExecutionStack) {
        self.sender.send(Notification::ThreadEnd { stack: stack.snapshot() });
    }
}
