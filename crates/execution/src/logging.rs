use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::callback::{ExecutionCallback, MessageLevel};
use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::{ProgressState, Task, TaskOutcome};

/// Observer that mirrors execution events into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallback;

impl ExecutionCallback for TracingCallback {
    fn pre_execution(&self, stack: &ExecutionStack, description: &str, _task: Option<&Arc<dyn Task>>) {
        debug!(depth = stack.depth(), "Entering {}", description);
    }

    fn post_execution(&self, stack: &ExecutionStack, frame: &ScopeFrame, outcome: &TaskOutcome) {
        let elapsed_ms = frame.elapsed().as_millis() as u64;
        match outcome {
            Ok(_) => debug!(depth = stack.depth(), elapsed_ms, "Finished {}", frame.description),
            Err(e) => warn!(depth = stack.depth(), elapsed_ms, "{} failed: {}", frame.description, e),
        }
    }

    fn progress(&self, stack: &ExecutionStack, progress: &ProgressState) {
        let scope = stack.top().map(|f| f.description.as_str()).unwrap_or("-");
        match progress.total {
            Some(total) => debug!("{}: {}/{} {}", scope, progress.value, total, progress.unit),
            None => debug!("{}: {} {}", scope, progress.value, progress.unit),
        }
    }

    fn result(&self, stack: &ExecutionStack, name: &str, value: &Value) {
        info!(depth = stack.depth(), "Result {} = {}", name, value);
    }

    fn message(&self, level: MessageLevel, location: &str, what: &str) {
        match level {
            MessageLevel::Information => info!("[{}] {}", location, what),
            MessageLevel::Warning => warn!("[{}] {}", location, what),
            MessageLevel::Error => error!("[{}] {}", location, what),
        }
    }

    fn thread_begin(&self, stack: &ExecutionStack) {
        trace!(depth = stack.depth(), "Worker thread begin");
    }

    fn thread_end(&self, stack: &ExecutionStack) {
        trace!(depth = stack.depth(), "Worker thread end");
    }
}
