use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::callback::ExecutionCallback;
use crate::stack::{ExecutionStack, ScopeFrame};
use crate::task::TaskOutcome;

/// Per-scope execution statistics, keyed by scope description.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionMetrics {
    /// Closed scopes by description.
    pub tasks_executed: HashMap<String, u64>,
    /// Closed scopes whose outcome was an error.
    pub tasks_failed: HashMap<String, u64>,
    /// Average scope duration by description.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last completion time by description.
    pub last_run: HashMap<String, DateTime<Utc>>,
}

impl ExecutionMetrics {
    /// Record one closed scope.
    pub fn record_execution(&mut self, name: &str, duration: Duration, succeeded: bool) {
        *self.tasks_executed.entry(name.to_string()).or_default() += 1;
        if !succeeded {
            *self.tasks_failed.entry(name.to_string()).or_default() += 1;
        }
        self.last_run.insert(name.to_string(), Utc::now());

        let count = self.tasks_executed[name];
        let prev_avg = self.avg_task_duration.get(name).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_task_duration.insert(name.to_string(), new_avg);
    }

    pub fn total_executed(&self) -> u64 {
        self.tasks_executed.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks_failed.values().sum()
    }
}

/// Observer that folds every closed scope into an [`ExecutionMetrics`].
#[derive(Default)]
pub struct MetricsCallback {
    metrics: Arc<RwLock<ExecutionMetrics>>,
}

impl MetricsCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current metrics snapshot.
    pub fn snapshot(&self) -> ExecutionMetrics {
        self.metrics.read().map(|m| m.clone()).unwrap_or_default()
    }
}

impl ExecutionCallback for MetricsCallback {
    fn post_execution(&self, _stack: &ExecutionStack, frame: &ScopeFrame, outcome: &TaskOutcome) {
        if let Ok(mut m) = self.metrics.write() {
            m.record_execution(&frame.description, frame.elapsed(), outcome.is_ok());
        }
    }
}
