use std::collections::HashMap;
use std::time::Duration;

use taskgrid_core::ExecutionConfig;
use tracing::info;

use crate::callback::CallbackList;
use crate::context::WorkUnitCallback;
use crate::notification::{NotificationQueue, UnitId};
use crate::stack::ExecutionStack;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// Context that runs pushed work on a fixed pool of worker threads.
///
/// Observer events and completion callbacks produced on workers are queued
/// and only delivered on the thread that owns this context, from
/// `flush_callbacks` or while it waits.
pub struct WorkerPoolContext {
    pub(super) stack: ExecutionStack,
    pub(super) callbacks: CallbackList,
    pub(super) pool: rayon::ThreadPool,
    pub(super) num_threads: usize,
    pub(super) queue: NotificationQueue,
    /// Completion callbacks of units whose outcome has not been delivered.
    pub(super) pending: HashMap<UnitId, WorkUnitCallback>,
    pub(super) next_unit: UnitId,
    pub(super) poll_interval: Duration,
}

impl WorkerPoolContext {
    /// Create a pool with `num_threads` workers (0 = available parallelism).
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        Self::from_config(&ExecutionConfig {
            worker_threads: num_threads,
            ..ExecutionConfig::default()
        })
    }

    pub fn from_config(config: &ExecutionConfig) -> Result<Self, PoolError> {
        let num_threads = config.resolved_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("taskgrid-worker-{}", i))
            .build()?;
        info!("Worker pool started with {} threads", num_threads);

        Ok(Self {
            stack: ExecutionStack::new(),
            callbacks: CallbackList::new(),
            pool,
            num_threads,
            queue: NotificationQueue::new(),
            pending: HashMap::new(),
            next_unit: 0,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}
