//! Worker-pool execution strategy.
//!
//! Split into focused submodules:
//! - `core`: WorkerPoolContext struct, constructors, and accessors
//! - `dispatch`: work submission, notification draining, and waiting
//! - `worker`: the context tasks see while running on a pool thread

mod core;
mod dispatch;
mod worker;

pub use self::core::{PoolError, WorkerPoolContext};
pub use self::worker::WorkerThreadContext;
