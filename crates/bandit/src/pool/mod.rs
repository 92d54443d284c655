//! Bandit selection pool.
//!
//! Arms wait in an [`ArmIndex`](crate::index::ArmIndex) ordered by a
//! UCB1-style score. Each play pops the best arm, evaluates its objective on
//! the next instance (inline, or as a work unit when the context is
//! multi-threaded), and reinserts the arm with its new score once the
//! evaluation is observed.
//!
//! - `core`: pool construction, arm management and scoring
//! - `play`: selection, evaluation, backpressure and iteration reports

mod core;
mod play;

pub use self::core::{BanditPool, MAX_IN_FLIGHT};
