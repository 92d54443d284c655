//! Bandit-driven candidate selection on top of the execution contexts.

pub mod arm;
pub mod index;
pub mod objective;
pub mod pool;
pub mod report;

pub use arm::{Arm, ArmStatistics};
pub use index::ArmIndex;
pub use objective::{BanditObjective, ObjectiveRange};
pub use pool::{BanditPool, MAX_IN_FLIGHT};
pub use report::{ArmSummary, IterationReport};
