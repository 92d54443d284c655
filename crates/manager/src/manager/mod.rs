//! Durable registry and router for distributed requests.
//!
//! - `core`: RequestManager struct, recovery, and the request lifecycle
//! - `reconcile`: status reconciliation against destination nodes

mod core;
mod reconcile;
#[cfg(test)]
mod tests;

pub use self::core::RequestManager;
pub use self::reconcile::SyncReport;
