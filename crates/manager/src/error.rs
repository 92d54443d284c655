use thiserror::Error;

use crate::request::RequestId;

/// Errors raised by the request manager and its on-disk store.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request {0} is not active")]
    Inactive(RequestId),

    #[error("invalid project name '{0}'")]
    InvalidProjectName(String),
}

/// Errors crossing a node or manager channel. Cloneable and string-based so
/// they can be produced on either side of the wire.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("node '{0}' is unreachable")]
    Unreachable(String),

    #[error("request {0} is unknown to the node")]
    UnknownRequest(RequestId),

    #[error("request {0} has no result yet")]
    NotReady(RequestId),

    #[error("manager error: {0}")]
    Manager(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<ManagerError> for ChannelError {
    fn from(e: ManagerError) -> Self {
        Self::Manager(e.to_string())
    }
}
