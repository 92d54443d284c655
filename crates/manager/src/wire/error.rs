use std::time::Duration;

use thiserror::Error;

use crate::error::ChannelError;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no reply after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager answered with an error.
    #[error("manager error: {0}")]
    Remote(String),
}

impl From<WireError> for ChannelError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Remote(message) => ChannelError::Manager(message),
            other => ChannelError::Transport(other.to_string()),
        }
    }
}
