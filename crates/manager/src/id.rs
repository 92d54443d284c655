use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::error::ManagerError;
use crate::request::RequestId;
use crate::store::write_atomic;

/// Mints monotonically increasing request ids under its own lock.
///
/// The last minted id is persisted after every mint so ids are never reused
/// across restarts.
pub struct RequestIdGenerator {
    path: Option<PathBuf>,
    last: Mutex<RequestId>,
}

impl RequestIdGenerator {
    /// Generator without persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            last: Mutex::new(0),
        }
    }

    /// Generator persisted at `path`, resuming from the stored value.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let path = path.into();
        let last = if path.exists() {
            let text = fs::read_to_string(&path)?;
            match text.trim().parse::<RequestId>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(path = %path.display(), "unreadable request counter, restarting from recovered ids");
                    0
                }
            }
        } else {
            0
        };
        Ok(Self {
            path: Some(path),
            last: Mutex::new(last),
        })
    }

    /// Make sure future ids are greater than `id`.
    pub fn observe(&self, id: RequestId) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if id > *last {
            *last = id;
        }
    }

    pub fn next(&self) -> Result<RequestId, ManagerError> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *last + 1;
        if let Some(path) = &self.path {
            write_atomic(path, id.to_string().as_bytes())?;
        }
        *last = id;
        Ok(id)
    }

    pub fn last(&self) -> RequestId {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
