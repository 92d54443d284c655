use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use taskgrid_core::ManagerConfig;

const IPC_DIR: &str = "/tmp/taskgrid";

/// Where the manager listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Unix domain socket named `/tmp/taskgrid/<name>.sock`.
    Ipc(String),
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn ipc(name: impl Into<String>) -> Self {
        Self::Ipc(name.into())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::tcp(config.host.clone(), config.port)
    }

    /// ZeroMQ address string.
    pub fn address(&self) -> String {
        match self {
            Self::Ipc(_) => format!("ipc://{}", self.socket_path().unwrap_or_default().display()),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    pub fn socket_path(&self) -> Option<PathBuf> {
        match self {
            Self::Ipc(name) => Some(PathBuf::from(IPC_DIR).join(format!("{name}.sock"))),
            Self::Tcp { .. } => None,
        }
    }

    /// Create the socket directory and drop a socket file left by a
    /// previous process. No-op for TCP.
    pub fn prepare_bind(&self) -> std::io::Result<()> {
        let Some(path) = self.socket_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale IPC socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}
