use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy of the supervisor core. Nothing here is retried
/// internally; callers log and surface.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("module not found: {0}")]
    NotFound(String),

    #[error("host control failed for unit '{unit}' during {op}: {reason}")]
    HostControl {
        unit: String,
        op: &'static str,
        reason: String,
    },

    #[error("filesystem failure at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote registry failure: {0}")]
    RemoteRegistry(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

impl ManagerError {
    pub fn host(unit: impl Into<String>, op: &'static str, reason: impl Into<String>) -> Self {
        ManagerError::HostControl {
            unit: unit.into(),
            op,
            reason: reason.into(),
        }
    }

    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManagerError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
