use std::path::PathBuf;
use thiserror::Error;

/// Remote execution and state directory errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote command '{command}' failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("State directory error at {path:?}: {source}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Invalid endpoint record at {path:?}: {message}")]
    EndpointRecord { path: PathBuf, message: String },
}

impl RemoteError {
    pub(crate) fn state_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RemoteError::StateDir {
            path: path.into(),
            source,
        }
    }

    /// Whether the underlying cause is a missing file or directory
    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteError::StateDir { source, .. } | RemoteError::Spawn { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
