use skyport_link::LinkError;
use skyport_proto::{InvalidTransition, PortSpecError, ProviderError, TunnelState};
use skyport_remote::RemoteError;
use thiserror::Error;

/// Tunnel manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Invalid tunnel configuration: {0}")]
    InvalidConfig(String),

    /// Creating, attaching or booting the remote endpoint failed. Fatal; the
    /// caller is expected to run cleanup.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Tunnel establishment failed: {0}")]
    TunnelEstablish(String),

    #[error("Heartbeat failed {failures} time(s) in a row: {reason}")]
    HeartbeatFailure { failures: u32, reason: String },

    #[error("Cannot {operation} while tunnel is {state}")]
    InvalidState {
        operation: String,
        state: TunnelState,
    },

    #[error("Remote operation failed: {0}")]
    Remote(#[from] RemoteError),
}

impl From<PortSpecError> for ManagerError {
    fn from(err: PortSpecError) -> Self {
        ManagerError::InvalidConfig(err.to_string())
    }
}

impl From<InvalidTransition> for ManagerError {
    fn from(err: InvalidTransition) -> Self {
        ManagerError::InvalidState {
            operation: format!("move to {}", err.to),
            state: err.from,
        }
    }
}

impl From<ProviderError> for ManagerError {
    fn from(err: ProviderError) -> Self {
        ManagerError::Provisioning(err.to_string())
    }
}

impl From<LinkError> for ManagerError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::KeyGeneration(e) => ManagerError::Provisioning(e.to_string()),
            LinkError::Render(e) => ManagerError::Provisioning(format!("boot document: {}", e)),
            other => ManagerError::TunnelEstablish(other.to_string()),
        }
    }
}

impl ManagerError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ManagerError::InvalidState { .. })
    }
}
