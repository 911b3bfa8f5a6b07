use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to bind relay on {address}: {reason}\n\nTroubleshooting:\n  - Check if another process is using this port: lsof -i :{}\n  - Check that the interface holding the relay address is up", .address.port())]
    ProxyBind { address: SocketAddr, reason: String },

    #[error("Destination {destination} refused the connection: {reason}")]
    ProxyConnectionRefused {
        destination: SocketAddr,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Port the error concerns, if it is tied to a single listener
    pub fn port(&self) -> Option<u16> {
        match self {
            RelayError::ProxyBind { address, .. } => Some(address.port()),
            _ => None,
        }
    }
}
