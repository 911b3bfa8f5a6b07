use ipnetwork::Ipv4Network;
use skyport_proto::ProviderError;
use thiserror::Error;

/// Link model errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No unused /30 subnet left in {0}")]
    SubnetExhausted(Ipv4Network),

    #[error("Invalid link subnet: {0}")]
    InvalidSubnet(String),

    #[error("Failed to inspect local interfaces: {0}")]
    InterfaceLookup(String),

    #[error("Invalid interface name '{0}': expected 1-15 characters")]
    InterfaceName(String),

    #[error("Interface command '{command}' failed: {message}")]
    InterfaceCommand { command: String, message: String },

    #[error("Failed to render boot document: {0}")]
    Render(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ipnetwork::IpNetworkError> for LinkError {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        LinkError::InvalidSubnet(err.to_string())
    }
}

impl From<serde_yaml::Error> for LinkError {
    fn from(err: serde_yaml::Error) -> Self {
        LinkError::Render(err.to_string())
    }
}
