use skyport_proto::ProviderError;
use thiserror::Error;

/// Cloud provider and key tool errors
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{0} is not set")]
    MissingCredential(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context} failed with HTTP {status}: {message}")]
    Api {
        context: String,
        status: u16,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unexpected API response: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to run '{command}': {message}")]
    KeyTool { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CloudError> for ProviderError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::MissingCredential(name) => ProviderError::MissingCredential(name),
            CloudError::NotFound(what) => ProviderError::NotFound(what),
            CloudError::KeyTool { .. } => ProviderError::KeyGeneration(err.to_string()),
            other => ProviderError::Api(other.to_string()),
        }
    }
}
