//! Error types for the accessory link.

use thiserror::Error;

/// Errors that can occur while running the accessory link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No accessory session is active, or it was torn down mid-operation.
    #[error("no accessory connected")]
    NotConnected,

    /// The transport could not create a listening endpoint.
    #[error("failed to listen on transport: {0}")]
    Listen(#[source] std::io::Error),

    /// I/O error on an established channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for LinkError {
    fn from(err: serde_yaml::Error) -> Self {
        LinkError::Config(err.to_string())
    }
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
