//! Error types for the accessory protocol.

use thiserror::Error;

/// Errors that can occur when encoding or decoding protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The accessory descriptor line could not be decoded.
    #[error("invalid accessory descriptor: {0}")]
    InvalidDescriptor(String),

    /// A host frame line did not match any known shape.
    #[error("unknown host frame: {0:?}")]
    UnknownFrame(String),

    /// A host frame had the right shape but a bad field.
    #[error("invalid {field} in host frame {line:?}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// The full line that was being parsed.
        line: String,
    },

    /// Line longer than the receive buffer.
    #[error("line too long: max {max} bytes, got {actual}")]
    LineTooLong { max: usize, actual: usize },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidDescriptor(err.to_string())
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
