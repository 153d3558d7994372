//! Error types for response decoding

use thiserror::Error;

/// Errors that can occur when decoding a server response
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Body is not valid JSON or does not match the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// A stored parameter document is not a JSON object of scalars
    #[error("Invalid parameter document: {0}")]
    InvalidParams(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}
