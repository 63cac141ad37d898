//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering envelope encoding and decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Envelope was produced by an incompatible protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build speaks.
        expected: u8,
        /// Version found in the envelope.
        got: u8,
    },

    /// Binary payload was not valid base64.
    #[error("invalid payload encoding: {0}")]
    InvalidEncoding(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidEncoding(err.to_string())
    }
}
