//! Error types for mdde-registry

use thiserror::Error;

use crate::envelope::{ErrorCode, ErrorDescriptor};

/// Errors raised by the TCP client before a registry response is available.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket level failure
    #[error("registry connection failed: {0}")]
    Connection(#[from] std::io::Error),

    /// No response within the configured timeout
    #[error("registry call {command} timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Frame larger than the protocol allows
    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    /// Request could not be encoded
    #[error("failed to encode request: {0}")]
    Serialization(String),

    /// Response could not be decoded
    #[error("failed to decode response: {0}")]
    Deserialization(String),
}

impl From<ClientError> for ErrorDescriptor {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Deserialization(_) => {
                ErrorDescriptor::new(ErrorCode::ResponseSerialization, err.to_string())
            }
            other => ErrorDescriptor::transport(other.to_string()),
        }
    }
}

/// Errors raised while building client configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar { name: String, value: String },
}
