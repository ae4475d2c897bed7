//! Client error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use switchboard_protocol::{ProtocolError, ResponseCode};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing or encoding error on the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No response arrived for a call within the timeout.
    #[error("call {correlation_id} timed out after {}ms", timeout.as_millis())]
    CallTimedOut {
        correlation_id: u32,
        timeout: Duration,
    },

    /// The connection ended while a call was waiting.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting to the server failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server refused a request with an application-level code.
    #[error("{operation} rejected by server: {code}")]
    Rejected {
        operation: &'static str,
        code: ResponseCode,
    },

    /// The frame is not valid in this direction.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),
}

impl ClientError {
    /// Returns true for a call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimedOut { .. })
    }
}
