use std::time::Duration;
use thiserror::Error;

/// Error code the server uses for missing entities.
pub const NOT_FOUND_CODE: i64 = 404;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("invalid server endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to connect to server: {0}")]
    Connection(String),
    #[error("connection to server closed")]
    ConnectionClosed,
    #[error("connection to server lost before a response arrived")]
    Disconnected,
    #[error("call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RpcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::Server { code, .. } if *code == NOT_FOUND_CODE)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
