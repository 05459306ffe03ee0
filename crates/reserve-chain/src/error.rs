//! Node client errors

use reserve_nonce::NonceError;
use reserve_reconcile::ChainError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} answered HTTP {status}")]
    Http { endpoint: String, status: u16 },

    #[error("{endpoint} returned JSON-RPC error {code}: {message}")]
    Rpc {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Malformed reply from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RpcError {
    pub fn endpoint(&self) -> &str {
        match self {
            RpcError::Transport { endpoint, .. }
            | RpcError::Http { endpoint, .. }
            | RpcError::Rpc { endpoint, .. }
            | RpcError::Malformed { endpoint, .. } => endpoint,
            RpcError::Config(_) => "",
        }
    }
}

impl From<RpcError> for NonceError {
    fn from(e: RpcError) -> Self {
        NonceError::Node {
            endpoint: e.endpoint().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<RpcError> for ChainError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Malformed { message, .. } => ChainError::Malformed(message),
            other => ChainError::Rpc {
                endpoint: other.endpoint().to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
