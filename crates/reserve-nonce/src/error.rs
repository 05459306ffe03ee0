//! Nonce error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NonceError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonceError {
    #[error("Node {endpoint} failed: {message}")]
    Node { endpoint: String, message: String },

    #[error("Node {endpoint} timed out after {after_ms}ms")]
    Timeout { endpoint: String, after_ms: u64 },

    #[error("All {attempted} nodes failed to report a mined nonce")]
    AllNodesFailed { attempted: usize },

    #[error("Cannot determine dominant nonce: {count} replies each for more than one value")]
    EqualCount { count: usize },

    #[error("Cannot determine dominant nonce: empty result")]
    EmptyResult,

    #[error("No node endpoints configured")]
    NoNodes,
}
