//! Reconciliation error types

use reserve_nonce::NonceError;
use reserve_storage::StorageError;
use reserve_types::VenueId;
use thiserror::Error;

/// Failure talking to one trading venue
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    #[error("Venue {venue} transport error: {message}")]
    Transport { venue: VenueId, message: String },

    #[error("Venue {venue} did not answer within {after_ms}ms")]
    Timeout { venue: VenueId, after_ms: u64 },

    #[error("Venue {venue} rejected the request: {message}")]
    Rejected { venue: VenueId, message: String },

    #[error("Venue {venue} returned a malformed reply: {message}")]
    Malformed { venue: VenueId, message: String },
}

/// Failure on the blockchain read path
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC error from {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("Chain call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Malformed chain reply: {0}")]
    Malformed(String),

    #[error("Mined nonce unavailable: {0}")]
    Nonce(#[from] NonceError),
}

/// Errors that abort a whole reconciliation cycle
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
