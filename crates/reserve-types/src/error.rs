//! Error types for the reserve domain types

use thiserror::Error;

/// Result type for type-level parsing and validation
pub type Result<T> = std::result::Result<T, TypesError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Activity ID is not of the form `<timepoint>|<eid>`
    #[error("Invalid activity id {raw}: {reason}")]
    InvalidActivityId { raw: String, reason: String },

    /// Transaction hash is not a 0x-prefixed 32-byte hex string
    #[error("Invalid tx hash {raw}: {reason}")]
    InvalidTxHash { raw: String, reason: String },
}
