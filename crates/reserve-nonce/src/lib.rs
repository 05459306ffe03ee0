//! Reserve Nonce - transaction sequence numbers for signing identities
//!
//! # Components
//!
//! - [`NonceIssuer`]: "next nonce" / "mined nonce" for one signing identity,
//!   with two strategies: [`AutoIncreasing`] and [`TimeWindow`].
//! - [`QuorumResolver`]: asks every node endpoint for the mined nonce in
//!   parallel and returns the strict-plurality value.
//! - [`StaleTolerantNonce`]: cached mined nonce for the rate-setting identity
//!   that refuses to regress on node lag, but heals after a staleness window.
//!
//! Every cached counter is an owned value behind one exclusive lock; there
//! are no process-wide singletons.

pub mod error;
pub mod issuer;
pub mod quorum;
pub mod stale;

pub use error::{NonceError, Result};
pub use issuer::{AutoIncreasing, NonceConfig, NonceIssuer, NonceStrategy, TimeWindow};
pub use quorum::{dominant_nonce, PrimaryNode, QuorumResolver};
pub use stale::{StaleTolerantNonce, DEFAULT_STALENESS};

use async_trait::async_trait;
use reserve_types::Address;

/// One blockchain node endpoint able to report account nonces
#[async_trait]
pub trait NonceNode: Send + Sync {
    /// Endpoint label used in logs and errors
    fn endpoint(&self) -> &str;

    /// Next nonce including mempool transactions
    async fn pending_nonce(&self, address: &Address) -> Result<u64>;

    /// Next nonce as of the latest confirmed block
    async fn mined_nonce(&self, address: &Address) -> Result<u64>;
}

/// Anything that can produce an authoritative mined nonce for an address
#[async_trait]
pub trait MinedNonceSource: Send + Sync {
    async fn mined_nonce(&self, address: &Address) -> Result<u64>;
}
