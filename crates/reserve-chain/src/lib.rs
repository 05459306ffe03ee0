//! Reserve Chain - blockchain node access over JSON-RPC
//!
//! [`JsonRpcNode`] speaks to one endpoint and serves as a
//! [`reserve_nonce::NonceNode`]. [`RpcChainReader`] builds on a set of nodes
//! to implement the reconciliation engine's [`reserve_reconcile::ChainReader`],
//! with the rate-setting mined nonce behind a stale-tolerant cache.

pub mod client;
pub mod config;
pub mod error;
pub mod quantity;
pub mod reader;

pub use client::{BlockTag, JsonRpcNode, RpcReceipt, RpcTransaction};
pub use config::{ChainConfig, MinedNonceMode, TokenConfig};
pub use error::{RpcError, RpcResult};
pub use reader::{classify, RpcChainReader};
