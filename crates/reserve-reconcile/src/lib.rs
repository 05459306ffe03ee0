//! Reserve Reconcile - closes the loop on submitted activities
//!
//! The engine polls every configured venue and the blockchain read path for
//! the status of pending activity records, merges both views into each
//! record's state machine, and stores one [`AuthDataSnapshot`] per cycle.
//!
//! Venues and the chain are reached only through the [`Venue`] and
//! [`ChainReader`] traits, so the engine runs unchanged against mocks.
//!
//! [`AuthDataSnapshot`]: reserve_types::AuthDataSnapshot

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod runner;
pub mod venue;

pub use chain::{ChainReader, TxInfo, TxStatus};
pub use config::EngineConfig;
pub use engine::{resolve_lost, CycleSummary, ReconciliationEngine};
pub use error::{ChainError, EngineError, EngineResult, VenueError};
pub use runner::{BlockCache, Runner};
pub use venue::{Venue, WithdrawStatus};
