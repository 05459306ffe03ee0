//! Reserve Types - Canonical domain types for the reserve reconciliation core
//!
//! This crate has zero dependencies on other reserve crates. It defines:
//!
//! - Identity types (`ActivityId`, `VenueId`, `TokenSymbol`, `TxHash`) and `Timepoint`
//! - The activity record with its two independent status axes
//! - The pending predicates that decide which records are re-polled
//! - Balance entries and the per-cycle `AuthDataSnapshot`
//!
//! # Status axes
//!
//! ```text
//! ExchangeStatus:  "" / pending / submitted  ->  done | failed
//! MiningStatus:    "" / submitted            ->  mined | failed   (lost is provisional)
//! ```

pub mod identity;
pub mod activity;
pub mod balance;
pub mod error;

pub use identity::*;
pub use activity::*;
pub use balance::*;
pub use error::*;

/// Version of the reserve types schema
pub const TYPES_VERSION: &str = "0.1.0";
