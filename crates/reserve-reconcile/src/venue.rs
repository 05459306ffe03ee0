//! Trading venue read path

use async_trait::async_trait;
use reserve_types::{ActivityId, EBalanceEntry, ExchangeStatus, Timepoint, TokenSymbol, VenueId};
use rust_decimal::Decimal;

use crate::VenueError;

/// What a venue reports about one withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawStatus {
    pub status: ExchangeStatus,
    /// On-chain tx hash, once the venue has broadcast it
    pub tx: Option<String>,
}

/// Read-only client for one centralized venue.
///
/// Signing and request formats live in the implementation. Every call is
/// independently cancelable; the engine wraps each in its own timeout.
#[async_trait]
pub trait Venue: Send + Sync {
    fn id(&self) -> &VenueId;

    async fn fetch_balances(&self, timepoint: Timepoint) -> Result<EBalanceEntry, VenueError>;

    async fn order_status(
        &self,
        order_id: &str,
        base: &TokenSymbol,
        quote: &TokenSymbol,
    ) -> Result<ExchangeStatus, VenueError>;

    async fn deposit_status(
        &self,
        id: &ActivityId,
        tx: &str,
        token: &TokenSymbol,
        amount: Decimal,
        timepoint: Timepoint,
    ) -> Result<ExchangeStatus, VenueError>;

    async fn withdraw_status(
        &self,
        id: &ActivityId,
        token: &TokenSymbol,
        amount: Decimal,
        timepoint: Timepoint,
    ) -> Result<WithdrawStatus, VenueError>;
}
