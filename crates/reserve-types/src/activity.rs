//! Activity records and their status state machines
//!
//! An `ActivityRecord` is created when the operator submits an action and is
//! afterwards mutated only by reconciliation. Its two status axes advance
//! independently, so "pending" is a per-action predicate over the pair rather
//! than a single combined enum.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ActivityId, Result, Timepoint, TokenSymbol, TxHash, VenueId};

/// Operator-initiated action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deposit,
    Withdraw,
    Trade,
    SetRates,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Deposit => "deposit",
            Action::Withdraw => "withdraw",
            Action::Trade => "trade",
            Action::SetRates => "set_rates",
        };
        f.write_str(s)
    }
}

/// Venue-side status axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Nothing observed yet (serialized as the empty string)
    #[default]
    #[serde(rename = "")]
    Unset,
    Pending,
    Submitted,
    Done,
    Failed,
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Done | ExchangeStatus::Failed)
    }
}

/// Chain-side status axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningStatus {
    /// Nothing observed yet (serialized as the empty string)
    #[default]
    #[serde(rename = "")]
    Unset,
    Submitted,
    Mined,
    Failed,
    /// Provisional: the node does not know the tx. Resolved to `Failed` by
    /// the lost-transaction heuristic, or superseded once the tx is seen.
    Lost,
}

impl MiningStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MiningStatus::Mined | MiningStatus::Failed)
    }

    fn is_open(&self) -> bool {
        matches!(self, MiningStatus::Unset | MiningStatus::Submitted | MiningStatus::Lost)
    }
}

/// Side of a venue trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Typed snapshot of the submission input, one variant per action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityParams {
    Trade {
        base: TokenSymbol,
        quote: TokenSymbol,
        side: TradeSide,
        rate: Decimal,
        amount: Decimal,
    },
    Deposit {
        token: TokenSymbol,
        amount: Decimal,
    },
    Withdraw {
        token: TokenSymbol,
        amount: Decimal,
    },
    SetRates {
        tokens: Vec<TokenSymbol>,
        block: u64,
    },
}

impl ActivityParams {
    pub fn action(&self) -> Action {
        match self {
            ActivityParams::Trade { .. } => Action::Trade,
            ActivityParams::Deposit { .. } => Action::Deposit,
            ActivityParams::Withdraw { .. } => Action::Withdraw,
            ActivityParams::SetRates { .. } => Action::SetRates,
        }
    }
}

/// Output side of an activity, filled by the submit path and by reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityResult {
    /// On-chain transaction hash, as written by the submit path or a venue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Error returned at submission time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last venue-side polling error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    /// Last chain-side polling error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockchain_status_error: Option<String>,
}

impl ActivityResult {
    pub fn with_tx(tx: impl Into<String>) -> Self {
        Self {
            tx: Some(tx.into()),
            ..Default::default()
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Parsed tx hash. `Ok(None)` when no tx was recorded.
    pub fn tx_hash(&self) -> Result<Option<TxHash>> {
        match self.tx.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => TxHash::parse(raw).map(Some),
        }
    }

    fn has_tx(&self) -> bool {
        self.tx.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// One operator-submitted action and its evolving status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub action: Action,
    pub id: ActivityId,
    pub destination: VenueId,
    pub params: ActivityParams,
    pub result: ActivityResult,
    #[serde(default)]
    pub exchange_status: ExchangeStatus,
    #[serde(default)]
    pub mining_status: MiningStatus,
    pub timestamp: Timepoint,
}

impl ActivityRecord {
    /// Create a freshly submitted record with both status axes empty
    pub fn new(
        id: ActivityId,
        destination: VenueId,
        params: ActivityParams,
        result: ActivityResult,
    ) -> Self {
        let timestamp = id.timepoint;
        Self {
            action: params.action(),
            id,
            destination,
            params,
            result,
            exchange_status: ExchangeStatus::Unset,
            mining_status: MiningStatus::Unset,
            timestamp,
        }
    }

    /// Whether the venue side still needs polling
    pub fn is_exchange_pending(&self) -> bool {
        let ex = self.exchange_status;
        let mining_failed = self.mining_status == MiningStatus::Failed;
        match self.action {
            Action::Withdraw => {
                matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Submitted) && !mining_failed
            }
            Action::Deposit => {
                matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Pending) && !mining_failed
            }
            Action::Trade => matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Submitted),
            Action::SetRates => false,
        }
    }

    /// Whether the chain side still needs polling
    pub fn is_blockchain_pending(&self) -> bool {
        match self.action {
            Action::Withdraw | Action::Deposit | Action::SetRates => {
                self.mining_status.is_open() && self.exchange_status != ExchangeStatus::Failed
            }
            Action::Trade => false,
        }
    }

    /// Whether the record survives into the next snapshot's pending list
    pub fn is_pending(&self) -> bool {
        let ex = self.exchange_status;
        let mining = self.mining_status;
        let disqualified = ex == ExchangeStatus::Failed || mining == MiningStatus::Failed;
        if disqualified {
            return false;
        }
        match self.action {
            Action::Withdraw => {
                matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Submitted) || mining.is_open()
            }
            Action::Deposit => {
                matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Pending) || mining.is_open()
            }
            Action::Trade => matches!(ex, ExchangeStatus::Unset | ExchangeStatus::Submitted),
            Action::SetRates => mining.is_open(),
        }
    }

    /// Merge one cycle's venue-side and chain-side observations.
    ///
    /// Both pending guards are evaluated against the record as it was before
    /// the merge, and each side writes only its own axis, so the result does
    /// not depend on the order the two observations arrived in. Returns the
    /// carried error, if any, which invalidates the cycle's snapshot.
    pub fn merge_statuses(
        &mut self,
        exchange: Option<&ActivityStatus>,
        chain: Option<&ActivityStatus>,
    ) -> Option<String> {
        let exchange_open = self.is_exchange_pending();
        let chain_open = self.is_blockchain_pending();
        let mut carried = None;

        if let Some(status) = exchange {
            if !self.result.has_tx() {
                if let Some(tx) = status.tx.as_deref().filter(|t| !t.is_empty()) {
                    self.result.tx = Some(tx.to_string());
                }
            }
            if exchange_open || status.exchange_status == ExchangeStatus::Failed {
                self.exchange_status = status.exchange_status;
            }
            self.result.status_error = status.error.clone();
            if status.error.is_some() {
                carried = status.error.clone();
            }
        }

        if let Some(status) = chain {
            if chain_open {
                self.mining_status = status.mining_status;
                if status.block_number > 0 {
                    self.result.block_number = Some(status.block_number);
                }
            }
            if status.exchange_status == ExchangeStatus::Failed {
                self.exchange_status = ExchangeStatus::Failed;
            }
            self.result.blockchain_status_error = status.error.clone();
            if status.error.is_some() {
                carried = status.error.clone();
            }
        }

        carried
    }
}

/// Result of one status query; merged into a record, never stored standalone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub exchange_status: ExchangeStatus,
    pub tx: Option<String>,
    pub block_number: u64,
    pub mining_status: MiningStatus,
    pub error: Option<String>,
}

impl ActivityStatus {
    pub fn new(
        exchange_status: ExchangeStatus,
        tx: Option<String>,
        block_number: u64,
        mining_status: MiningStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            exchange_status,
            tx,
            block_number,
            mining_status,
            error,
        }
    }

    /// A venue-side observation that leaves the mining axis as recorded
    pub fn exchange(record: &ActivityRecord, status: ExchangeStatus, tx: Option<String>) -> Self {
        Self::new(status, tx, 0, record.mining_status, None)
    }

    /// A chain-side observation that leaves the exchange axis as recorded
    pub fn mining(record: &ActivityRecord, status: MiningStatus, block_number: u64) -> Self {
        Self::new(record.exchange_status, record.result.tx.clone(), block_number, status, None)
    }

    /// A failed poll: both axes stay as recorded, the error is carried
    pub fn errored(record: &ActivityRecord, error: impl Into<String>) -> Self {
        Self::new(
            record.exchange_status,
            record.result.tx.clone(),
            0,
            record.mining_status,
            Some(error.into()),
        )
    }
}
