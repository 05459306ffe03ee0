//! Blockchain read path

use std::collections::BTreeMap;

use async_trait::async_trait;
use reserve_types::{BalanceEntry, TokenSymbol, TxHash};
use serde::{Deserialize, Serialize};

use crate::ChainError;

/// Where a transaction stands according to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Known to the node, not yet in a block
    Pending,
    Mined,
    /// Included in a block but reverted
    Failed,
    /// Unknown to the node
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxInfo {
    pub status: TxStatus,
    /// Zero unless the tx is in a block
    pub block_number: u64,
}

impl TxInfo {
    pub fn new(status: TxStatus, block_number: u64) -> Self {
        Self {
            status,
            block_number,
        }
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Reserve balances of every tracked token as of `at_block`
    async fn fetch_balances(
        &self,
        at_block: u64,
    ) -> Result<BTreeMap<TokenSymbol, BalanceEntry>, ChainError>;

    async fn tx_status(&self, tx: &TxHash) -> Result<TxInfo, ChainError>;

    async fn current_block(&self) -> Result<u64, ChainError>;

    /// Confirmed nonce of the rate-setting identity
    async fn set_rate_mined_nonce(&self) -> Result<u64, ChainError>;
}
