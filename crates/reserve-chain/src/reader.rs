//! `ChainReader` over JSON-RPC nodes

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reserve_nonce::{MinedNonceSource, NonceNode, PrimaryNode, QuorumResolver, StaleTolerantNonce};
use reserve_reconcile::{ChainError, ChainReader, TxInfo, TxStatus};
use reserve_types::{Address, BalanceEntry, Timepoint, TokenSymbol, TxHash};
use tracing::{info, warn};

use crate::client::{BlockTag, JsonRpcNode, RpcReceipt, RpcTransaction};
use crate::quantity::{self, NATIVE_DECIMALS};
use crate::{ChainConfig, MinedNonceMode, RpcError, RpcResult, TokenConfig};

/// Map a transaction lookup and its receipt to a status
pub fn classify(tx: Option<&RpcTransaction>, receipt: Option<&RpcReceipt>) -> Result<TxInfo, String> {
    let Some(tx) = tx else {
        return Ok(TxInfo::new(TxStatus::Lost, 0));
    };
    if tx.block_number.is_none() {
        return Ok(TxInfo::new(TxStatus::Pending, 0));
    }
    // in a block but the receipt is not indexed yet
    let Some(receipt) = receipt else {
        return Ok(TxInfo::new(TxStatus::Pending, 0));
    };

    let block = match receipt.block_number.as_deref().or(tx.block_number.as_deref()) {
        Some(raw) => quantity::parse_u64(raw)?,
        None => 0,
    };
    let succeeded = match receipt.status.as_deref() {
        Some(raw) => quantity::parse_u64(raw)? == 1,
        None => return Err(format!("receipt of {} has no status", tx.hash)),
    };
    let status = if succeeded { TxStatus::Mined } else { TxStatus::Failed };
    Ok(TxInfo::new(status, block))
}

pub struct RpcChainReader {
    primary: Arc<JsonRpcNode>,
    nodes: Vec<Arc<JsonRpcNode>>,
    reserve: Address,
    tokens: Vec<TokenConfig>,
    rate_nonce: StaleTolerantNonce,
}

impl RpcChainReader {
    pub fn connect(config: &ChainConfig) -> RpcResult<Self> {
        for address in [&config.reserve_address, &config.rate_signer_address] {
            quantity::validate_address(address).map_err(RpcError::Config)?;
        }
        let nodes = config
            .nodes
            .iter()
            .map(|url| JsonRpcNode::new(url.clone(), config.timeout()).map(Arc::new))
            .collect::<RpcResult<Vec<_>>>()?;
        let primary = nodes
            .first()
            .cloned()
            .ok_or_else(|| RpcError::Config("at least one node endpoint is required".to_string()))?;

        let source: Arc<dyn MinedNonceSource> = match config.mined_nonce_mode {
            MinedNonceMode::Primary => Arc::new(PrimaryNode::new(primary.clone(), config.timeout())),
            MinedNonceMode::Quorum => Arc::new(QuorumResolver::new(
                nodes.iter().map(|n| n.clone() as Arc<dyn NonceNode>).collect(),
                config.timeout(),
            )),
        };
        info!(
            primary = primary.endpoint(),
            nodes = nodes.len(),
            mode = ?config.mined_nonce_mode,
            "chain reader connected"
        );

        Ok(Self {
            rate_nonce: StaleTolerantNonce::new(source, config.rate_signer_address.clone(), config.staleness()),
            primary,
            nodes,
            reserve: config.reserve_address.clone(),
            tokens: config.tokens.clone(),
        })
    }

    pub fn primary(&self) -> Arc<JsonRpcNode> {
        self.primary.clone()
    }

    pub fn nodes(&self) -> &[Arc<JsonRpcNode>] {
        &self.nodes
    }

    async fn native_balance(&self, at_block: u64, requested: Timepoint) -> BalanceEntry {
        let tag = if at_block == 0 { BlockTag::Latest } else { BlockTag::Number(at_block) };
        let reply = self
            .primary
            .balance(&self.reserve, tag)
            .await
            .and_then(|wei| {
                quantity::to_token_amount(wei, NATIVE_DECIMALS).map_err(|message| RpcError::Malformed {
                    endpoint: self.primary.endpoint().to_string(),
                    message,
                })
            });
        match reply {
            Ok(balance) => BalanceEntry::ok(balance, requested, Timepoint::now()),
            Err(e) => {
                warn!(block = at_block, error = %e, "native balance fetch failed");
                BalanceEntry::failed(e.to_string(), requested, Timepoint::now())
            }
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn fetch_balances(&self, at_block: u64) -> Result<BTreeMap<TokenSymbol, BalanceEntry>, ChainError> {
        let requested = Timepoint::now();
        let mut balances = BTreeMap::new();
        for token in &self.tokens {
            let entry = match &token.contract {
                None => self.native_balance(at_block, requested).await,
                Some(contract) => BalanceEntry::failed(
                    format!("balance of token contract {} requires ABI calls, which this reader does not make", contract),
                    requested,
                    Timepoint::now(),
                ),
            };
            balances.insert(token.symbol.clone(), entry);
        }
        Ok(balances)
    }

    async fn tx_status(&self, tx: &TxHash) -> Result<TxInfo, ChainError> {
        let found = self.primary.transaction(tx.as_str()).await?;
        let receipt = match &found {
            Some(t) if t.block_number.is_some() => self.primary.receipt(tx.as_str()).await?,
            _ => None,
        };
        classify(found.as_ref(), receipt.as_ref()).map_err(ChainError::Malformed)
    }

    async fn current_block(&self) -> Result<u64, ChainError> {
        Ok(self.primary.block_number().await?)
    }

    async fn set_rate_mined_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.rate_nonce.mined_nonce().await?)
    }
}
