//! Polling loops driving the engine
//!
//! Two independent loops: the block loop keeps the current block number
//! fresh, the auth loop runs one reconciliation cycle per tick at that
//! block. Ticks may be skipped or arrive late; each cycle stands alone.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{ChainError, ChainReader, ReconciliationEngine};

/// Latest block number seen by the block loop
#[derive(Debug, Default)]
pub struct BlockCache {
    block: RwLock<u64>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        *self.block.read()
    }

    /// Store `block` unless a higher one is already cached
    pub fn observe(&self, block: u64) -> u64 {
        let mut current = self.block.write();
        if block > *current {
            *current = block;
        }
        *current
    }
}

pub struct Runner {
    engine: Arc<ReconciliationEngine>,
    chain: Arc<dyn ChainReader>,
    blocks: Arc<BlockCache>,
}

impl Runner {
    pub fn new(engine: Arc<ReconciliationEngine>, chain: Arc<dyn ChainReader>) -> Self {
        Self {
            engine,
            chain,
            blocks: Arc::new(BlockCache::new()),
        }
    }

    pub fn blocks(&self) -> &Arc<BlockCache> {
        &self.blocks
    }

    /// Fetch the current block once and cache it
    pub async fn refresh_block(&self) -> Result<u64, ChainError> {
        refresh_block(self.chain.as_ref(), &self.blocks).await
    }

    /// Spawn both loops; they stop when `shutdown` flips to true
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let config = self.engine.config();
        let block_tick = config.block_tick();
        let auth_tick = config.auth_tick();

        let block_loop = {
            let chain = self.chain.clone();
            let blocks = self.blocks.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut interval = ticker(block_tick);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            if let Err(e) = refresh_block(chain.as_ref(), &blocks).await {
                                warn!(error = %e, "current block refresh failed");
                            }
                        }
                    }
                }
                debug!("block loop stopped");
            })
        };

        let auth_loop = {
            let engine = self.engine.clone();
            let blocks = self.blocks.clone();
            let mut shutdown = shutdown;
            tokio::spawn(async move {
                let mut interval = ticker(auth_tick);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = interval.tick() => {
                            // a started cycle runs to completion
                            if let Err(e) = engine.run_cycle(blocks.get()).await {
                                error!(error = %e, "reconciliation cycle aborted");
                            }
                        }
                    }
                }
                debug!("auth loop stopped");
            })
        };

        info!(
            block_tick_ms = block_tick.as_millis() as u64,
            auth_tick_ms = auth_tick.as_millis() as u64,
            "polling loops started"
        );
        vec![block_loop, auth_loop]
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn refresh_block(chain: &dyn ChainReader, blocks: &BlockCache) -> Result<u64, ChainError> {
    let block = chain.current_block().await?;
    let cached = blocks.observe(block);
    debug!(block, cached, "current block refreshed");
    Ok(cached)
}
