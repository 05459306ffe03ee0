//! Stale-tolerant mined nonce cache for the rate-setting identity
//!
//! A single live read is not trustworthy on the rate-setting path: a lagging
//! node can report a mined nonce below one we have already seen confirmed.
//! The cache refuses such regressions, but only for a bounded window; after
//! that the cached value itself is suspect (possible reorg) and the node's
//! lower value is adopted.

use std::sync::Arc;
use std::time::Duration;

use reserve_types::{Address, Timepoint};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{MinedNonceSource, Result};

/// How long a cached nonce may outrank a lower node reply
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
struct CachedNonce {
    nonce: u64,
    refreshed_at: Option<Timepoint>,
}

pub struct StaleTolerantNonce {
    source: Arc<dyn MinedNonceSource>,
    address: Address,
    staleness: Duration,
    cache: Mutex<CachedNonce>,
}

impl StaleTolerantNonce {
    pub fn new(source: Arc<dyn MinedNonceSource>, address: Address, staleness: Duration) -> Self {
        Self {
            source,
            address,
            staleness,
            cache: Mutex::new(CachedNonce::default()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn mined_nonce(&self) -> Result<u64> {
        self.mined_nonce_at(Timepoint::now()).await
    }

    pub async fn mined_nonce_at(&self, now: Timepoint) -> Result<u64> {
        let from_node = self.source.mined_nonce(&self.address).await?;
        let mut cache = self.cache.lock().await;

        if from_node >= cache.nonce {
            cache.nonce = from_node;
            cache.refreshed_at = Some(now);
            return Ok(from_node);
        }

        let unrefreshed_for = cache
            .refreshed_at
            .map(|at| now.since(at))
            .unwrap_or(Duration::MAX);
        if unrefreshed_for > self.staleness {
            warn!(
                address = %self.address,
                cached = cache.nonce,
                from_node,
                "cached mined nonce went stale, adopting lower node value"
            );
            cache.nonce = from_node;
            cache.refreshed_at = Some(now);
            return Ok(from_node);
        }

        warn!(
            address = %self.address,
            cached = cache.nonce,
            from_node,
            "node behind cached mined nonce, serving cache"
        );
        Ok(cache.nonce)
    }
}
