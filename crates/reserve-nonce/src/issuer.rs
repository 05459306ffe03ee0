//! Nonce issuing strategies
//!
//! Both strategies hold the locally cached "next nonce" behind one mutex and
//! keep it locked across the node round-trip, so concurrent callers always
//! receive strictly increasing values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reserve_types::{Address, Timepoint};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{NonceNode, Result};

/// Produces sequence numbers for one signing identity
#[async_trait]
pub trait NonceIssuer: Send + Sync {
    fn address(&self) -> &Address;

    /// Nonce to sign the next transaction with
    async fn next_nonce(&self) -> Result<u64>;

    /// Next nonce as of the latest confirmed block
    async fn mined_nonce(&self) -> Result<u64>;
}

/// Which issuing strategy to build from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceStrategy {
    #[default]
    AutoIncreasing,
    TimeWindow,
}

/// Issuer selection as read from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceConfig {
    #[serde(default)]
    pub strategy: NonceStrategy,
    /// Only used by the time-window strategy
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            strategy: NonceStrategy::default(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_window_ms() -> u64 {
    2_000
}

impl NonceConfig {
    pub fn build(&self, node: Arc<dyn NonceNode>, address: Address) -> Arc<dyn NonceIssuer> {
        match self.strategy {
            NonceStrategy::AutoIncreasing => Arc::new(AutoIncreasing::new(node, address)),
            NonceStrategy::TimeWindow => Arc::new(TimeWindow::new(
                node,
                address,
                Duration::from_millis(self.window_ms),
            )),
        }
    }
}

/// Adopt the node's pending nonce when it is ahead of the cache, otherwise
/// hand out the cached value. Returns the nonce to issue; `cached` becomes
/// the one after it.
fn issue_from(cached: &mut u64, node_nonce: u64) -> u64 {
    if node_nonce > *cached {
        *cached = node_nonce + 1;
        node_nonce
    } else {
        let next = *cached;
        *cached += 1;
        next
    }
}

/// Queries the node on every request
pub struct AutoIncreasing {
    node: Arc<dyn NonceNode>,
    address: Address,
    next: Mutex<u64>,
}

impl AutoIncreasing {
    pub fn new(node: Arc<dyn NonceNode>, address: Address) -> Self {
        Self {
            node,
            address,
            next: Mutex::new(0),
        }
    }
}

#[async_trait]
impl NonceIssuer for AutoIncreasing {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn next_nonce(&self) -> Result<u64> {
        let mut next = self.next.lock().await;
        let node_nonce = self.node.pending_nonce(&self.address).await?;
        let issued = issue_from(&mut next, node_nonce);
        debug!(address = %self.address, node_nonce, issued, "issued nonce");
        Ok(issued)
    }

    async fn mined_nonce(&self) -> Result<u64> {
        self.node.mined_nonce(&self.address).await
    }
}

#[derive(Debug, Default)]
struct WindowState {
    next: u64,
    last_request: Option<Timepoint>,
}

/// Skips the node round-trip when the previous request was within `window`.
///
/// A window larger than the network's propagation time may issue nonces the
/// node has not caught up to yet; that is the throughput trade-off this
/// strategy is configured for.
pub struct TimeWindow {
    node: Arc<dyn NonceNode>,
    address: Address,
    window: Duration,
    state: Mutex<WindowState>,
}

impl TimeWindow {
    pub fn new(node: Arc<dyn NonceNode>, address: Address, window: Duration) -> Self {
        Self {
            node,
            address,
            window,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub async fn next_nonce_at(&self, now: Timepoint) -> Result<u64> {
        let mut state = self.state.lock().await;
        let within_window = state
            .last_request
            .is_some_and(|last| now.since(last) < self.window);

        let issued = if within_window {
            let next = state.next;
            state.next += 1;
            next
        } else {
            let node_nonce = self.node.pending_nonce(&self.address).await?;
            issue_from(&mut state.next, node_nonce)
        };
        state.last_request = Some(now);
        debug!(address = %self.address, issued, within_window, "issued nonce");
        Ok(issued)
    }
}

#[async_trait]
impl NonceIssuer for TimeWindow {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn next_nonce(&self) -> Result<u64> {
        self.next_nonce_at(Timepoint::now()).await
    }

    async fn mined_nonce(&self) -> Result<u64> {
        self.node.mined_nonce(&self.address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NonceError;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Node whose pending nonce is set by the test
    struct ScriptedNode {
        name: String,
        pending: AtomicU64,
        mined: AtomicU64,
        calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedNode {
        fn new(pending: u64) -> Self {
            Self {
                name: "node-a".to_string(),
                pending: AtomicU64::new(pending),
                mined: AtomicU64::new(pending),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl NonceNode for ScriptedNode {
        fn endpoint(&self) -> &str {
            &self.name
        }

        async fn pending_nonce(&self, _address: &Address) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NonceError::Node {
                    endpoint: self.name.clone(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(self.pending.load(Ordering::SeqCst))
        }

        async fn mined_nonce(&self, _address: &Address) -> Result<u64> {
            Ok(self.mined.load(Ordering::SeqCst))
        }
    }

    fn addr() -> Address {
        Address::from("0x00000000000000000000000000000000000000aa")
    }

    #[tokio::test]
    async fn auto_increasing_adopts_node_when_ahead() {
        let node = Arc::new(ScriptedNode::new(5));
        let issuer = AutoIncreasing::new(node.clone(), addr());

        assert_eq!(issuer.next_nonce().await.unwrap(), 5);
        // node has not seen our tx yet, cache runs ahead
        assert_eq!(issuer.next_nonce().await.unwrap(), 6);
        assert_eq!(issuer.next_nonce().await.unwrap(), 7);

        node.pending.store(20, Ordering::SeqCst);
        assert_eq!(issuer.next_nonce().await.unwrap(), 20);
        assert_eq!(issuer.next_nonce().await.unwrap(), 21);
    }

    #[tokio::test]
    async fn auto_increasing_is_strictly_increasing_under_concurrency() {
        let node = Arc::new(ScriptedNode::new(3));
        let issuer = Arc::new(AutoIncreasing::new(node, addr()));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let issuer = issuer.clone();
                tokio::spawn(async move { issuer.next_nonce().await.unwrap() })
            })
            .collect();

        let mut issued = Vec::new();
        for h in handles {
            issued.push(h.await.unwrap());
        }
        issued.sort_unstable();
        let expected: Vec<u64> = (3..35).collect();
        assert_eq!(issued, expected);
    }

    #[tokio::test]
    async fn auto_increasing_propagates_node_errors() {
        let mut node = ScriptedNode::new(1);
        node.fail = true;
        let issuer = AutoIncreasing::new(Arc::new(node), addr());
        assert!(matches!(issuer.next_nonce().await, Err(NonceError::Node { .. })));
    }

    #[tokio::test]
    async fn time_window_skips_node_inside_window() {
        let node = Arc::new(ScriptedNode::new(10));
        let issuer = TimeWindow::new(node.clone(), addr(), Duration::from_millis(500));

        assert_eq!(issuer.next_nonce_at(Timepoint(1_000)).await.unwrap(), 10);
        assert_eq!(issuer.next_nonce_at(Timepoint(1_100)).await.unwrap(), 11);
        assert_eq!(issuer.next_nonce_at(Timepoint(1_200)).await.unwrap(), 12);
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);

        // window elapsed: node queried again, and it is ahead now
        node.pending.store(30, Ordering::SeqCst);
        assert_eq!(issuer.next_nonce_at(Timepoint(2_000)).await.unwrap(), 30);
        assert_eq!(node.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn config_builds_selected_strategy() {
        let node = Arc::new(ScriptedNode::new(4));
        let config = NonceConfig {
            strategy: NonceStrategy::TimeWindow,
            window_ms: 60_000,
        };
        let issuer = config.build(node.clone(), addr());
        assert_eq!(issuer.next_nonce().await.unwrap(), 4);
        assert_eq!(issuer.next_nonce().await.unwrap(), 5);
        // second request fell inside the window
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
        assert_eq!(issuer.address(), &addr());
    }

    #[tokio::test]
    async fn time_window_keeps_cache_when_node_lags() {
        let node = Arc::new(ScriptedNode::new(10));
        let issuer = TimeWindow::new(node.clone(), addr(), Duration::from_millis(100));

        assert_eq!(issuer.next_nonce_at(Timepoint(0)).await.unwrap(), 10);
        assert_eq!(issuer.next_nonce_at(Timepoint(50)).await.unwrap(), 11);
        // node still reports 10 after the window: the cache wins
        assert_eq!(issuer.next_nonce_at(Timepoint(500)).await.unwrap(), 12);
    }
}
