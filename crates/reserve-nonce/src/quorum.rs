//! Mined-nonce quorum voting across node endpoints
//!
//! Nodes may lag or disagree. The resolver asks every endpoint concurrently,
//! each call under its own timeout, and accepts only a value that strictly
//! more nodes agree on than any other. Ties are surfaced, never broken.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reserve_types::Address;
use tracing::{debug, warn};

use crate::{MinedNonceSource, NonceError, NonceNode, Result};

/// Pick the strictly most frequent nonce from a frequency table
pub fn dominant_nonce(counts: &HashMap<u64, usize>) -> Result<u64> {
    let max = counts.values().copied().max().ok_or(NonceError::EmptyResult)?;
    let mut winners = counts.iter().filter(|(_, c)| **c == max).map(|(n, _)| *n);
    match (winners.next(), winners.next()) {
        (Some(nonce), None) => Ok(nonce),
        (Some(_), Some(_)) => Err(NonceError::EqualCount { count: max }),
        (None, _) => Err(NonceError::EmptyResult),
    }
}

async fn mined_nonce_with_timeout(
    node: &dyn NonceNode,
    address: &Address,
    timeout: Duration,
) -> Result<u64> {
    match tokio::time::timeout(timeout, node.mined_nonce(address)).await {
        Ok(reply) => reply,
        Err(_) => Err(NonceError::Timeout {
            endpoint: node.endpoint().to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Strict-plurality vote over every configured node
pub struct QuorumResolver {
    nodes: Vec<Arc<dyn NonceNode>>,
    timeout: Duration,
}

impl QuorumResolver {
    pub fn new(nodes: Vec<Arc<dyn NonceNode>>, timeout: Duration) -> Self {
        Self { nodes, timeout }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[async_trait]
impl MinedNonceSource for QuorumResolver {
    async fn mined_nonce(&self, address: &Address) -> Result<u64> {
        if self.nodes.is_empty() {
            return Err(NonceError::NoNodes);
        }

        // one slot per node, each written only by its own future
        let replies = join_all(
            self.nodes
                .iter()
                .map(|node| mined_nonce_with_timeout(node.as_ref(), address, self.timeout)),
        )
        .await;

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for (node, reply) in self.nodes.iter().zip(replies) {
            match reply {
                Ok(nonce) => {
                    debug!(endpoint = node.endpoint(), nonce, "mined nonce reply");
                    *counts.entry(nonce).or_default() += 1;
                }
                Err(e) => warn!(endpoint = node.endpoint(), error = %e, "mined nonce query failed"),
            }
        }

        if counts.is_empty() {
            return Err(NonceError::AllNodesFailed {
                attempted: self.nodes.len(),
            });
        }
        dominant_nonce(&counts)
    }
}

/// Single configured node, for latency-sensitive paths that cannot wait on
/// a full quorum
pub struct PrimaryNode {
    node: Arc<dyn NonceNode>,
    timeout: Duration,
}

impl PrimaryNode {
    pub fn new(node: Arc<dyn NonceNode>, timeout: Duration) -> Self {
        Self { node, timeout }
    }
}

#[async_trait]
impl MinedNonceSource for PrimaryNode {
    async fn mined_nonce(&self, address: &Address) -> Result<u64> {
        mined_nonce_with_timeout(self.node.as_ref(), address, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u64, usize)]) -> HashMap<u64, usize> {
        entries.iter().copied().collect()
    }

    #[test]
    fn strict_maximum_wins() {
        assert_eq!(dominant_nonce(&table(&[(1, 3), (2, 1), (3, 1)])), Ok(1));
        assert_eq!(dominant_nonce(&table(&[(7, 1)])), Ok(7));
    }

    #[test]
    fn tie_at_maximum_is_an_error() {
        assert_eq!(
            dominant_nonce(&table(&[(1, 2), (2, 2), (3, 1)])),
            Err(NonceError::EqualCount { count: 2 })
        );
    }

    #[test]
    fn empty_table_is_an_error() {
        assert_eq!(dominant_nonce(&HashMap::new()), Err(NonceError::EmptyResult));
    }

    enum Reply {
        Nonce(u64),
        Fail,
        Hang,
    }

    struct FixedNode {
        name: String,
        reply: Reply,
    }

    #[async_trait]
    impl NonceNode for FixedNode {
        fn endpoint(&self) -> &str {
            &self.name
        }

        async fn pending_nonce(&self, address: &Address) -> Result<u64> {
            self.mined_nonce(address).await
        }

        async fn mined_nonce(&self, _address: &Address) -> Result<u64> {
            match self.reply {
                Reply::Nonce(n) => Ok(n),
                Reply::Fail => Err(NonceError::Node {
                    endpoint: self.name.clone(),
                    message: "503".to_string(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(0)
                }
            }
        }
    }

    fn resolver(replies: Vec<Reply>) -> QuorumResolver {
        let nodes = replies
            .into_iter()
            .enumerate()
            .map(|(i, reply)| {
                Arc::new(FixedNode {
                    name: format!("node-{}", i),
                    reply,
                }) as Arc<dyn NonceNode>
            })
            .collect();
        QuorumResolver::new(nodes, Duration::from_millis(50))
    }

    fn addr() -> Address {
        Address::from("0x00000000000000000000000000000000000000bb")
    }

    #[tokio::test]
    async fn majority_of_replies_decides() {
        let r = resolver(vec![Reply::Nonce(9), Reply::Nonce(9), Reply::Nonce(8), Reply::Fail]);
        assert_eq!(r.mined_nonce(&addr()).await, Ok(9));
    }

    #[tokio::test]
    async fn hung_node_drops_out_of_the_vote() {
        let r = resolver(vec![Reply::Nonce(4), Reply::Hang, Reply::Nonce(4)]);
        assert_eq!(r.mined_nonce(&addr()).await, Ok(4));
    }

    #[tokio::test]
    async fn disagreement_is_surfaced() {
        let r = resolver(vec![Reply::Nonce(4), Reply::Nonce(5)]);
        assert_eq!(r.mined_nonce(&addr()).await, Err(NonceError::EqualCount { count: 1 }));
    }

    #[tokio::test]
    async fn all_nodes_failing_is_an_error() {
        let r = resolver(vec![Reply::Fail, Reply::Hang]);
        assert_eq!(
            r.mined_nonce(&addr()).await,
            Err(NonceError::AllNodesFailed { attempted: 2 })
        );
    }

    #[tokio::test]
    async fn primary_node_times_out() {
        let node = Arc::new(FixedNode {
            name: "primary".to_string(),
            reply: Reply::Hang,
        });
        let primary = PrimaryNode::new(node, Duration::from_millis(20));
        assert!(matches!(
            primary.mined_nonce(&addr()).await,
            Err(NonceError::Timeout { .. })
        ));
    }
}
