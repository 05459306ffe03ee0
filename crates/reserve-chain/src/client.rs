//! JSON-RPC client for one node endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reserve_nonce::NonceNode;
use reserve_types::Address;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::quantity;
use crate::{RpcError, RpcResult};

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// The fields of `eth_getTransactionByHash` the tx status lookup needs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    #[serde(default)]
    pub block_number: Option<String>,
    /// `0x1` success, `0x0` reverted
    #[serde(default)]
    pub status: Option<String>,
}

/// Block tag or number for state queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
    Number(u64),
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            BlockTag::Latest => json!("latest"),
            BlockTag::Pending => json!("pending"),
            BlockTag::Number(n) => json!(quantity::encode(n)),
        }
    }
}

pub struct JsonRpcNode {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcNode {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> RpcResult<Self> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Config(format!("HTTP client for {}: {}", endpoint, e)))?;
        Ok(Self {
            endpoint,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One JSON-RPC call. `Ok(None)` when the node answers `null`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(endpoint = %self.endpoint, method, id, "rpc call");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(RpcError::Http {
                endpoint: self.endpoint.clone(),
                status: resp.status().as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| RpcError::Transport {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })?;
        decode_response(&self.endpoint, &bytes)
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        self.call(method, params).await?.ok_or_else(|| RpcError::Malformed {
            endpoint: self.endpoint.clone(),
            message: format!("{} returned null", method),
        })
    }

    fn quantity(&self, raw: &str) -> RpcResult<u64> {
        quantity::parse_u64(raw).map_err(|message| RpcError::Malformed {
            endpoint: self.endpoint.clone(),
            message,
        })
    }

    pub async fn transaction_count(&self, address: &Address, tag: BlockTag) -> RpcResult<u64> {
        let raw: String = self
            .call_required("eth_getTransactionCount", json!([address.as_str(), tag.to_param()]))
            .await?;
        self.quantity(&raw)
    }

    pub async fn block_number(&self) -> RpcResult<u64> {
        let raw: String = self.call_required("eth_blockNumber", json!([])).await?;
        self.quantity(&raw)
    }

    /// Native balance in the smallest unit
    pub async fn balance(&self, address: &Address, tag: BlockTag) -> RpcResult<u128> {
        let raw: String = self
            .call_required("eth_getBalance", json!([address.as_str(), tag.to_param()]))
            .await?;
        quantity::parse_u128(&raw).map_err(|message| RpcError::Malformed {
            endpoint: self.endpoint.clone(),
            message,
        })
    }

    pub async fn transaction(&self, hash: &str) -> RpcResult<Option<RpcTransaction>> {
        self.call("eth_getTransactionByHash", json!([hash])).await
    }

    pub async fn receipt(&self, hash: &str) -> RpcResult<Option<RpcReceipt>> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }
}

fn decode_response<T: DeserializeOwned>(endpoint: &str, bytes: &[u8]) -> RpcResult<Option<T>> {
    let reply: RpcResponse<T> = serde_json::from_slice(bytes).map_err(|e| RpcError::Malformed {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;
    if let Some(err) = reply.error {
        return Err(RpcError::Rpc {
            endpoint: endpoint.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    Ok(reply.result)
}

#[async_trait]
impl NonceNode for JsonRpcNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn pending_nonce(&self, address: &Address) -> reserve_nonce::Result<u64> {
        Ok(self.transaction_count(address, BlockTag::Pending).await?)
    }

    async fn mined_nonce(&self, address: &Address) -> reserve_nonce::Result<u64> {
        Ok(self.transaction_count(address, BlockTag::Latest).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_result() {
        let n: Option<String> = decode_response("node", br#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert_eq!(n.as_deref(), Some("0x10"));
    }

    #[test]
    fn null_result_is_none() {
        let tx: Option<RpcTransaction> =
            decode_response("node", br#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(tx.is_none());
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let err = decode_response::<String>(
            "node",
            br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            RpcError::Rpc {
                endpoint: "node".to_string(),
                code: -32000,
                message: "header not found".to_string(),
            }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode_response::<String>("node", b"<html>"),
            Err(RpcError::Malformed { .. })
        ));
    }

    #[test]
    fn decodes_pending_transaction() {
        let tx: Option<RpcTransaction> = decode_response(
            "node",
            br#"{"jsonrpc":"2.0","id":1,"result":{"hash":"0xab","blockNumber":null,"nonce":"0x1"}}"#,
        )
        .unwrap();
        let tx = tx.unwrap();
        assert_eq!(tx.hash, "0xab");
        assert!(tx.block_number.is_none());
    }

    #[test]
    fn block_tags_encode_as_params() {
        assert_eq!(BlockTag::Latest.to_param(), json!("latest"));
        assert_eq!(BlockTag::Pending.to_param(), json!("pending"));
        assert_eq!(BlockTag::Number(255).to_param(), json!("0xff"));
    }
}
