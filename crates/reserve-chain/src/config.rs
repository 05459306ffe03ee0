//! Chain connection settings

use std::time::Duration;

use reserve_types::{Address, TokenSymbol};
use serde::{Deserialize, Serialize};

/// Where the rate-setting identity's mined nonce comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinedNonceMode {
    /// First configured node only
    #[default]
    Primary,
    /// Strict-plurality vote across every node
    Quorum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: TokenSymbol,
    /// Token contract; `None` for the native token
    #[serde(default)]
    pub contract: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Node endpoints; the first is the primary
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
    pub reserve_address: Address,
    pub rate_signer_address: Address,
    #[serde(default = "default_tokens")]
    pub tokens: Vec<TokenConfig>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub mined_nonce_mode: MinedNonceMode,
    /// How long a cached mined nonce may outrank a lower node reply
    #[serde(default = "default_staleness_secs")]
    pub nonce_staleness_secs: u64,
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.nonce_staleness_secs)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            reserve_address: Address::from("0x0000000000000000000000000000000000000000"),
            rate_signer_address: Address::from("0x0000000000000000000000000000000000000000"),
            tokens: default_tokens(),
            timeout_ms: default_timeout_ms(),
            mined_nonce_mode: MinedNonceMode::default(),
            nonce_staleness_secs: default_staleness_secs(),
        }
    }
}

fn default_nodes() -> Vec<String> {
    vec!["http://127.0.0.1:8545".to_string()]
}

fn default_tokens() -> Vec<TokenConfig> {
    vec![TokenConfig {
        symbol: TokenSymbol::from("ETH"),
        contract: None,
    }]
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_staleness_secs() -> u64 {
    15 * 60
}
