//! Engine tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-call timeout for balance fetches
    #[serde(default = "default_balance_timeout_ms")]
    pub balance_timeout_ms: u64,
    /// Per-call timeout for status queries
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Age after which an unresolved chain-side action is failed
    #[serde(default = "default_lost_expiry_secs")]
    pub lost_expiry_secs: u64,
    /// Age after which an unresolved venue-side action is failed
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_double_check_rounds")]
    pub double_check_rounds: usize,
    #[serde(default = "default_auth_tick_ms")]
    pub auth_tick_ms: u64,
    #[serde(default = "default_block_tick_ms")]
    pub block_tick_ms: u64,
}

impl EngineConfig {
    pub fn balance_timeout(&self) -> Duration {
        Duration::from_millis(self.balance_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn lost_expiry(&self) -> Duration {
        Duration::from_secs(self.lost_expiry_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn auth_tick(&self) -> Duration {
        Duration::from_millis(self.auth_tick_ms)
    }

    pub fn block_tick(&self) -> Duration {
        Duration::from_millis(self.block_tick_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            balance_timeout_ms: default_balance_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            lost_expiry_secs: default_lost_expiry_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            double_check_rounds: default_double_check_rounds(),
            auth_tick_ms: default_auth_tick_ms(),
            block_tick_ms: default_block_tick_ms(),
        }
    }
}

fn default_balance_timeout_ms() -> u64 {
    7_000
}

fn default_status_timeout_ms() -> u64 {
    5_000
}

fn default_lost_expiry_secs() -> u64 {
    15 * 60
}

fn default_max_lifetime_secs() -> u64 {
    6 * 60 * 60
}

fn default_double_check_rounds() -> usize {
    5
}

fn default_auth_tick_ms() -> u64 {
    7_000
}

fn default_block_tick_ms() -> u64 {
    5_000
}
