//! Daemon configuration
//!
//! Sources, later ones winning: an optional file named on the command line,
//! `config/default`, `config/local`, then `RESERVE__SECTION__KEY`
//! environment variables. A `.env` file is loaded first if present.

use reserve_chain::ChainConfig;
use reserve_nonce::NonceConfig;
use reserve_reconcile::EngineConfig;
use reserve_storage::StorageConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveConfig {
    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub nonce: NonceConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ReserveConfig {
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("RESERVE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("chain.nodes"),
            );

        Self::from_builder(builder)
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> anyhow::Result<Self> {
        let config: ReserveConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chain.nodes.is_empty() {
            anyhow::bail!("chain.nodes must list at least one node endpoint");
        }
        if self.engine.double_check_rounds == 0 {
            anyhow::bail!("engine.double_check_rounds must be at least 1");
        }
        if self.engine.auth_tick_ms == 0 || self.engine.block_tick_ms == 0 {
            anyhow::bail!("engine tick periods must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};
    use reserve_chain::MinedNonceMode;
    use reserve_nonce::NonceStrategy;
    use reserve_storage::StorageBackend;

    fn parse(toml: &str) -> anyhow::Result<ReserveConfig> {
        ReserveConfig::from_builder(config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.engine.lost_expiry_secs, 15 * 60);
        assert_eq!(config.engine.max_lifetime_secs, 6 * 60 * 60);
        assert_eq!(config.engine.balance_timeout_ms, 7_000);
        assert_eq!(config.chain.mined_nonce_mode, MinedNonceMode::Primary);
        assert_eq!(config.nonce.strategy, NonceStrategy::AutoIncreasing);
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
            [chain]
            nodes = ["http://node-a:8545", "http://node-b:8545"]
            reserve_address = "0x63825c174ab367968ec60f061753d3bbd36a0d8f"
            rate_signer_address = "0x2c2d14e4c8ae9de1ee9a9a9b6a1f3e8e3f8a0b11"
            mined_nonce_mode = "quorum"

            [[chain.tokens]]
            symbol = "ETH"

            [[chain.tokens]]
            symbol = "KNC"
            contract = "0xdd974d5c2e2928dea5f71b9825b8b646686bd200"

            [nonce]
            strategy = "time_window"
            window_ms = 500

            [engine]
            lost_expiry_secs = 600

            [storage]
            backend = "memory"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.nodes.len(), 2);
        assert_eq!(config.chain.mined_nonce_mode, MinedNonceMode::Quorum);
        assert_eq!(config.chain.tokens.len(), 2);
        assert!(config.chain.tokens[1].contract.is_some());
        assert_eq!(config.nonce.strategy, NonceStrategy::TimeWindow);
        assert_eq!(config.nonce.window_ms, 500);
        assert_eq!(config.engine.lost_expiry_secs, 600);
        assert_eq!(config.engine.status_timeout_ms, 5_000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn zero_double_check_rounds_is_rejected() {
        let err = parse("[engine]\ndouble_check_rounds = 0\n").unwrap_err();
        assert!(err.to_string().contains("double_check_rounds"));
    }
}
