use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Pair and token metadata
/// - Hourly pair, token and total buckets
/// - The collection checkpoint
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Chain RPC and exchange contract configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Address of the V2 factory contract.
    pub factory_address: String,
    /// Symbol of the stablecoin every price is quoted against.
    #[serde(default = "default_reference_symbol")]
    pub reference_symbol: String,
    /// Maximum block span per log query.
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
    /// Blocks scanned on the very first run (no checkpoint yet).
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Annotate every swap with its transaction sender.
    #[serde(default = "default_resolve_tx_senders")]
    pub resolve_tx_senders: bool,
    /// Reference reserve below which a pair is too thin to price from.
    #[serde(default = "default_min_reference_liquidity")]
    pub min_reference_liquidity: u64,
}

fn default_reference_symbol() -> String {
    "USDC".to_string()
}

fn default_max_block_span() -> u64 {
    10_000
}

fn default_lookback_blocks() -> u64 {
    720 * 2 // ~2 hours of 5s blocks
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_resolve_tx_senders() -> bool {
    true
}

fn default_min_reference_liquidity() -> u64 {
    10
}

impl ChainSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Periodic collection job configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSettings {
    /// Seconds between collection ticks. Ticks inside an already collected
    /// hour are no-ops.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Read-through query cache configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_capacity")]
    pub max_capacity: u64,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_max_capacity() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_max_capacity(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `SWAPSTATS__SECTION__KEY`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chain: ChainSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("SWAPSTATS").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const MINIMAL: &str = r#"
postgres:
  host: localhost
  port: 5432
  user: stats
  password: secret
  database: stats
chain:
  rpc_url: http://localhost:8545
  factory_address: "0x0000000000000000000000000000000000000001"
"#;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(MINIMAL, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.postgres.pool_size, 16);
        assert_eq!(settings.chain.reference_symbol, "USDC");
        assert_eq!(settings.chain.max_block_span, 10_000);
        assert_eq!(settings.chain.lookback_blocks, 1_440);
        assert_eq!(settings.chain.retry_attempts, 5);
        assert_eq!(settings.chain.retry_backoff(), Duration::from_secs(2));
        assert!(settings.chain.resolve_tx_senders);
        assert_eq!(settings.collector.interval_secs, 300);
        assert_eq!(settings.cache.ttl(), Duration::from_secs(60));
    }
}
