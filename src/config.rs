//! Pipeline configuration from environment variables
//!
//! Numeric settings fall back to their defaults when unset or unparsable. Contract and wallet
//! lists are validated; a malformed entry is a `ConfigError`.

use crate::indexer::coingecko::{KeyTier, DEFAULT_BASE_URL};
use crate::indexer::decoder::normalize_address;
use crate::indexer::orchestrator::IndexerSettings;
use crate::indexer::tokens::{TrackedContract, DEFAULT_POOLS, DEFAULT_TOKENS};
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://eth-mainnet.g.alchemy.com/v2/demo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: String, value: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "Invalid value for {}: {:?} ({})", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the indexer and analytics runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,
    /// Directory holding the `*.sql` migrations
    pub schema_dir: String,

    pub rpc_url: String,
    pub rpc_timeout_secs: u64,
    /// Provider cap on blocks per `eth_getLogs` call
    pub rpc_max_block_range: u64,

    pub block_chunk: u64,
    pub default_lookback: u64,
    pub insert_batch_size: usize,
    pub inter_contract_delay_ms: u64,
    pub min_transfer_usd: f64,

    pub coingecko_base_url: String,
    pub coingecko_api_key: Option<String>,
    pub coingecko_tier: Option<KeyTier>,

    pub contracts: Vec<TrackedContract>,
    pub tracked_wallets: HashSet<String>,

    pub indexer_interval_secs: u64,
    pub analytics_interval_secs: u64,
    pub anomaly_lookback_hours: i64,
    pub segment_window_days: i64,
    pub flow_window_hours: i64,
}

fn parse_or<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn non_empty(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn is_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn checked_address(key: &str, value: &str) -> Result<String, ConfigError> {
    let address = normalize_address(value);
    if is_address(&address) {
        Ok(address)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected 0x-prefixed 20-byte hex address".to_string(),
        })
    }
}

/// `pool:token0:token1,...`
fn parse_pools(value: &str) -> Result<Vec<TrackedContract>, ConfigError> {
    split_list(value)
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [pool, token0, token1] = parts.as_slice() else {
                return Err(ConfigError::InvalidValue {
                    key: "TRACKED_POOLS".to_string(),
                    value: entry.to_string(),
                    reason: "expected pool:token0:token1".to_string(),
                });
            };
            Ok(TrackedContract::pool(
                &checked_address("TRACKED_POOLS", pool)?,
                &checked_address("TRACKED_POOLS", token0)?,
                &checked_address("TRACKED_POOLS", token1)?,
            ))
        })
        .collect()
}

fn parse_addresses(key: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    split_list(value).map(|a| checked_address(key, a)).collect()
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CHAINPULSE_DB_PATH` (default: chainpulse.db)
    /// - `CHAINPULSE_SCHEMA_DIR` (default: sql)
    /// - `ETH_RPC_URL`, falling back to `ALCHEMY_API_URL` (default: Alchemy demo endpoint)
    /// - `RPC_TIMEOUT_SECS` (default: 30)
    /// - `RPC_MAX_BLOCK_RANGE` (default: 10)
    /// - `BLOCK_CHUNK` (default: 9)
    /// - `DEFAULT_LOOKBACK` (default: 200)
    /// - `INSERT_BATCH_SIZE` (default: 50)
    /// - `INTER_CONTRACT_DELAY_MS` (default: 200)
    /// - `MIN_TRANSFER_USD` (default: 1000)
    /// - `COINGECKO_BASE_URL`, `COINGECKO_API_KEY`, `COINGECKO_API_TIER` (demo|pro)
    /// - `TRACKED_POOLS` (`pool:token0:token1,...`), `TRACKED_TOKENS`, `TRACKED_WALLETS`
    /// - `INDEXER_INTERVAL_SECS` (default: 15)
    /// - `ANALYTICS_INTERVAL_SECS` (default: 3600)
    /// - `ANOMALY_LOOKBACK_HOURS` (default: 336)
    /// - `SEGMENT_WINDOW_DAYS` (default: 30)
    /// - `FLOW_WINDOW_HOURS` (default: 336)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let coingecko_tier = match non_empty(lookup, "COINGECKO_API_TIER") {
            Some(tier) => Some(KeyTier::parse(&tier).ok_or_else(|| ConfigError::InvalidValue {
                key: "COINGECKO_API_TIER".to_string(),
                value: tier.clone(),
                reason: "expected demo or pro".to_string(),
            })?),
            None => None,
        };

        let pools = match non_empty(lookup, "TRACKED_POOLS") {
            Some(value) => parse_pools(&value)?,
            None => DEFAULT_POOLS
                .iter()
                .map(|(pool, t0, t1)| TrackedContract::pool(pool, t0, t1))
                .collect(),
        };
        let tokens = match non_empty(lookup, "TRACKED_TOKENS") {
            Some(value) => parse_addresses("TRACKED_TOKENS", &value)?
                .iter()
                .map(|t| TrackedContract::token(t))
                .collect::<Vec<_>>(),
            None => DEFAULT_TOKENS.iter().map(|t| TrackedContract::token(t)).collect(),
        };
        let tracked_wallets = match non_empty(lookup, "TRACKED_WALLETS") {
            Some(value) => parse_addresses("TRACKED_WALLETS", &value)?.into_iter().collect(),
            None => HashSet::new(),
        };

        Ok(Self {
            db_path: non_empty(lookup, "CHAINPULSE_DB_PATH").unwrap_or_else(|| "chainpulse.db".to_string()),
            schema_dir: non_empty(lookup, "CHAINPULSE_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),

            rpc_url: non_empty(lookup, "ETH_RPC_URL")
                .or_else(|| non_empty(lookup, "ALCHEMY_API_URL"))
                .unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            rpc_timeout_secs: parse_or(lookup, "RPC_TIMEOUT_SECS", 30),
            rpc_max_block_range: parse_or(lookup, "RPC_MAX_BLOCK_RANGE", 10),

            block_chunk: parse_or(lookup, "BLOCK_CHUNK", 9),
            default_lookback: parse_or(lookup, "DEFAULT_LOOKBACK", 200),
            insert_batch_size: parse_or(lookup, "INSERT_BATCH_SIZE", 50),
            inter_contract_delay_ms: parse_or(lookup, "INTER_CONTRACT_DELAY_MS", 200),
            min_transfer_usd: parse_or(lookup, "MIN_TRANSFER_USD", 1_000.0),

            coingecko_base_url: non_empty(lookup, "COINGECKO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            coingecko_api_key: non_empty(lookup, "COINGECKO_API_KEY"),
            coingecko_tier,

            contracts: pools.into_iter().chain(tokens).collect(),
            tracked_wallets,

            indexer_interval_secs: parse_or(lookup, "INDEXER_INTERVAL_SECS", 15),
            analytics_interval_secs: parse_or(lookup, "ANALYTICS_INTERVAL_SECS", 3_600),
            anomaly_lookback_hours: parse_or(lookup, "ANOMALY_LOOKBACK_HOURS", 336),
            segment_window_days: parse_or(lookup, "SEGMENT_WINDOW_DAYS", 30),
            flow_window_hours: parse_or(lookup, "FLOW_WINDOW_HOURS", 336),
        })
    }

    pub fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            contracts: self.contracts.clone(),
            tracked_wallets: self.tracked_wallets.clone(),
            chunk_size: self.block_chunk,
            default_lookback: self.default_lookback,
            batch_size: self.insert_batch_size,
            inter_contract_delay: Duration::from_millis(self.inter_contract_delay_ms),
            min_transfer_usd: self.min_transfer_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PipelineConfig::from_lookup(&|key: &str| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no env vars set
        let config = config_from(&[]).unwrap();

        assert_eq!(config.db_path, "chainpulse.db");
        assert_eq!(config.schema_dir, "sql");
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.rpc_timeout_secs, 30);
        assert_eq!(config.block_chunk, 9);
        assert_eq!(config.default_lookback, 200);
        assert_eq!(config.insert_batch_size, 50);
        assert_eq!(config.indexer_interval_secs, 15);
        assert_eq!(config.analytics_interval_secs, 3_600);
        assert_eq!(config.contracts, TrackedContract::defaults());
        assert!(config.tracked_wallets.is_empty());
        assert_eq!(config.coingecko_tier, None);
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        let pool = "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8";
        let usdc = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
        let weth = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
        let pools = format!("{}:{}:{}", pool, usdc, weth);
        let wallets = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA, 0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

        let config = config_from(&[
            ("ALCHEMY_API_URL", "https://rpc.example"),
            ("BLOCK_CHUNK", "5"),
            ("INSERT_BATCH_SIZE", "not-a-number"),
            ("COINGECKO_API_TIER", "Pro"),
            ("TRACKED_POOLS", pools.as_str()),
            ("TRACKED_TOKENS", usdc),
            ("TRACKED_WALLETS", wallets),
        ])
        .unwrap();

        assert_eq!(config.rpc_url, "https://rpc.example");
        assert_eq!(config.block_chunk, 5);
        assert_eq!(config.insert_batch_size, 50);
        assert_eq!(config.coingecko_tier, Some(KeyTier::Pro));
        assert_eq!(
            config.contracts,
            vec![TrackedContract::pool(pool, usdc, weth), TrackedContract::token(usdc)]
        );
        assert!(config.tracked_wallets.contains("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
        assert_eq!(config.tracked_wallets.len(), 2);

        let settings = config.indexer_settings();
        assert_eq!(settings.chunk_size, 5);
        assert_eq!(settings.inter_contract_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_eth_rpc_url_takes_precedence() {
        let config = config_from(&[("ETH_RPC_URL", "https://a"), ("ALCHEMY_API_URL", "https://b")]).unwrap();
        assert_eq!(config.rpc_url, "https://a");
    }

    #[test]
    fn test_invalid_lists_rejected() {
        assert!(matches!(
            config_from(&[("TRACKED_POOLS", "0xabc:0xdef")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config_from(&[("TRACKED_WALLETS", "not-an-address")]).is_err());
        assert!(config_from(&[("COINGECKO_API_TIER", "enterprise")]).is_err());
    }
}
