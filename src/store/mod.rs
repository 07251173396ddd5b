//! Persistence boundary
//!
//! Tables written (see `/sql/` directory):
//! - `raw_events`, `raw_swaps`, `raw_transfers` - append-only, `INSERT OR IGNORE` on
//!   (tx_hash, log_index)
//! - `block_checkpoints` - monotonic upsert per contract
//! - `token_prices` - last successful quote per price-source id
//! - `analytics_*` - truncate-and-rewrite per analytics run
//!
//! Writers and readers depend on the narrow traits below; `sqlite::SqliteStore` implements all
//! of them over a single connection.

pub mod sqlite;

use crate::analytics::anomaly::AnomalyRecord;
use crate::analytics::protocol_health::ProtocolHealthSnapshot;
use crate::analytics::segmentation::WalletSegment;
use crate::analytics::token_flow::TokenFlowBucket;
use crate::indexer::types::{FlowDirection, PriceQuote, RawEvent, SwapEvent, TransferEvent};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub use sqlite::{run_schema_migrations, SqliteStore};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Which event tables analytics read from
///
/// Decided once when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSchema {
    /// `marts_fact_swaps` / `marts_fact_transfers`, materialized by the external transform job
    Curated,
    /// `raw_swaps` / `raw_transfers`
    Raw,
}

/// One swap as seen by the analytics jobs
#[derive(Debug, Clone, PartialEq)]
pub struct SwapActivity {
    pub wallet_address: String,
    pub token_in_address: String,
    pub amount_usd: Option<f64>,
    pub event_timestamp: DateTime<Utc>,
}

/// Summed token-in USD volume for one (hour, token)
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyVolume {
    pub hour_bucket: DateTime<Utc>,
    pub token_address: String,
    pub volume_usd: f64,
}

/// Swap totals for one (UTC day, wallet). Null USD is read as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyWalletVolume {
    pub date_bucket: NaiveDate,
    pub wallet_address: String,
    pub swap_count: usize,
    pub volume_usd: f64,
    /// Volume from swaps at or above the whale threshold
    pub whale_volume_usd: f64,
}

/// Continuous median of per-swap USD value for one UTC day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyMedian {
    pub date_bucket: NaiveDate,
    pub median_swap_usd: f64,
}

/// One transfer as seen by the token flow aggregator. Null USD is read as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFlow {
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub amount_usd: f64,
    pub direction: Option<FlowDirection>,
    pub event_timestamp: DateTime<Utc>,
}

/// Durable `contract -> last processed block`
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` means the contract was never indexed
    async fn get_checkpoint(&self, contract_address: &str) -> Result<Option<u64>, StoreError>;

    /// Never moves a checkpoint backwards
    async fn set_checkpoint(&self, contract_address: &str, last_block: u64) -> Result<(), StoreError>;
}

/// Append-only event sink. Returns the number of rows actually inserted (duplicates ignored).
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_raw_events(&self, events: &[RawEvent]) -> Result<usize, StoreError>;

    async fn insert_swaps(&self, swaps: &[SwapEvent]) -> Result<usize, StoreError>;

    async fn insert_transfers(&self, transfers: &[TransferEvent]) -> Result<usize, StoreError>;
}

/// Persisted price quotes
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn upsert_quote(&self, quote: &PriceQuote) -> Result<(), StoreError>;

    async fn load_quotes(&self) -> Result<Vec<PriceQuote>, StoreError>;
}

/// Read side of the analytics jobs
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    fn source_schema(&self) -> SourceSchema;

    async fn swap_activity(&self, since: DateTime<Utc>) -> Result<Vec<SwapActivity>, StoreError>;

    /// Ordered by token, then hour
    async fn hourly_token_volume(&self, since: DateTime<Utc>) -> Result<Vec<HourlyVolume>, StoreError>;

    async fn transfer_flows(&self, since: DateTime<Utc>) -> Result<Vec<TransferFlow>, StoreError>;

    /// Ordered by day, then wallet
    async fn daily_wallet_volume(&self) -> Result<Vec<DailyWalletVolume>, StoreError>;

    async fn daily_median_swap_size(&self) -> Result<Vec<DailyMedian>, StoreError>;
}

/// Write side of the analytics jobs. Each call replaces the whole table in one transaction.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn replace_anomalies(&self, rows: &[AnomalyRecord]) -> Result<(), StoreError>;

    async fn replace_wallet_segments(&self, rows: &[WalletSegment]) -> Result<(), StoreError>;

    async fn replace_token_flows(&self, rows: &[TokenFlowBucket]) -> Result<(), StoreError>;

    async fn replace_protocol_health(&self, rows: &[ProtocolHealthSnapshot]) -> Result<(), StoreError>;
}
