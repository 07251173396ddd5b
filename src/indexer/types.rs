//! Core data structures for the ingestion pipeline
//!
//! Raw chain input (`RawLog`, `BlockTime`, `TxHashRepr`, `ArgValue`) is produced by the
//! chain client; typed records (`SwapEvent`, `TransferEvent`, `RawEvent`) are produced by the
//! decoder and persisted by the event store.

use super::abi;
use alloy_primitives::{B256, I256, U256};
use alloy_sol_types::SolEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event shapes supported by the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Uniswap V3 pool `Swap(address,address,int256,int256,uint160,uint128,int24)`
    Swap,
    /// ERC-20 `Transfer(address,address,uint256)`
    Transfer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Swap => "Swap",
            EventKind::Transfer => "Transfer",
        }
    }

    /// keccak256 of the canonical event signature (log topic 0)
    pub fn topic0(&self) -> B256 {
        match self {
            EventKind::Swap => abi::Swap::SIGNATURE_HASH,
            EventKind::Transfer => abi::Transfer::SIGNATURE_HASH,
        }
    }
}

/// Block time as delivered by the chain client
///
/// The variant is decided at the client boundary; downstream code never probes the shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockTime {
    Structured(DateTime<Utc>),
    UnixSeconds(i64),
}

impl BlockTime {
    /// Resolve to a UTC timestamp. Out-of-range unix seconds yield `None`.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match *self {
            BlockTime::Structured(ts) => Some(ts),
            BlockTime::UnixSeconds(secs) => DateTime::from_timestamp(secs, 0),
        }
    }
}

/// Transaction hash in whatever encoding the client received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxHashRepr {
    Bytes([u8; 32]),
    Hex(String),
}

/// A single decoded ABI argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Lowercase `0x`-prefixed 20-byte address
    Address(String),
    /// Any signed ABI integer, widened to 256 bits
    Int(I256),
    /// Any unsigned ABI integer, widened to 256 bits
    Uint(U256),
}

impl ArgValue {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            ArgValue::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<I256> {
        match *self {
            ArgValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match *self {
            ArgValue::Uint(v) => Some(v),
            _ => None,
        }
    }

    /// Lossless textual form used for pool-state fields (integers in decimal)
    pub fn to_text(&self) -> String {
        match self {
            ArgValue::Address(a) => a.clone(),
            ArgValue::Int(v) => v.to_string(),
            ArgValue::Uint(v) => v.to_string(),
        }
    }
}

/// Named event arguments, keyed by ABI parameter name
pub type EventArgs = BTreeMap<String, ArgValue>;

/// A log as returned by the chain client
#[derive(Debug, Clone)]
pub struct RawLog {
    pub block_number: u64,
    pub tx_hash: TxHashRepr,
    pub log_index: u32,
    pub address: String,
    pub args: EventArgs,
}

/// Swap size tier by USD value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Whale,
    Large,
    Standard,
}

impl SizeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Whale => "whale",
            SizeTier::Large => "large",
            SizeTier::Standard => "standard",
        }
    }
}

/// Transfer direction relative to the wallet watch-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    In,
    Out,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::In => "in",
            FlowDirection::Out => "out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in" => Some(FlowDirection::In),
            "out" => Some(FlowDirection::Out),
            _ => None,
        }
    }
}

/// Decoded pool swap
///
/// SQL reference: `sql/02_raw_swaps.sql`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub pool_address: String,
    pub sender: String,
    pub recipient: String,
    pub token0_address: String,
    pub token1_address: String,
    /// Signed, human-scaled pool delta for token0
    pub amount0: f64,
    /// Signed, human-scaled pool delta for token1
    pub amount1: f64,
    pub token_in_address: String,
    pub token_out_address: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub sqrt_price_x96: Option<String>,
    pub liquidity: Option<String>,
    pub tick: Option<i32>,
    pub usd_value: Option<f64>,
    pub size_tier: SizeTier,
    pub event_timestamp: DateTime<Utc>,
}

/// Decoded ERC-20 transfer
///
/// SQL reference: `sql/03_raw_transfers.sql`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    /// Unscaled integer amount, decimal string
    pub amount_raw: String,
    pub amount: f64,
    pub usd_value: Option<f64>,
    pub direction: Option<FlowDirection>,
    pub is_exchange: bool,
    pub event_timestamp: DateTime<Utc>,
}

/// Output of an `EventDecoder`
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Swap(SwapEvent),
    Transfer(TransferEvent),
}

/// Audit/debug copy of every persisted event
///
/// SQL reference: `sql/01_raw_events.sql`
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub contract_address: String,
    pub event_name: String,
    pub event_params: BTreeMap<String, String>,
    pub event_timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Build a raw event from a typed record, flattening its fields to strings
    pub fn from_record<T: Serialize>(
        record: &T,
        block_number: u64,
        tx_hash: &str,
        log_index: u32,
        contract_address: &str,
        kind: EventKind,
        event_timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            block_number,
            tx_hash: tx_hash.to_string(),
            log_index,
            contract_address: contract_address.to_string(),
            event_name: kind.as_str().to_string(),
            event_params: flatten_params(record)?,
            event_timestamp,
        })
    }
}

/// Serialize a record into a flat `field -> string` map
///
/// Nested values are kept as their compact JSON text; nulls become empty strings.
pub fn flatten_params<T: Serialize>(record: &T) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let value = serde_json::to_value(record)?;
    let mut params = BTreeMap::new();

    if let serde_json::Value::Object(map) = value {
        for (key, v) in map {
            let text = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            params.insert(key, text);
        }
    }

    Ok(params)
}

/// Static reference data for a token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    /// CoinGecko id, if the token is priced
    pub price_source_id: Option<String>,
}

/// A USD quote for a price-source id
///
/// SQL reference: `sql/05_token_prices.sql`
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price_source_id: String,
    pub token_address: String,
    pub price_usd: f64,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}
