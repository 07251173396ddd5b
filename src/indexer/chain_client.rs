//! Read-only EVM chain access
//!
//! `JsonRpcChainClient` talks plain JSON-RPC (`eth_blockNumber`, `eth_getBlockByNumber`,
//! `eth_getLogs`) and ABI-decodes the two supported event shapes (see `abi`) into named
//! arguments:
//!
//! | Event | topics[1] | topics[2] | data words |
//! |---|---|---|---|
//! | `Swap` | sender | recipient | amount0, amount1, sqrtPriceX96, liquidity, tick |
//! | `Transfer` | from | to | value |

use super::abi;
use super::types::{ArgValue, BlockTime, EventArgs, EventKind, RawLog, TxHashRepr};
use alloy_primitives::{Address, B256, I256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub enum ChainError {
    Http(reqwest::Error),
    Rpc { code: i64, message: String },
    Decode(String),
    RangeTooWide { from_block: u64, to_block: u64, max_span: u64 },
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Http(err)
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

impl From<alloy_sol_types::Error> for ChainError {
    fn from(err: alloy_sol_types::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Http(e) => write!(f, "HTTP error: {}", e),
            ChainError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ChainError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ChainError::RangeTooWide {
                from_block,
                to_block,
                max_span,
            } => write!(
                f,
                "Block range {}..={} exceeds provider limit of {} blocks",
                from_block, to_block, max_span
            ),
        }
    }
}

impl std::error::Error for ChainError {}

/// Chain access used by the orchestrator
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_block(&self) -> Result<u64, ChainError>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<BlockTime, ChainError>;

    /// Logs of `kind` emitted by `contract` in `from_block..=to_block`
    async fn get_logs(
        &self,
        contract: &str,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    /// Most blocks (inclusive range) one `get_logs` call may cover
    fn max_block_span(&self) -> u64;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

/// `eth_getLogs` entry; pending logs carry nulls
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("bad quantity {:?}: {}", value, e)))
}

fn parse_topic(hex_text: &str) -> Result<B256, ChainError> {
    B256::from_str(hex_text.trim())
        .map_err(|e| ChainError::Decode(format!("bad topic {:?}: {}", hex_text, e)))
}

fn address_arg(address: Address) -> ArgValue {
    ArgValue::Address(format!("0x{}", hex::encode(address)))
}

/// ABI-decode topics and data into named arguments
pub fn decode_args(kind: EventKind, topics: &[String], data: &str) -> Result<EventArgs, ChainError> {
    let topics = topics
        .iter()
        .map(|t| parse_topic(t))
        .collect::<Result<Vec<_>, _>>()?;
    let data = hex::decode(data.trim().trim_start_matches("0x"))
        .map_err(|e| ChainError::Decode(format!("bad log data: {}", e)))?;

    let mut args = EventArgs::new();
    match kind {
        EventKind::Swap => {
            let event = abi::Swap::decode_raw_log(topics, &data, true)?;
            args.insert("sender".to_string(), address_arg(event.sender));
            args.insert("recipient".to_string(), address_arg(event.recipient));
            args.insert("amount0".to_string(), ArgValue::Int(event.amount0));
            args.insert("amount1".to_string(), ArgValue::Int(event.amount1));
            args.insert("sqrtPriceX96".to_string(), ArgValue::Uint(U256::from(event.sqrtPriceX96)));
            args.insert("liquidity".to_string(), ArgValue::Uint(U256::from(event.liquidity)));
            let tick = I256::from_dec_str(&event.tick.to_string())
                .map_err(|e| ChainError::Decode(format!("bad tick {}: {}", event.tick, e)))?;
            args.insert("tick".to_string(), ArgValue::Int(tick));
        }
        EventKind::Transfer => {
            let event = abi::Transfer::decode_raw_log(topics, &data, true)?;
            args.insert("from".to_string(), address_arg(event.from));
            args.insert("to".to_string(), address_arg(event.to));
            args.insert("value".to_string(), ArgValue::Uint(event.value));
        }
    }

    Ok(args)
}

/// `None` for pending/removed logs
fn decode_log(kind: EventKind, entry: RpcLog) -> Result<Option<RawLog>, ChainError> {
    if entry.removed {
        return Ok(None);
    }
    let (Some(block), Some(tx_hash), Some(index)) =
        (entry.block_number, entry.transaction_hash, entry.log_index)
    else {
        return Ok(None);
    };

    Ok(Some(RawLog {
        block_number: parse_quantity(&block)?,
        tx_hash: TxHashRepr::Hex(tx_hash),
        log_index: u32::try_from(parse_quantity(&index)?)
            .map_err(|_| ChainError::Decode(format!("log index {:?} out of range", index)))?,
        address: entry.address.to_lowercase(),
        args: decode_args(kind, &entry.topics, &entry.data)?,
    }))
}

pub struct JsonRpcChainClient {
    http: reqwest::Client,
    rpc_url: String,
    max_block_span: u64,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: &str, timeout_secs: u64, max_block_span: u64) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            max_block_span: max_block_span.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self.http.post(&self.rpc_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: status.as_u16() as i64,
                message: format!("HTTP status {} for {}", status, method),
            });
        }

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        let result = body
            .result
            .ok_or_else(|| ChainError::Decode(format!("{} returned no result", method)))?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn current_block(&self) -> Result<u64, ChainError> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&head)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<BlockTime, ChainError> {
        let block: Option<RpcBlock> = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", block_number), false]))
            .await?;
        let block = block.ok_or_else(|| ChainError::Decode(format!("block {} not found", block_number)))?;
        Ok(BlockTime::UnixSeconds(parse_quantity(&block.timestamp)? as i64))
    }

    async fn get_logs(
        &self,
        contract: &str,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        if to_block < from_block {
            return Ok(Vec::new());
        }
        if to_block - from_block + 1 > self.max_block_span {
            return Err(ChainError::RangeTooWide {
                from_block,
                to_block,
                max_span: self.max_block_span,
            });
        }

        let filter = json!([{
            "address": contract,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [format!("0x{}", hex::encode(kind.topic0()))],
        }]);
        let logs: Vec<RpcLog> = self.call("eth_getLogs", filter).await?;

        let mut decoded = Vec::with_capacity(logs.len());
        for entry in logs {
            match decode_log(kind, entry) {
                Ok(Some(raw)) => decoded.push(raw),
                Ok(None) => {}
                Err(e) => log::warn!("⚠️  Skipping undecodable {} log from {}: {}", kind.as_str(), contract, e),
            }
        }

        Ok(decoded)
    }

    fn max_block_span(&self) -> u64 {
        self.max_block_span
    }
}
