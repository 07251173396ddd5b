//! Event decoding: raw chain logs into typed, human-scaled records
//!
//! Two decoders share the `EventDecoder` capability:
//! - `SwapDecoder`: Uniswap V3 pool `Swap`, resolves the trade direction from the signs of
//!   `amount0`/`amount1`
//! - `TransferDecoder`: ERC-20 `Transfer`
//!
//! Decoding never fails loudly. A log that does not match the expected shape yields `None`
//! and the orchestrator skips it.

use super::tokens::{TokenRegistry, TrackedContract};
use super::types::{
    BlockTime, DecodedEvent, EventKind, RawLog, SizeTier, SwapEvent, TransferEvent, TxHashRepr,
};
use alloy_primitives::U256;

/// Capability shared by all decoders
pub trait EventDecoder: Send + Sync {
    fn event_kind(&self) -> EventKind;

    /// Decode a log, or `None` if it is malformed/unsupported
    fn decode(&self, log: &RawLog, block_time: &BlockTime) -> Option<DecodedEvent>;
}

/// Canonical lowercase address form
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// `0x` + 64 lowercase hex chars, left-padded
///
/// `None` for text that is not hex or is wider than 32 bytes.
pub fn normalize_tx_hash(hash: &TxHashRepr) -> Option<String> {
    match hash {
        TxHashRepr::Bytes(bytes) => Some(format!("0x{}", hex::encode(bytes))),
        TxHashRepr::Hex(text) => {
            let trimmed = text.trim();
            let digits = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed)
                .to_lowercase();
            if digits.is_empty() || digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            Some(format!("0x{:0>64}", digits))
        }
    }
}

/// Scale an unsigned integer amount by `10^decimals`
pub fn scale_amount(raw: U256, decimals: u8) -> f64 {
    let whole = raw.to_string().parse::<f64>().unwrap_or(0.0);
    whole / 10f64.powi(decimals as i32)
}

/// Build the decoder for a tracked contract
pub fn decoder_for(contract: &TrackedContract, registry: &TokenRegistry) -> Box<dyn EventDecoder> {
    match contract {
        TrackedContract::Pool {
            address,
            token0,
            token1,
        } => Box::new(SwapDecoder::new(
            address,
            token0,
            registry.decimals(token0),
            token1,
            registry.decimals(token1),
        )),
        TrackedContract::Token { address } => {
            Box::new(TransferDecoder::new(address, registry.decimals(address)))
        }
    }
}

/// Decoder for pool swaps
///
/// A swap log carries two signed pool deltas. The positive one is the token entering the pool
/// (token-in), the negative one the token leaving it (token-out).
#[derive(Debug, Clone)]
pub struct SwapDecoder {
    pool_address: String,
    token0_address: String,
    token0_decimals: u8,
    token1_address: String,
    token1_decimals: u8,
}

impl SwapDecoder {
    pub fn new(
        pool_address: &str,
        token0_address: &str,
        token0_decimals: u8,
        token1_address: &str,
        token1_decimals: u8,
    ) -> Self {
        Self {
            pool_address: normalize_address(pool_address),
            token0_address: normalize_address(token0_address),
            token0_decimals,
            token1_address: normalize_address(token1_address),
            token1_decimals,
        }
    }

    fn decode_swap(&self, log: &RawLog, block_time: &BlockTime) -> Option<SwapEvent> {
        let sender = log.args.get("sender")?.as_address()?;
        let recipient = log
            .args
            .get("recipient")
            .and_then(|v| v.as_address())
            .unwrap_or(sender);
        let amount0 = log.args.get("amount0")?.as_int()?;
        let amount1 = log.args.get("amount1")?.as_int()?;

        let human0 = scale_amount(amount0.unsigned_abs(), self.token0_decimals);
        let human1 = scale_amount(amount1.unsigned_abs(), self.token1_decimals);

        let (token_in, token_out, amount_in, amount_out) =
            if amount0.is_negative() && amount1.is_positive() {
                (&self.token1_address, &self.token0_address, human1, human0)
            } else if amount0.is_positive() && amount1.is_negative() {
                (&self.token0_address, &self.token1_address, human0, human1)
            } else {
                return None;
            };

        let event_timestamp = block_time.resolve()?;

        Some(SwapEvent {
            block_number: log.block_number,
            tx_hash: normalize_tx_hash(&log.tx_hash)?,
            log_index: log.log_index,
            pool_address: self.pool_address.clone(),
            sender: normalize_address(sender),
            recipient: normalize_address(recipient),
            token0_address: self.token0_address.clone(),
            token1_address: self.token1_address.clone(),
            amount0: if amount0.is_negative() { -human0 } else { human0 },
            amount1: if amount1.is_negative() { -human1 } else { human1 },
            token_in_address: token_in.clone(),
            token_out_address: token_out.clone(),
            amount_in,
            amount_out,
            sqrt_price_x96: log.args.get("sqrtPriceX96").map(|v| v.to_text()),
            liquidity: log.args.get("liquidity").map(|v| v.to_text()),
            tick: log
                .args
                .get("tick")
                .and_then(|v| v.as_int())
                .and_then(|t| i32::try_from(t).ok()),
            usd_value: None,
            size_tier: SizeTier::Standard,
            event_timestamp,
        })
    }
}

impl EventDecoder for SwapDecoder {
    fn event_kind(&self) -> EventKind {
        EventKind::Swap
    }

    fn decode(&self, log: &RawLog, block_time: &BlockTime) -> Option<DecodedEvent> {
        self.decode_swap(log, block_time).map(DecodedEvent::Swap)
    }
}

/// Decoder for ERC-20 transfers of a single token
#[derive(Debug, Clone)]
pub struct TransferDecoder {
    token_address: String,
    decimals: u8,
}

impl TransferDecoder {
    pub fn new(token_address: &str, decimals: u8) -> Self {
        Self {
            token_address: normalize_address(token_address),
            decimals,
        }
    }

    fn decode_transfer(&self, log: &RawLog, block_time: &BlockTime) -> Option<TransferEvent> {
        let value = log.args.get("value")?.as_uint()?;
        let from = log
            .args
            .get("from")
            .and_then(|v| v.as_address())
            .map(normalize_address)
            .unwrap_or_default();
        let to = log
            .args
            .get("to")
            .and_then(|v| v.as_address())
            .map(normalize_address)
            .unwrap_or_default();
        let event_timestamp = block_time.resolve()?;

        Some(TransferEvent {
            block_number: log.block_number,
            tx_hash: normalize_tx_hash(&log.tx_hash)?,
            log_index: log.log_index,
            token_address: self.token_address.clone(),
            from_address: from,
            to_address: to,
            amount_raw: value.to_string(),
            amount: scale_amount(value, self.decimals),
            usd_value: None,
            direction: None,
            is_exchange: false,
            event_timestamp,
        })
    }
}

impl EventDecoder for TransferDecoder {
    fn event_kind(&self) -> EventKind {
        EventKind::Transfer
    }

    fn decode(&self, log: &RawLog, block_time: &BlockTime) -> Option<DecodedEvent> {
        self.decode_transfer(log, block_time).map(DecodedEvent::Transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::types::{ArgValue, EventArgs};
    use alloy_primitives::I256;
    use chrono::DateTime;

    const POOL: &str = "0x8AD599C3A0FF1DE082011EFDDC58F1908EB6E6D8";
    const TOKEN0: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const TOKEN1: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const SENDER: &str = "0x1111111111111111111111111111111111111111";

    fn swap_decoder() -> SwapDecoder {
        // Both legs use 0 decimals so human amounts equal raw amounts
        SwapDecoder::new(POOL, TOKEN0, 0, TOKEN1, 0)
    }

    fn swap_log(amount0: Option<i128>, amount1: Option<i128>) -> RawLog {
        let mut args = EventArgs::new();
        args.insert("sender".to_string(), ArgValue::Address(SENDER.to_string()));
        if let Some(a) = amount0 {
            args.insert("amount0".to_string(), ArgValue::Int(I256::try_from(a).unwrap()));
        }
        if let Some(a) = amount1 {
            args.insert("amount1".to_string(), ArgValue::Int(I256::try_from(a).unwrap()));
        }
        RawLog {
            block_number: 100,
            tx_hash: TxHashRepr::Hex("0xABC".to_string()),
            log_index: 3,
            address: POOL.to_string(),
            args,
        }
    }

    fn decode_swap(log: &RawLog) -> Option<SwapEvent> {
        match swap_decoder().decode(log, &BlockTime::UnixSeconds(1_700_000_000)) {
            Some(DecodedEvent::Swap(s)) => Some(s),
            _ => None,
        }
    }

    #[test]
    fn test_swap_token1_in() {
        // amount0 = -5, amount1 = +1000 -> token1 in, token0 out
        let swap = decode_swap(&swap_log(Some(-5), Some(1000))).unwrap();

        assert_eq!(swap.amount_in, 1000.0);
        assert_eq!(swap.amount_out, 5.0);
        assert_eq!(swap.token_in_address, TOKEN1.to_lowercase());
        assert_eq!(swap.token_out_address, TOKEN0.to_lowercase());
        assert_eq!(swap.amount0, -5.0);
        assert_eq!(swap.amount1, 1000.0);
    }

    #[test]
    fn test_swap_token0_in() {
        // amount0 = +3, amount1 = -900 -> token0 in, token1 out
        let swap = decode_swap(&swap_log(Some(3), Some(-900))).unwrap();

        assert_eq!(swap.amount_in, 3.0);
        assert_eq!(swap.amount_out, 900.0);
        assert_eq!(swap.token_in_address, TOKEN0.to_lowercase());
        assert_eq!(swap.token_out_address, TOKEN1.to_lowercase());
    }

    #[test]
    fn test_swap_malformed_signs_rejected() {
        assert!(decode_swap(&swap_log(Some(3), Some(5))).is_none());
        assert!(decode_swap(&swap_log(Some(-3), Some(-5))).is_none());
        assert!(decode_swap(&swap_log(Some(0), Some(5))).is_none());
        assert!(decode_swap(&swap_log(None, Some(5))).is_none());
    }

    #[test]
    fn test_swap_scaling_and_normalization() {
        let decoder = SwapDecoder::new(POOL, TOKEN0, 6, TOKEN1, 18);
        let log = swap_log(Some(2_500_000_000), Some(-1_000_000_000_000_000_000));

        let swap = match decoder.decode(&log, &BlockTime::UnixSeconds(1_700_000_000)) {
            Some(DecodedEvent::Swap(s)) => s,
            other => panic!("expected swap, got {:?}", other),
        };

        assert_eq!(swap.amount_in, 2500.0);
        assert_eq!(swap.amount_out, 1.0);
        assert_eq!(swap.pool_address, POOL.to_lowercase());
        assert_eq!(swap.recipient, SENDER); // falls back to sender
        assert_eq!(swap.tx_hash, format!("0x{}abc", "0".repeat(61)));
        assert_eq!(swap.event_timestamp, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn test_swap_non_integer_amount_rejected() {
        let mut log = swap_log(Some(-5), None);
        log.args.insert("amount1".to_string(), ArgValue::Address(SENDER.to_string()));

        assert!(decode_swap(&log).is_none());
    }

    #[test]
    fn test_swap_amount_beyond_128_bits_is_scaled() {
        // amount1 = 2^200 with 18 decimals
        let decoder = SwapDecoder::new(POOL, TOKEN0, 6, TOKEN1, 18);
        let mut log = swap_log(Some(-1_000_000), None);
        let two_pow_200 = I256::from_dec_str(
            "1606938044258990275541962092341162602522202993782792835301376",
        )
        .unwrap();
        log.args.insert("amount1".to_string(), ArgValue::Int(two_pow_200));

        let swap = match decoder.decode(&log, &BlockTime::UnixSeconds(1_700_000_000)) {
            Some(DecodedEvent::Swap(s)) => s,
            other => panic!("expected swap, got {:?}", other),
        };

        assert_eq!(swap.token_in_address, TOKEN1.to_lowercase());
        assert!((swap.amount_in / 1.606938044258990e42 - 1.0).abs() < 1e-12);
        assert_eq!(swap.amount_out, 1.0);
    }

    #[test]
    fn test_transfer_decoding() {
        let decoder = TransferDecoder::new(TOKEN0, 6);
        let mut args = EventArgs::new();
        args.insert("from".to_string(), ArgValue::Address(SENDER.to_string()));
        args.insert("value".to_string(), ArgValue::Uint(U256::from(1_500_000u64)));
        let log = RawLog {
            block_number: 7,
            tx_hash: TxHashRepr::Bytes([0xab; 32]),
            log_index: 0,
            address: TOKEN0.to_string(),
            args,
        };

        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let transfer = match decoder.decode(&log, &BlockTime::Structured(ts)) {
            Some(DecodedEvent::Transfer(t)) => t,
            other => panic!("expected transfer, got {:?}", other),
        };

        assert_eq!(transfer.amount, 1.5);
        assert_eq!(transfer.amount_raw, "1500000");
        assert_eq!(transfer.from_address, SENDER);
        assert_eq!(transfer.to_address, ""); // missing `to` normalizes to empty
        assert_eq!(transfer.tx_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(transfer.event_timestamp, ts);
    }

    #[test]
    fn test_transfer_requires_value() {
        let decoder = TransferDecoder::new(TOKEN0, 6);
        let log = RawLog {
            block_number: 7,
            tx_hash: TxHashRepr::Hex("0x01".to_string()),
            log_index: 0,
            address: TOKEN0.to_string(),
            args: EventArgs::new(),
        };

        assert!(decoder.decode(&log, &BlockTime::UnixSeconds(0)).is_none());
    }

    #[test]
    fn test_normalize_tx_hash_variants() {
        let full = format!("0x{}", "AB".repeat(32));
        assert_eq!(
            normalize_tx_hash(&TxHashRepr::Hex(full)),
            Some(format!("0x{}", "ab".repeat(32)))
        );
        assert_eq!(
            normalize_tx_hash(&TxHashRepr::Hex("ff".to_string())),
            Some(format!("0x{}ff", "0".repeat(62)))
        );
    }

    #[test]
    fn test_normalize_tx_hash_rejects_bad_hex() {
        let too_long = format!("0x{}", "a".repeat(65));
        assert_eq!(normalize_tx_hash(&TxHashRepr::Hex(too_long)), None);
        assert_eq!(normalize_tx_hash(&TxHashRepr::Hex("0xnothex".to_string())), None);
        assert_eq!(normalize_tx_hash(&TxHashRepr::Hex("0x".to_string())), None);
    }

    #[test]
    fn test_swap_with_bad_tx_hash_rejected() {
        let mut log = swap_log(Some(-5), Some(1000));
        log.tx_hash = TxHashRepr::Hex(format!("0x{}", "1".repeat(70)));

        assert!(decode_swap(&log).is_none());
    }
}
