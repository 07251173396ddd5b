//! Event classification: swap size tiers, transfer dust filter, flow direction
//!
//! Pure functions with no shared state.

use super::decoder::normalize_address;
use super::types::{FlowDirection, SizeTier};
use std::collections::HashSet;

/// Swaps at or above this USD value are whales
pub const WHALE_MIN_USD: f64 = 50_000.0;
/// Swaps at or above this USD value are large
pub const LARGE_MIN_USD: f64 = 10_000.0;
/// Transfers below this USD value are dust and never persisted
pub const MIN_TRANSFER_USD: f64 = 1_000.0;

/// Classify a swap by USD size. Unknown or non-positive values are `Standard`.
pub fn classify_swap_size(amount_usd: Option<f64>) -> SizeTier {
    match amount_usd {
        Some(usd) if usd >= WHALE_MIN_USD => SizeTier::Whale,
        Some(usd) if usd >= LARGE_MIN_USD => SizeTier::Large,
        _ => SizeTier::Standard,
    }
}

pub fn is_whale_swap(amount_usd: Option<f64>) -> bool {
    matches!(amount_usd, Some(usd) if usd >= WHALE_MIN_USD)
}

/// Whether a transfer is significant enough to keep. Unpriced transfers are dust.
pub fn filter_dust_transfer(amount_usd: Option<f64>, min_usd: f64) -> bool {
    matches!(amount_usd, Some(usd) if usd >= min_usd)
}

/// Direction relative to the tracked wallet set
///
/// - `In`: only the recipient is tracked
/// - `Out`: only the sender is tracked
/// - `None`: neither or both
///
/// `tracked_wallets` must hold normalized (lowercase) addresses.
pub fn classify_transfer_direction(
    from_address: &str,
    to_address: &str,
    tracked_wallets: &HashSet<String>,
) -> Option<FlowDirection> {
    let from_tracked = tracked_wallets.contains(&normalize_address(from_address));
    let to_tracked = tracked_wallets.contains(&normalize_address(to_address));

    match (from_tracked, to_tracked) {
        (false, true) => Some(FlowDirection::In),
        (true, false) => Some(FlowDirection::Out),
        _ => None,
    }
}

/// A transfer touching one of the tracked pool contracts counts as exchange flow
pub fn is_exchange_transfer(
    from_address: &str,
    to_address: &str,
    exchange_addresses: &HashSet<String>,
) -> bool {
    exchange_addresses.contains(&normalize_address(from_address))
        || exchange_addresses.contains(&normalize_address(to_address))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallets(addrs: &[&str]) -> HashSet<String> {
        addrs.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_swap_size_boundaries() {
        assert_eq!(classify_swap_size(Some(50_000.0)), SizeTier::Whale);
        assert_eq!(classify_swap_size(Some(49_999.99)), SizeTier::Large);
        assert_eq!(classify_swap_size(Some(10_000.0)), SizeTier::Large);
        assert_eq!(classify_swap_size(Some(9_999.99)), SizeTier::Standard);
    }

    #[test]
    fn test_swap_size_unknown_is_standard() {
        assert_eq!(classify_swap_size(None), SizeTier::Standard);
        assert_eq!(classify_swap_size(Some(0.0)), SizeTier::Standard);
        assert_eq!(classify_swap_size(Some(-75_000.0)), SizeTier::Standard);
    }

    #[test]
    fn test_dust_filter() {
        assert!(!filter_dust_transfer(Some(999.0), MIN_TRANSFER_USD));
        assert!(filter_dust_transfer(Some(1_000.0), MIN_TRANSFER_USD));
        assert!(!filter_dust_transfer(None, MIN_TRANSFER_USD));
        assert!(filter_dust_transfer(Some(5.0), 1.0));
    }

    #[test]
    fn test_transfer_direction() {
        let tracked = wallets(&["0xaaa"]);

        assert_eq!(classify_transfer_direction("0xbbb", "0xAAA", &tracked), Some(FlowDirection::In));
        assert_eq!(classify_transfer_direction("0xaaa", "0xbbb", &tracked), Some(FlowDirection::Out));
        assert_eq!(classify_transfer_direction("0xbbb", "0xccc", &tracked), None);
        assert_eq!(classify_transfer_direction("0xaaa", "0xaaa", &tracked), None);
        assert_eq!(classify_transfer_direction("0xaaa", "0xbbb", &HashSet::new()), None);
    }

    #[test]
    fn test_whale_and_exchange_helpers() {
        assert!(is_whale_swap(Some(50_000.0)));
        assert!(!is_whale_swap(None));

        let pools = wallets(&["0xpool"]);
        assert!(is_exchange_transfer("0xPOOL", "0xbbb", &pools));
        assert!(!is_exchange_transfer("0xaaa", "0xbbb", &pools));
    }
}
