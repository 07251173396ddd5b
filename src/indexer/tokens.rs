//! Token reference data and tracked contract definitions

use super::decoder::normalize_address;
use super::types::{EventKind, TokenMetadata};
use std::collections::HashMap;

/// Decimals assumed for tokens missing from the registry
pub const DEFAULT_DECIMALS: u8 = 18;

/// (address, symbol, decimals, CoinGecko id)
const KNOWN_TOKENS: &[(&str, &str, u8, &str)] = &[
    ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", 6, "usd-coin"),
    ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT", 6, "tether"),
    ("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "WBTC", 8, "wrapped-bitcoin"),
    ("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI", 18, "dai"),
    ("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH", 18, "weth"),
];

/// USDC/WETH 0.3% pool
pub const DEFAULT_POOLS: &[(&str, &str, &str)] = &[(
    "0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8",
    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
    "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
)];

pub const DEFAULT_TOKENS: &[&str] = &[
    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
    "0xdAC17F958D2ee523a2206206994597C13D831ec7",
    "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
    "0x6B175474E89094C44Da98b954EedeAC495271d0F",
    "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
];

/// Lookup table of token metadata keyed by lowercase address
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenMetadata>,
}

impl TokenRegistry {
    /// Registry preloaded with the mainnet stablecoins and majors
    pub fn with_known_tokens() -> Self {
        let mut registry = Self::default();
        for (address, symbol, decimals, price_id) in KNOWN_TOKENS {
            registry.insert(TokenMetadata {
                address: address.to_string(),
                symbol: symbol.to_string(),
                decimals: *decimals,
                price_source_id: Some(price_id.to_string()),
            });
        }
        registry
    }

    pub fn insert(&mut self, mut metadata: TokenMetadata) {
        metadata.address = normalize_address(&metadata.address);
        self.tokens.insert(metadata.address.clone(), metadata);
    }

    pub fn get(&self, address: &str) -> Option<&TokenMetadata> {
        self.tokens.get(&normalize_address(address))
    }

    pub fn decimals(&self, address: &str) -> u8 {
        self.get(address).map(|t| t.decimals).unwrap_or(DEFAULT_DECIMALS)
    }

    pub fn price_source_id(&self, address: &str) -> Option<&str> {
        self.get(address).and_then(|t| t.price_source_id.as_deref())
    }
}

/// A contract the orchestrator indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedContract {
    Pool {
        address: String,
        token0: String,
        token1: String,
    },
    Token {
        address: String,
    },
}

impl TrackedContract {
    pub fn pool(address: &str, token0: &str, token1: &str) -> Self {
        TrackedContract::Pool {
            address: normalize_address(address),
            token0: normalize_address(token0),
            token1: normalize_address(token1),
        }
    }

    pub fn token(address: &str) -> Self {
        TrackedContract::Token {
            address: normalize_address(address),
        }
    }

    /// Checkpoint key
    pub fn address(&self) -> &str {
        match self {
            TrackedContract::Pool { address, .. } => address,
            TrackedContract::Token { address } => address,
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            TrackedContract::Pool { .. } => EventKind::Swap,
            TrackedContract::Token { .. } => EventKind::Transfer,
        }
    }

    /// Default contract list: the USDC/WETH pool and the five registry tokens
    pub fn defaults() -> Vec<Self> {
        let pools = DEFAULT_POOLS
            .iter()
            .map(|(pool, t0, t1)| TrackedContract::pool(pool, t0, t1));
        let tokens = DEFAULT_TOKENS.iter().map(|t| TrackedContract::token(t));
        pools.chain(tokens).collect()
    }
}
