//! CoinGecko `simple/price` integration
//!
//! ## API Reference
//!
//! Endpoint: `{base}/simple/price?ids={id}&vs_currencies=usd`
//! Returns: `{ "<id>": { "usd": <price> } }`
//!
//! Demo keys are sent as `x-cg-demo-api-key`, paid keys as `x-cg-pro-api-key`.

use super::price_cache::{PriceError, PriceOracle};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// API key plan, which decides the auth header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTier {
    Demo,
    Pro,
}

impl KeyTier {
    /// Explicit `demo`/`pro`; anything else is `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "demo" => Some(KeyTier::Demo),
            "pro" => Some(KeyTier::Pro),
            _ => None,
        }
    }

    /// Fallback when no tier is configured: keys mentioning "demo" are demo keys
    pub fn infer(api_key: &str) -> Self {
        if api_key.to_lowercase().contains("demo") {
            KeyTier::Demo
        } else {
            KeyTier::Pro
        }
    }

    pub fn header_name(&self) -> &'static str {
        match self {
            KeyTier::Demo => "x-cg-demo-api-key",
            KeyTier::Pro => "x-cg-pro-api-key",
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

type SimplePriceResponse = HashMap<String, UsdQuote>;

fn extract_usd(body: &SimplePriceResponse, price_source_id: &str) -> Result<f64, PriceError> {
    body.get(price_source_id)
        .and_then(|q| q.usd)
        .ok_or_else(|| PriceError::MissingQuote(price_source_id.to_string()))
}

pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<(KeyTier, String)>,
}

impl CoinGeckoClient {
    /// `tier` overrides inference from the key text
    pub fn new(base_url: &str, api_key: Option<String>, tier: Option<KeyTier>) -> Result<Self, PriceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .map(|k| (tier.unwrap_or_else(|| KeyTier::infer(&k)), k));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoClient {
    async fn fetch_price(&self, price_source_id: &str) -> Result<f64, PriceError> {
        let url = format!("{}/simple/price", self.base_url);

        let mut request = self
            .http
            .get(&url)
            .query(&[("ids", price_source_id), ("vs_currencies", "usd")]);
        if let Some((tier, key)) = &self.api_key {
            request = request.header(tier.header_name(), key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PriceError::Status(response.status().as_u16()));
        }

        let body: SimplePriceResponse = response.json().await?;
        extract_usd(&body, price_source_id)
    }

    fn source_name(&self) -> &'static str {
        "coingecko"
    }
}
