//! In-memory USD price cache with stale-on-failure fallback
//!
//! - Fresh window: 300 s from `fetched_at`
//! - A failed live fetch falls back to the last cached price, however old
//! - Successful fetches are persisted through `QuoteStore` (best effort)

use super::types::PriceQuote;
use crate::store::QuoteStore;
use crate::NowFn;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const PRICE_TTL_SECS: i64 = 300;

#[derive(Debug)]
pub enum PriceError {
    Http(reqwest::Error),
    Status(u16),
    MissingQuote(String),
}

impl From<reqwest::Error> for PriceError {
    fn from(err: reqwest::Error) -> Self {
        PriceError::Http(err)
    }
}

impl std::fmt::Display for PriceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceError::Http(e) => write!(f, "HTTP error: {}", e),
            PriceError::Status(code) => write!(f, "Price API returned status {}", code),
            PriceError::MissingQuote(id) => write!(f, "No USD quote for {}", id),
        }
    }
}

impl std::error::Error for PriceError {}

/// Live USD price source
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn fetch_price(&self, price_source_id: &str) -> Result<f64, PriceError>;

    /// Recorded as `source` on persisted quotes
    fn source_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct CachedQuote {
    price_usd: f64,
    fetched_at: DateTime<Utc>,
}

pub struct PriceCache {
    oracle: Arc<dyn PriceOracle>,
    store: Option<Arc<dyn QuoteStore>>,
    entries: RwLock<HashMap<String, CachedQuote>>,
    now_fn: NowFn,
}

impl PriceCache {
    pub fn new(oracle: Arc<dyn PriceOracle>, store: Option<Arc<dyn QuoteStore>>) -> Self {
        Self::new_with_now_fn(oracle, store, Box::new(Utc::now))
    }

    /// Create with a custom clock (for testing)
    pub fn new_with_now_fn(
        oracle: Arc<dyn PriceOracle>,
        store: Option<Arc<dyn QuoteStore>>,
        now_fn: NowFn,
    ) -> Self {
        Self {
            oracle,
            store,
            entries: RwLock::new(HashMap::new()),
            now_fn,
        }
    }

    fn lookup(&self, price_source_id: &str) -> Option<CachedQuote> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(price_source_id)
            .copied()
    }

    fn store_entry(&self, price_source_id: &str, quote: CachedQuote) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(price_source_id.to_string(), quote);
    }

    /// Price if fetched less than 300 s ago
    pub fn get_cached(&self, price_source_id: &str) -> Option<f64> {
        let now = (self.now_fn)();
        self.lookup(price_source_id)
            .filter(|q| (now - q.fetched_at).num_seconds() < PRICE_TTL_SECS)
            .map(|q| q.price_usd)
    }

    /// Always fetch live. On failure, return the last cached price regardless of age.
    pub async fn fetch_and_cache(&self, price_source_id: &str, token_address: &str) -> Option<f64> {
        match self.oracle.fetch_price(price_source_id).await {
            Ok(price_usd) => {
                let fetched_at = (self.now_fn)();
                self.store_entry(price_source_id, CachedQuote { price_usd, fetched_at });

                if let Some(store) = &self.store {
                    let quote = PriceQuote {
                        price_source_id: price_source_id.to_string(),
                        token_address: token_address.to_string(),
                        price_usd,
                        fetched_at,
                        source: self.oracle.source_name().to_string(),
                    };
                    if let Err(e) = store.upsert_quote(&quote).await {
                        log::warn!("⚠️  Failed to persist quote for {}: {}", price_source_id, e);
                    }
                }

                Some(price_usd)
            }
            Err(e) => {
                let stale = self.lookup(price_source_id).map(|q| q.price_usd);
                log::warn!(
                    "⚠️  Price fetch failed for {} ({}), using {}",
                    price_source_id,
                    e,
                    if stale.is_some() { "stale cached price" } else { "no price" }
                );
                stale
            }
        }
    }

    /// Fresh cached price, else a live fetch
    pub async fn price_for(&self, price_source_id: &str, token_address: &str) -> Option<f64> {
        match self.get_cached(price_source_id) {
            Some(price) => Some(price),
            None => self.fetch_and_cache(price_source_id, token_address).await,
        }
    }

    /// Seed memory from persisted quotes, keeping their original `fetched_at`
    ///
    /// Returns the number of entries loaded. Newer in-memory entries are kept.
    pub async fn warm_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let quotes = match store.load_quotes().await {
            Ok(q) => q,
            Err(e) => {
                log::warn!("⚠️  Failed to load persisted quotes: {}", e);
                return 0;
            }
        };

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut loaded = 0;
        for quote in quotes {
            let newer_in_memory = entries
                .get(&quote.price_source_id)
                .is_some_and(|q| q.fetched_at >= quote.fetched_at);
            if !newer_in_memory {
                entries.insert(
                    quote.price_source_id,
                    CachedQuote {
                        price_usd: quote.price_usd,
                        fetched_at: quote.fetched_at,
                    },
                );
                loaded += 1;
            }
        }

        log::info!("✅ Price cache warmed with {} persisted quotes", loaded);
        loaded
    }
}
