//! Chain ingestion: fetch logs, decode, classify, price, persist

pub mod abi;
pub mod chain_client;
pub mod classifier;
pub mod coingecko;
pub mod decoder;
pub mod orchestrator;
pub mod price_cache;
pub mod tokens;
pub mod types;

pub use chain_client::{ChainClient, ChainError, JsonRpcChainClient};
pub use orchestrator::{IndexerSettings, IngestError, IngestionOrchestrator, PassOutcome, PassReport};
pub use price_cache::{PriceCache, PriceError, PriceOracle};
