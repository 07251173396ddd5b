//! Wiring shared by the binaries: store, chain client, price cache, orchestrator and jobs

use crate::analytics::anomaly::AnomalyDetector;
use crate::analytics::protocol_health::ProtocolHealthScorer;
use crate::analytics::segmentation::WalletSegmenter;
use crate::analytics::token_flow::TokenFlowAggregator;
use crate::analytics::AnalyticsJob;
use crate::config::PipelineConfig;
use crate::indexer::coingecko::CoinGeckoClient;
use crate::indexer::tokens::TokenRegistry;
use crate::indexer::{IngestionOrchestrator, JsonRpcChainClient, PriceCache};
use crate::store::{run_schema_migrations, QuoteStore, SqliteStore};
use rusqlite::Connection;
use std::sync::Arc;

pub struct Components {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub jobs: Arc<Vec<Box<dyn AnalyticsJob>>>,
}

/// The four analytics jobs reading from and writing to `store`
pub fn analytics_jobs(config: &PipelineConfig, store: Arc<SqliteStore>) -> Vec<Box<dyn AnalyticsJob>> {
    vec![
        Box::new(AnomalyDetector::new(store.clone(), store.clone(), config.anomaly_lookback_hours)),
        Box::new(WalletSegmenter::new(store.clone(), store.clone(), config.segment_window_days)),
        Box::new(TokenFlowAggregator::new(store.clone(), store.clone(), config.flow_window_hours)),
        Box::new(ProtocolHealthScorer::new(store.clone(), store)),
    ]
}

/// Migrate the database and build every long-lived component
pub async fn build(config: &PipelineConfig) -> Result<Components, Box<dyn std::error::Error>> {
    log::info!("🔧 Initializing database...");
    let mut conn = Connection::open(&config.db_path)?;
    run_schema_migrations(&mut conn, &config.schema_dir)?;
    drop(conn);

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    log::info!("✅ Database initialized");

    let chain = Arc::new(JsonRpcChainClient::new(
        &config.rpc_url,
        config.rpc_timeout_secs,
        config.rpc_max_block_range,
    )?);
    let oracle = Arc::new(CoinGeckoClient::new(
        &config.coingecko_base_url,
        config.coingecko_api_key.clone(),
        config.coingecko_tier,
    )?);

    let prices = Arc::new(PriceCache::new(oracle, Some(store.clone() as Arc<dyn QuoteStore>)));
    prices.warm_from_store().await;

    let orchestrator = Arc::new(IngestionOrchestrator::new(
        chain,
        store.clone(),
        store.clone(),
        prices,
        TokenRegistry::with_known_tokens(),
        config.indexer_settings(),
    ));
    log::info!("✅ Orchestrator created ({} contracts)", orchestrator.contracts().len());

    let jobs = Arc::new(analytics_jobs(config, store));

    Ok(Components {
        orchestrator,
        jobs,
    })
}
