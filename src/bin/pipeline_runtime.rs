//! Pipeline Runtime - long-running indexer and analytics process
//!
//! This binary:
//! - Initializes the SQLite database with schema
//! - Builds the chain client, price cache and ingestion orchestrator
//! - Spawns the indexer scheduler and the analytics scheduler
//! - Runs until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `PipelineConfig::from_env`.

use chainpulse::config::PipelineConfig;
use chainpulse::runtime;
use chainpulse::scheduler::{analytics_scheduler_task, indexer_scheduler_task};
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("🚀 ChainPulse Pipeline Runtime");
    info!("   ├─ Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   └─ Mode: indexer + analytics");

    let config = PipelineConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ RPC: {}", config.rpc_url);
    info!("   ├─ Tracked contracts: {}", config.contracts.len());
    info!("   ├─ Tracked wallets: {}", config.tracked_wallets.len());
    info!("   ├─ Indexer interval: {}s", config.indexer_interval_secs);
    info!("   └─ Analytics interval: {}s", config.analytics_interval_secs);

    let components = runtime::build(&config).await?;

    // Spawn background tasks
    info!("🚀 Spawning background tasks...");

    let orchestrator = components.orchestrator.clone();
    let indexer_interval = config.indexer_interval_secs;
    let indexer = tokio::spawn(async move {
        indexer_scheduler_task(orchestrator, indexer_interval).await;
    });
    info!("   ├─ ✅ Indexer scheduler spawned");

    let jobs = components.jobs.clone();
    let analytics_interval = config.analytics_interval_secs;
    let analytics = tokio::spawn(async move {
        analytics_scheduler_task(jobs, analytics_interval).await;
    });
    info!("   └─ ✅ Analytics scheduler spawned");

    info!("");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    // Wait for CTRL+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    indexer.abort();
    analytics.abort();

    // Give in-flight writes time to finish
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
