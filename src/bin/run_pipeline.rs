//! One-shot pipeline run
//!
//! Usage:
//!   cargo run --bin run_pipeline -- [all|index|analyze] [passes]
//!
//! `index` runs up to `passes` indexer ticks (default 25), stopping early once every contract
//! is caught up. `analyze` runs each analytics job once. `all` does both, in that order.

use chainpulse::analytics::run_all_jobs;
use chainpulse::config::PipelineConfig;
use chainpulse::runtime;
use chainpulse::scheduler::run_indexer_tick;
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use std::env;

const DEFAULT_PASSES: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    All,
    Index,
    Analyze,
}

impl Mode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Mode::All),
            "index" => Some(Mode::Index),
            "analyze" => Some(Mode::Analyze),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mode = match args.first() {
        Some(arg) => Mode::parse(arg).ok_or_else(|| format!("unknown mode {:?} (expected all|index|analyze)", arg))?,
        None => Mode::All,
    };
    let passes: u32 = match args.get(1) {
        Some(arg) => arg.parse().map_err(|_| format!("invalid pass count {:?}", arg))?,
        None => DEFAULT_PASSES,
    };

    let config = PipelineConfig::from_env()?;
    info!("🚀 ChainPulse one-shot run ({:?}, db: {})", mode, config.db_path);

    let components = runtime::build(&config).await?;

    if matches!(mode, Mode::All | Mode::Index) {
        for pass in 1..=passes {
            let summary = run_indexer_tick(&components.orchestrator).await;
            info!(
                "📊 Pass {}/{}: {} indexed, {} caught up, {} failed ({} swaps, {} transfers)",
                pass,
                passes,
                summary.indexed,
                summary.caught_up,
                summary.failed,
                summary.swaps,
                summary.transfers
            );

            if summary.caught_up == components.orchestrator.contracts().len() {
                info!("✅ All contracts caught up after {} passes", pass);
                break;
            }
        }
    }

    if matches!(mode, Mode::All | Mode::Analyze) {
        let results = run_all_jobs(&components.jobs).await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!("⚠️  {} of {} analytics jobs failed", failed, results.len());
        }
    }

    info!("✅ Run complete");
    Ok(())
}
