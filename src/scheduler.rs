//! Background schedulers for the indexer and the analytics jobs
//!
//! Both loops tick on a `tokio::time::interval` and run until cancelled. A failing pass or job
//! is logged and the loop continues on the next tick.

use crate::analytics::{run_all_jobs, AnalyticsJob, JobOutcome};
use crate::indexer::{IngestionOrchestrator, PassOutcome};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Totals across one indexer tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub indexed: usize,
    pub caught_up: usize,
    pub busy: usize,
    pub failed: usize,
    pub swaps: usize,
    pub transfers: usize,
}

/// Run one pass over every tracked contract and fold the results
pub async fn run_indexer_tick(orchestrator: &IngestionOrchestrator) -> TickSummary {
    let mut summary = TickSummary::default();

    for (_, result) in orchestrator.run_all().await {
        match result {
            Ok(PassOutcome::Indexed(report)) => {
                summary.indexed += 1;
                summary.swaps += report.swaps_inserted;
                summary.transfers += report.transfers_inserted;
            }
            Ok(PassOutcome::CaughtUp) => summary.caught_up += 1,
            Ok(PassOutcome::Busy) => summary.busy += 1,
            Err(_) => summary.failed += 1,
        }
    }

    summary
}

/// Indexer scheduler task: one full pass every `interval_secs`
///
/// Ticks that fall behind are delayed rather than bursted, so a slow RPC never stacks passes.
pub async fn indexer_scheduler_task(orchestrator: Arc<IngestionOrchestrator>, interval_secs: u64) {
    log::info!(
        "⏰ Starting indexer scheduler (interval: {}s, contracts: {})",
        interval_secs,
        orchestrator.contracts().len()
    );

    let mut timer = interval(Duration::from_secs(interval_secs.max(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let summary = run_indexer_tick(&orchestrator).await;
        if summary.swaps + summary.transfers > 0 || summary.failed > 0 {
            log::info!(
                "📊 Indexer tick: {} indexed, {} caught up, {} failed ({} swaps, {} transfers)",
                summary.indexed,
                summary.caught_up,
                summary.failed,
                summary.swaps,
                summary.transfers
            );
        } else {
            log::debug!("📊 Indexer tick: nothing new");
        }
    }
}

/// Analytics scheduler task: every job once per `interval_secs`
pub async fn analytics_scheduler_task(jobs: Arc<Vec<Box<dyn AnalyticsJob>>>, interval_secs: u64) {
    log::info!(
        "⏰ Starting analytics scheduler (interval: {}s, jobs: {})",
        interval_secs,
        jobs.len()
    );

    let mut timer = interval(Duration::from_secs(interval_secs.max(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        let results = run_all_jobs(&jobs).await;
        let written: usize = results
            .iter()
            .filter_map(|(_, r)| match r {
                Ok(JobOutcome::Written(rows)) => Some(*rows),
                _ => None,
            })
            .sum();
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();

        log::info!(
            "✅ Analytics run complete: {} rows written, {} jobs failed",
            written,
            failed
        );
    }
}
