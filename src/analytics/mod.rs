//! Batch analytics over the persisted event stream
//!
//! Four independent jobs, each the sole writer of its output table:
//! - `anomaly::AnomalyDetector` → `analytics_anomalies`
//! - `segmentation::WalletSegmenter` → `analytics_wallet_segments`
//! - `token_flow::TokenFlowAggregator` → `analytics_token_flows`
//! - `protocol_health::ProtocolHealthScorer` → `analytics_protocol_health`
//!
//! Every job recomputes its output from scratch and replaces the table in one transaction.

pub mod anomaly;
pub mod kmeans;
pub mod protocol_health;
pub mod segmentation;
pub mod token_flow;

pub(crate) use crate::NowFn;
use crate::store::StoreError;
use async_trait::async_trait;

/// Result of one job run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output table replaced with this many rows
    Written(usize),
    /// Not enough input; output table left untouched
    Skipped,
}

#[async_trait]
pub trait AnalyticsJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<JobOutcome, StoreError>;
}

/// Run every job once, in order. A failing job is logged and does not stop the rest.
pub async fn run_all_jobs(jobs: &[Box<dyn AnalyticsJob>]) -> Vec<(&'static str, Result<JobOutcome, StoreError>)> {
    let mut results = Vec::with_capacity(jobs.len());

    for job in jobs {
        let result = job.run().await;
        match &result {
            Ok(JobOutcome::Written(rows)) => {
                log::info!("📊 {}: wrote {} rows", job.name(), rows);
            }
            Ok(JobOutcome::Skipped) => {
                log::info!("📊 {}: skipped (insufficient data)", job.name());
            }
            Err(e) => {
                log::error!("❌ {} failed: {}", job.name(), e);
            }
        }
        results.push((job.name(), result));
    }

    results
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
