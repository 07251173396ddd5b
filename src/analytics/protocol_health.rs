//! Daily protocol health scoring
//!
//! Score (0-100) is a weighted mix of activity and distribution:
//! - volume: `min(30, volume / 1e6 * 30)`
//! - wallets: `min(25, wallets / 10)`
//! - distribution: `(1 - gini) * 25`
//! - swap count: `min(20, swaps / 50)`

use super::{round_to, AnalyticsJob, JobOutcome};
use crate::store::{AnalyticsSink, AnalyticsSource, DailyMedian, DailyWalletVolume, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// SQL reference: `sql/06_analytics.sql` (`analytics_protocol_health`)
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolHealthSnapshot {
    pub date_bucket: NaiveDate,
    pub unique_active_wallets: usize,
    pub total_swaps: usize,
    pub total_volume_usd: f64,
    pub median_swap_size: f64,
    pub gini_coefficient: f64,
    pub whale_share_pct: f64,
    pub health_score: f64,
}

/// Gini coefficient of non-negative values. 0 for empty input or zero total.
pub fn gini(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let total: f64 = sorted.iter().sum();
    if total == 0.0 {
        return 0.0;
    }

    let n = sorted.len() as f64;
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n - 1.0) * v)
        .sum();

    weighted / (n * total)
}

pub fn health_score(total_volume_usd: f64, unique_wallets: usize, total_swaps: usize, gini: f64) -> f64 {
    let mut score = 0.0;
    if total_volume_usd > 0.0 {
        score += (total_volume_usd / 1e6 * 30.0).min(30.0);
    }
    score += (unique_wallets as f64 / 10.0).min(25.0);
    score += (1.0 - gini) * 25.0;
    score += (total_swaps as f64 / 50.0).min(20.0);
    score.clamp(0.0, 100.0)
}

/// One snapshot per UTC day present in `volumes`, oldest first
///
/// `volumes` holds per-(day, wallet) totals; `medians` the per-day median swap size.
pub fn compute_daily_health(
    volumes: &[DailyWalletVolume],
    medians: &[DailyMedian],
) -> Vec<ProtocolHealthSnapshot> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&DailyWalletVolume>> = BTreeMap::new();
    for row in volumes {
        by_day.entry(row.date_bucket).or_default().push(row);
    }
    let median_by_day: HashMap<NaiveDate, f64> = medians
        .iter()
        .map(|m| (m.date_bucket, m.median_swap_usd))
        .collect();

    by_day
        .into_iter()
        .map(|(day, wallets)| {
            let wallet_volumes: Vec<f64> = wallets.iter().map(|w| w.volume_usd).collect();
            let total_volume: f64 = wallet_volumes.iter().sum();
            let whale_volume: f64 = wallets.iter().map(|w| w.whale_volume_usd).sum();
            let total_swaps: usize = wallets.iter().map(|w| w.swap_count).sum();

            let gini_coefficient = gini(&wallet_volumes);
            let whale_share_pct = if total_volume > 0.0 {
                whale_volume / total_volume * 100.0
            } else {
                0.0
            };

            ProtocolHealthSnapshot {
                date_bucket: day,
                unique_active_wallets: wallets.len(),
                total_swaps,
                total_volume_usd: total_volume,
                median_swap_size: median_by_day.get(&day).copied().unwrap_or(0.0),
                gini_coefficient: round_to(gini_coefficient, 6),
                whale_share_pct: round_to(whale_share_pct, 4),
                health_score: round_to(
                    health_score(total_volume, wallets.len(), total_swaps, gini_coefficient),
                    2,
                ),
            }
        })
        .collect()
}

/// Protocol health job; scores every day with swaps
///
/// Reads day-level aggregates, never individual swaps.
pub struct ProtocolHealthScorer {
    source: Arc<dyn AnalyticsSource>,
    sink: Arc<dyn AnalyticsSink>,
}

impl ProtocolHealthScorer {
    pub fn new(source: Arc<dyn AnalyticsSource>, sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { source, sink }
    }
}

#[async_trait]
impl AnalyticsJob for ProtocolHealthScorer {
    fn name(&self) -> &'static str {
        "protocol_health"
    }

    async fn run(&self) -> Result<JobOutcome, StoreError> {
        let volumes = self.source.daily_wallet_volume().await?;
        if volumes.is_empty() {
            return Ok(JobOutcome::Skipped);
        }
        let medians = self.source.daily_median_swap_size().await?;

        let snapshots = compute_daily_health(&volumes, &medians);
        for s in &snapshots {
            log::debug!("📊 {} health={} gini={}", s.date_bucket, s.health_score, s.gini_coefficient);
        }

        self.sink.replace_protocol_health(&snapshots).await?;
        Ok(JobOutcome::Written(snapshots.len()))
    }
}
