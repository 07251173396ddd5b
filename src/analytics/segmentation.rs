//! Wallet behavioural segmentation
//!
//! RFM features per wallet over the trailing window, standardized and clustered with k-means
//! (k = 4), then labelled by an ordered rule list. The first matching rule wins:
//!
//! 1. `bot`: at least 50 swaps/day with an average swap under $100
//! 2. `whale`: top 1% of wallets by volume, or any single swap of at least $50,000
//! 3. `active_trader`: in the high-activity cluster, or at least 10 swaps and $10,000 volume
//! 4. `retail`: everything else
//!
//! The high-activity cluster is the one whose members have the highest mean standardized
//! frequency.

use super::kmeans::{Clusterer, KMeans};
use super::{round_to, AnalyticsJob, JobOutcome, NowFn};
use crate::indexer::classifier::WHALE_MIN_USD;
use crate::store::{AnalyticsSink, AnalyticsSource, StoreError, SwapActivity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const CLUSTER_COUNT: usize = 4;
/// Runs with fewer wallets are skipped
pub const MIN_WALLETS: usize = 4;

const BOT_MIN_SWAPS_PER_DAY: f64 = 50.0;
const BOT_MAX_AVG_USD: f64 = 100.0;
const ACTIVE_MIN_SWAPS: u64 = 10;
const ACTIVE_MIN_VOLUME_USD: f64 = 10_000.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLabel {
    Bot,
    Whale,
    ActiveTrader,
    Retail,
}

impl SegmentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::Bot => "bot",
            SegmentLabel::Whale => "whale",
            SegmentLabel::ActiveTrader => "active_trader",
            SegmentLabel::Retail => "retail",
        }
    }
}

/// SQL reference: `sql/06_analytics.sql` (`analytics_wallet_segments`)
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSegment {
    pub wallet_address: String,
    pub segment: SegmentLabel,
    pub cluster_id: usize,
    /// Days since the last swap
    pub rfm_recency: f64,
    pub rfm_frequency: u64,
    pub rfm_volume: f64,
    pub computed_at: DateTime<Utc>,
}

/// Per-wallet aggregates the rules look at
#[derive(Debug, Clone)]
pub struct WalletProfile {
    pub wallet_address: String,
    pub recency_days: f64,
    pub frequency: u64,
    pub volume_usd: f64,
    pub largest_swap_usd: f64,
    pub first_swap: DateTime<Utc>,
    pub cluster_id: usize,
}

impl WalletProfile {
    /// Swaps per day since the first swap, floored at 0.1 days
    pub fn swaps_per_day(&self, now: DateTime<Utc>) -> f64 {
        let active_days = ((now - self.first_swap).num_seconds() as f64 / SECONDS_PER_DAY).max(0.1);
        self.frequency as f64 / active_days
    }

    pub fn avg_swap_usd(&self) -> f64 {
        if self.frequency == 0 {
            0.0
        } else {
            self.volume_usd / self.frequency as f64
        }
    }
}

/// Run-wide facts shared by every rule
#[derive(Debug, Clone)]
pub struct SegmentContext {
    pub now: DateTime<Utc>,
    pub top_volume_wallets: HashSet<String>,
    pub high_activity_cluster: usize,
}

pub type SegmentRule = fn(&WalletProfile, &SegmentContext) -> bool;

fn is_bot(w: &WalletProfile, ctx: &SegmentContext) -> bool {
    w.swaps_per_day(ctx.now) >= BOT_MIN_SWAPS_PER_DAY && w.avg_swap_usd() < BOT_MAX_AVG_USD
}

fn is_whale(w: &WalletProfile, ctx: &SegmentContext) -> bool {
    ctx.top_volume_wallets.contains(&w.wallet_address) || w.largest_swap_usd >= WHALE_MIN_USD
}

fn is_active_trader(w: &WalletProfile, ctx: &SegmentContext) -> bool {
    w.cluster_id == ctx.high_activity_cluster
        || (w.frequency >= ACTIVE_MIN_SWAPS && w.volume_usd >= ACTIVE_MIN_VOLUME_USD)
}

fn always(_: &WalletProfile, _: &SegmentContext) -> bool {
    true
}

/// Evaluated in order; first match wins
pub const SEGMENT_RULES: &[(SegmentLabel, SegmentRule)] = &[
    (SegmentLabel::Bot, is_bot),
    (SegmentLabel::Whale, is_whale),
    (SegmentLabel::ActiveTrader, is_active_trader),
    (SegmentLabel::Retail, always),
];

pub fn apply_rules(wallet: &WalletProfile, ctx: &SegmentContext) -> SegmentLabel {
    SEGMENT_RULES
        .iter()
        .find(|(_, rule)| rule(wallet, ctx))
        .map(|(label, _)| *label)
        .unwrap_or(SegmentLabel::Retail)
}

/// Standardize each column: (x - mean) / (std + 1e-9)
fn standardize(rows: &mut [Vec<f64>]) {
    let Some(dims) = rows.first().map(|r| r.len()) else {
        return;
    };
    let n = rows.len() as f64;

    for d in 0..dims {
        let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n;
        let std = (rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n).sqrt();
        for r in rows.iter_mut() {
            r[d] = (r[d] - mean) / (std + 1e-9);
        }
    }
}

fn high_activity_cluster(features: &[Vec<f64>], labels: &[usize]) -> usize {
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (f, &label) in features.iter().zip(labels) {
        let entry = sums.entry(label).or_insert((0.0, 0));
        entry.0 += f[1];
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(label, (sum, count))| (label, sum / count as f64))
        .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
        .0
}

/// Segment every wallet with activity. Fewer than `MIN_WALLETS` wallets yields nothing.
pub fn segment_wallets(
    activity: &[SwapActivity],
    now: DateTime<Utc>,
    clusterer: &dyn Clusterer,
) -> Vec<WalletSegment> {
    let mut by_wallet: BTreeMap<String, Vec<&SwapActivity>> = BTreeMap::new();
    for swap in activity {
        let wallet = swap.wallet_address.trim().to_lowercase();
        if wallet.is_empty() {
            continue;
        }
        by_wallet.entry(wallet).or_default().push(swap);
    }

    if by_wallet.len() < MIN_WALLETS {
        return Vec::new();
    }

    let mut profiles: Vec<WalletProfile> = by_wallet
        .into_iter()
        .filter_map(|(wallet, swaps)| {
            let last = swaps.iter().map(|s| s.event_timestamp).max()?;
            let first = swaps.iter().map(|s| s.event_timestamp).min()?;
            let amounts = swaps.iter().map(|s| s.amount_usd.unwrap_or(0.0));
            Some(WalletProfile {
                wallet_address: wallet,
                recency_days: (now - last).num_seconds() as f64 / SECONDS_PER_DAY,
                frequency: swaps.len() as u64,
                volume_usd: amounts.clone().sum(),
                largest_swap_usd: amounts.fold(0.0, f64::max),
                first_swap: first,
                cluster_id: 0,
            })
        })
        .collect();

    let mut features: Vec<Vec<f64>> = profiles
        .iter()
        .map(|p| {
            vec![
                p.recency_days,
                (p.frequency as f64).ln_1p(),
                p.volume_usd.max(0.0).ln_1p(),
            ]
        })
        .collect();
    standardize(&mut features);

    let labels = clusterer.cluster(&features, CLUSTER_COUNT.min(profiles.len()));
    for (profile, label) in profiles.iter_mut().zip(&labels) {
        profile.cluster_id = *label;
    }

    let mut by_volume: Vec<&WalletProfile> = profiles.iter().collect();
    by_volume.sort_by(|a, b| b.volume_usd.total_cmp(&a.volume_usd));
    let top_n = (profiles.len() / 100).max(1);

    let ctx = SegmentContext {
        now,
        top_volume_wallets: by_volume
            .iter()
            .take(top_n)
            .map(|p| p.wallet_address.clone())
            .collect(),
        high_activity_cluster: high_activity_cluster(&features, &labels),
    };

    profiles
        .iter()
        .map(|p| WalletSegment {
            wallet_address: p.wallet_address.clone(),
            segment: apply_rules(p, &ctx),
            cluster_id: p.cluster_id,
            rfm_recency: round_to(p.recency_days, 4),
            rfm_frequency: p.frequency,
            rfm_volume: round_to(p.volume_usd, 2),
            computed_at: now,
        })
        .collect()
}

/// Wallet segmentation job
pub struct WalletSegmenter {
    source: Arc<dyn AnalyticsSource>,
    sink: Arc<dyn AnalyticsSink>,
    window_days: i64,
    clusterer: Box<dyn Clusterer>,
    now_fn: NowFn,
}

impl WalletSegmenter {
    pub fn new(source: Arc<dyn AnalyticsSource>, sink: Arc<dyn AnalyticsSink>, window_days: i64) -> Self {
        Self::new_with_now_fn(source, sink, window_days, Box::new(Utc::now))
    }

    pub fn new_with_now_fn(
        source: Arc<dyn AnalyticsSource>,
        sink: Arc<dyn AnalyticsSink>,
        window_days: i64,
        now_fn: NowFn,
    ) -> Self {
        Self {
            source,
            sink,
            window_days,
            clusterer: Box::new(KMeans::default()),
            now_fn,
        }
    }
}

#[async_trait]
impl AnalyticsJob for WalletSegmenter {
    fn name(&self) -> &'static str {
        "wallet_segmentation"
    }

    async fn run(&self) -> Result<JobOutcome, StoreError> {
        let now = (self.now_fn)();
        let activity = self
            .source
            .swap_activity(now - Duration::days(self.window_days))
            .await?;

        let segments = segment_wallets(&activity, now, self.clusterer.as_ref());
        if segments.is_empty() {
            return Ok(JobOutcome::Skipped);
        }

        self.sink.replace_wallet_segments(&segments).await?;
        Ok(JobOutcome::Written(segments.len()))
    }
}
