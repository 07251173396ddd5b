//! Volume anomaly detection
//!
//! Per token, a sliding window over the time-ordered series of non-empty hourly token-in
//! volumes. The current hour is compared against the mean and population standard deviation
//! of the preceding `window` hours; `|z| > 1.5` is flagged.

use super::{round_to, AnalyticsJob, JobOutcome, NowFn};
use crate::store::{AnalyticsSink, AnalyticsSource, HourlyVolume, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_LOOKBACK_HOURS: i64 = 336;
pub const DEFAULT_WINDOW: usize = 168;
pub const Z_THRESHOLD: f64 = 1.5;
const STD_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Severity for a z-score, `None` when within the normal band
pub fn classify_severity(z_score: f64) -> Option<Severity> {
    let abs_z = z_score.abs();
    if abs_z > 3.0 {
        Some(Severity::Critical)
    } else if abs_z > 2.5 {
        Some(Severity::High)
    } else if abs_z > 2.0 {
        Some(Severity::Medium)
    } else if abs_z > Z_THRESHOLD {
        Some(Severity::Low)
    } else {
        None
    }
}

/// A flagged (hour, token)
///
/// SQL reference: `sql/06_analytics.sql` (`analytics_anomalies`)
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub anomaly_id: String,
    pub hour_bucket: DateTime<Utc>,
    pub token_address: String,
    pub actual_volume: f64,
    pub expected_volume: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

/// Flag anomalous hours. Input order does not matter.
pub fn detect_anomalies(
    volumes: &[HourlyVolume],
    window: usize,
    detected_at: DateTime<Utc>,
) -> Vec<AnomalyRecord> {
    let mut by_token: BTreeMap<&str, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
    for v in volumes {
        if v.token_address.is_empty() {
            continue;
        }
        by_token
            .entry(v.token_address.as_str())
            .or_default()
            .push((v.hour_bucket, v.volume_usd));
    }

    let mut anomalies = Vec::new();

    for (token, mut series) in by_token {
        series.sort_by_key(|(hour, _)| *hour);

        for i in window..series.len() {
            let recent = &series[i - window..i];
            if recent.len() < 2 {
                continue;
            }

            let n = recent.len() as f64;
            let mean = recent.iter().map(|(_, v)| v).sum::<f64>() / n;
            let variance = recent.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt().max(STD_FLOOR);

            let (hour, current) = series[i];
            let z = (current - mean) / std;

            if let Some(severity) = classify_severity(z) {
                anomalies.push(AnomalyRecord {
                    anomaly_id: Uuid::new_v4().to_string(),
                    hour_bucket: hour,
                    token_address: token.to_string(),
                    actual_volume: current,
                    expected_volume: mean,
                    z_score: round_to(z, 4),
                    severity,
                    detected_at,
                });
            }
        }
    }

    anomalies
}

/// Hourly volume anomaly job
pub struct AnomalyDetector {
    source: Arc<dyn AnalyticsSource>,
    sink: Arc<dyn AnalyticsSink>,
    lookback_hours: i64,
    window: usize,
    now_fn: NowFn,
}

impl AnomalyDetector {
    pub fn new(source: Arc<dyn AnalyticsSource>, sink: Arc<dyn AnalyticsSink>, lookback_hours: i64) -> Self {
        Self::new_with_now_fn(source, sink, lookback_hours, DEFAULT_WINDOW, Box::new(Utc::now))
    }

    pub fn new_with_now_fn(
        source: Arc<dyn AnalyticsSource>,
        sink: Arc<dyn AnalyticsSink>,
        lookback_hours: i64,
        window: usize,
        now_fn: NowFn,
    ) -> Self {
        Self {
            source,
            sink,
            lookback_hours,
            window,
            now_fn,
        }
    }
}

#[async_trait]
impl AnalyticsJob for AnomalyDetector {
    fn name(&self) -> &'static str {
        "volume_anomaly"
    }

    async fn run(&self) -> Result<JobOutcome, StoreError> {
        let now = (self.now_fn)();
        let since = now - Duration::hours(self.lookback_hours);

        let volumes = self.source.hourly_token_volume(since).await?;
        if volumes.is_empty() {
            return Ok(JobOutcome::Skipped);
        }

        let anomalies = detect_anomalies(&volumes, self.window, now);
        if !anomalies.is_empty() {
            log::warn!("⚠️  {} volume anomalies detected", anomalies.len());
        }

        self.sink.replace_anomalies(&anomalies).await?;
        Ok(JobOutcome::Written(anomalies.len()))
    }
}
