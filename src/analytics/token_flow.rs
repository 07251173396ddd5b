//! Hourly token inflow/outflow aggregation

use super::{AnalyticsJob, JobOutcome, NowFn};
use crate::indexer::types::FlowDirection;
use crate::store::{AnalyticsSink, AnalyticsSource, StoreError, TransferFlow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_WINDOW_HOURS: i64 = 336;
/// Net flow beyond ±this many USD is labelled accumulation/distribution
pub const FLOW_THRESHOLD_USD: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowLabel {
    Accumulation,
    Distribution,
    Neutral,
}

impl FlowLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowLabel::Accumulation => "accumulation",
            FlowLabel::Distribution => "distribution",
            FlowLabel::Neutral => "neutral",
        }
    }
}

pub fn classify_net_flow(net_flow_usd: f64) -> FlowLabel {
    if net_flow_usd > FLOW_THRESHOLD_USD {
        FlowLabel::Accumulation
    } else if net_flow_usd < -FLOW_THRESHOLD_USD {
        FlowLabel::Distribution
    } else {
        FlowLabel::Neutral
    }
}

/// SQL reference: `sql/06_analytics.sql` (`analytics_token_flows`)
#[derive(Debug, Clone, PartialEq)]
pub struct TokenFlowBucket {
    pub hour_bucket: DateTime<Utc>,
    pub token_address: String,
    pub inflow_usd: f64,
    pub outflow_usd: f64,
    pub net_flow_usd: f64,
    pub unique_senders: usize,
    pub unique_receivers: usize,
    pub flow_direction: FlowLabel,
}

pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(ts)
}

#[derive(Default)]
struct FlowAccumulator<'a> {
    inflow: f64,
    outflow: f64,
    senders: HashSet<&'a str>,
    receivers: HashSet<&'a str>,
}

/// Group transfers by (hour, token). Anything not explicitly `in` counts as outflow.
pub fn aggregate_flows(transfers: &[TransferFlow]) -> Vec<TokenFlowBucket> {
    let mut buckets: BTreeMap<(DateTime<Utc>, String), FlowAccumulator> = BTreeMap::new();

    for t in transfers {
        let token = t.token_address.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }

        let acc = buckets.entry((hour_bucket(t.event_timestamp), token)).or_default();
        match t.direction {
            Some(FlowDirection::In) => acc.inflow += t.amount_usd,
            _ => acc.outflow += t.amount_usd,
        }

        let from = t.from_address.trim();
        if !from.is_empty() {
            acc.senders.insert(from);
        }
        let to = t.to_address.trim();
        if !to.is_empty() {
            acc.receivers.insert(to);
        }
    }

    buckets
        .into_iter()
        .map(|((hour, token), acc)| {
            let net = acc.inflow - acc.outflow;
            TokenFlowBucket {
                hour_bucket: hour,
                token_address: token,
                inflow_usd: acc.inflow,
                outflow_usd: acc.outflow,
                net_flow_usd: net,
                unique_senders: acc.senders.len(),
                unique_receivers: acc.receivers.len(),
                flow_direction: classify_net_flow(net),
            }
        })
        .collect()
}

/// Token flow job
pub struct TokenFlowAggregator {
    source: Arc<dyn AnalyticsSource>,
    sink: Arc<dyn AnalyticsSink>,
    window_hours: i64,
    now_fn: NowFn,
}

impl TokenFlowAggregator {
    pub fn new(source: Arc<dyn AnalyticsSource>, sink: Arc<dyn AnalyticsSink>, window_hours: i64) -> Self {
        Self::new_with_now_fn(source, sink, window_hours, Box::new(Utc::now))
    }

    pub fn new_with_now_fn(
        source: Arc<dyn AnalyticsSource>,
        sink: Arc<dyn AnalyticsSink>,
        window_hours: i64,
        now_fn: NowFn,
    ) -> Self {
        Self {
            source,
            sink,
            window_hours,
            now_fn,
        }
    }
}

#[async_trait]
impl AnalyticsJob for TokenFlowAggregator {
    fn name(&self) -> &'static str {
        "token_flow"
    }

    async fn run(&self) -> Result<JobOutcome, StoreError> {
        let since = (self.now_fn)() - Duration::hours(self.window_hours);
        let transfers = self.source.transfer_flows(since).await?;
        if transfers.is_empty() {
            return Ok(JobOutcome::Skipped);
        }

        let buckets = aggregate_flows(&transfers);
        self.sink.replace_token_flows(&buckets).await?;
        Ok(JobOutcome::Written(buckets.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn transfer(from: &str, to: &str, usd: f64, direction: Option<FlowDirection>, secs: i64) -> TransferFlow {
        TransferFlow {
            token_address: "0xToken".to_string(),
            from_address: from.to_string(),
            to_address: to.to_string(),
            amount_usd: usd,
            direction,
            event_timestamp: at(secs),
        }
    }

    #[test]
    fn test_net_flow_thresholds() {
        assert_eq!(classify_net_flow(1_000.01), FlowLabel::Accumulation);
        assert_eq!(classify_net_flow(1_000.0), FlowLabel::Neutral);
        assert_eq!(classify_net_flow(-1_000.0), FlowLabel::Neutral);
        assert_eq!(classify_net_flow(-1_000.01), FlowLabel::Distribution);
    }

    #[test]
    fn test_null_direction_counts_as_outflow() {
        let transfers = vec![
            transfer("0xa", "0xb", 5_000.0, Some(FlowDirection::In), 3_600),
            transfer("0xa", "0xc", 1_500.0, None, 3_700),
            transfer("0xd", "", 2_000.0, Some(FlowDirection::Out), 7_199),
        ];

        let buckets = aggregate_flows(&transfers);
        assert_eq!(buckets.len(), 1);

        let b = &buckets[0];
        assert_eq!(b.hour_bucket, at(3_600));
        assert_eq!(b.token_address, "0xtoken");
        assert_eq!(b.inflow_usd, 5_000.0);
        assert_eq!(b.outflow_usd, 3_500.0);
        assert_eq!(b.net_flow_usd, 1_500.0);
        assert_eq!(b.unique_senders, 2);
        assert_eq!(b.unique_receivers, 2); // empty receiver not counted
        assert_eq!(b.flow_direction, FlowLabel::Accumulation);
    }

    #[test]
    fn test_separate_hours() {
        let transfers = vec![
            transfer("0xa", "0xb", 3_000.0, None, 0),
            transfer("0xa", "0xb", 100.0, Some(FlowDirection::In), 3_600),
        ];

        let buckets = aggregate_flows(&transfers);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].flow_direction, FlowLabel::Distribution);
        assert_eq!(buckets[1].flow_direction, FlowLabel::Neutral);
    }
}
