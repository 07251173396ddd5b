//! Ingestion orchestrator: one checkpointed pass per tracked contract
//!
//! Pass lifecycle:
//! 1. Seed an absent checkpoint at `head - lookback`
//! 2. Fetch logs for `[checkpoint + 1, min(checkpoint + chunk, head)]`
//! 3. Decode, price (token-in side), classify, drop dust transfers
//! 4. Persist raw events and typed records in batches (`INSERT OR IGNORE`)
//! 5. Advance the checkpoint to the range end, only after persistence succeeded
//!
//! A log fetch failure is treated as an empty range that is retried next pass: the
//! checkpoint does not move. Passes over the same contract never overlap; a pass that finds
//! one already running returns `PassOutcome::Busy`.

use super::classifier::{
    classify_swap_size, classify_transfer_direction, filter_dust_transfer, is_exchange_transfer,
    MIN_TRANSFER_USD,
};
use super::chain_client::{ChainClient, ChainError};
use super::decoder::{decoder_for, EventDecoder};
use super::price_cache::PriceCache;
use super::tokens::{TokenRegistry, TrackedContract};
use super::types::{BlockTime, DecodedEvent, RawEvent, RawLog, SwapEvent, TransferEvent};
use crate::store::{CheckpointStore, EventStore, StoreError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub enum IngestError {
    Chain(ChainError),
    Store(StoreError),
}

impl From<ChainError> for IngestError {
    fn from(err: ChainError) -> Self {
        IngestError::Chain(err)
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Store(StoreError::Serialization(err))
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Chain(e) => write!(f, "Chain error: {}", e),
            IngestError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

/// What the orchestrator indexes and how
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub contracts: Vec<TrackedContract>,
    /// Wallet watch-list for transfer direction
    pub tracked_wallets: HashSet<String>,
    /// Blocks per pass, further capped by the chain client's span
    pub chunk_size: u64,
    /// Blocks behind head to seed a never-indexed contract
    pub default_lookback: u64,
    pub batch_size: usize,
    pub inter_contract_delay: Duration,
    pub min_transfer_usd: f64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            contracts: TrackedContract::defaults(),
            tracked_wallets: HashSet::new(),
            chunk_size: 9,
            default_lookback: 200,
            batch_size: 50,
            inter_contract_delay: Duration::from_millis(200),
            min_transfer_usd: MIN_TRANSFER_USD,
        }
    }
}

/// Counters for one indexed range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub contract_address: String,
    pub from_block: u64,
    pub to_block: u64,
    pub logs_fetched: usize,
    pub malformed: usize,
    pub dust_dropped: usize,
    pub raw_events_inserted: usize,
    pub swaps_inserted: usize,
    pub transfers_inserted: usize,
    /// False when the log fetch failed and the range will be retried
    pub checkpoint_advanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    CaughtUp,
    Busy,
    Indexed(PassReport),
}

/// Records produced by one range, ready to persist
#[derive(Default)]
struct PendingWrites {
    raw_events: Vec<RawEvent>,
    swaps: Vec<SwapEvent>,
    transfers: Vec<TransferEvent>,
}

pub struct IngestionOrchestrator {
    chain: Arc<dyn ChainClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    prices: Arc<PriceCache>,
    registry: TokenRegistry,
    settings: IndexerSettings,
    exchange_addresses: HashSet<String>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestionOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
        prices: Arc<PriceCache>,
        registry: TokenRegistry,
        mut settings: IndexerSettings,
    ) -> Self {
        settings.tracked_wallets = settings
            .tracked_wallets
            .iter()
            .map(|w| super::decoder::normalize_address(w))
            .collect();

        let exchange_addresses = settings
            .contracts
            .iter()
            .filter(|c| matches!(c, TrackedContract::Pool { .. }))
            .map(|c| c.address().to_string())
            .collect();

        Self {
            chain,
            checkpoints,
            events,
            prices,
            registry,
            settings,
            exchange_addresses,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn contracts(&self) -> &[TrackedContract] {
        &self.settings.contracts
    }

    fn contract_lock(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Run one pass for every tracked contract, sleeping between contracts
    ///
    /// Failures are logged per contract and never stop the others.
    pub async fn run_all(&self) -> Vec<(String, Result<PassOutcome, IngestError>)> {
        let mut results = Vec::with_capacity(self.settings.contracts.len());

        for contract in &self.settings.contracts {
            let result = self.run_pass(contract).await;
            match &result {
                Ok(PassOutcome::Indexed(report)) => log::info!(
                    "✅ {} blocks {}-{}: {} swaps, {} transfers, {} raw events",
                    report.contract_address,
                    report.from_block,
                    report.to_block,
                    report.swaps_inserted,
                    report.transfers_inserted,
                    report.raw_events_inserted
                ),
                Ok(PassOutcome::CaughtUp) => log::debug!("⏸️  {} caught up", contract.address()),
                Ok(PassOutcome::Busy) => log::debug!("⏭️  {} pass already running", contract.address()),
                Err(e) => log::error!("❌ Pass failed for {}: {}", contract.address(), e),
            }
            results.push((contract.address().to_string(), result));

            if !self.settings.inter_contract_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_contract_delay).await;
            }
        }

        results
    }

    /// One checkpointed pass for a single contract
    pub async fn run_pass(&self, contract: &TrackedContract) -> Result<PassOutcome, IngestError> {
        let lock = self.contract_lock(contract.address());
        let Ok(_guard) = lock.try_lock_owned() else {
            return Ok(PassOutcome::Busy);
        };

        let address = contract.address();
        let head = self.chain.current_block().await?;

        let checkpoint = match self.checkpoints.get_checkpoint(address).await? {
            Some(cp) => cp,
            None => {
                let seed = head.saturating_sub(self.settings.default_lookback);
                self.checkpoints.set_checkpoint(address, seed).await?;
                log::info!("🔧 Seeded checkpoint for {} at block {}", address, seed);
                seed
            }
        };

        if checkpoint >= head {
            return Ok(PassOutcome::CaughtUp);
        }

        let span = self
            .settings
            .chunk_size
            .min(self.chain.max_block_span())
            .max(1);
        let from_block = checkpoint + 1;
        let to_block = (checkpoint + span).min(head);

        let mut report = PassReport {
            contract_address: address.to_string(),
            from_block,
            to_block,
            ..Default::default()
        };

        let logs = match self
            .chain
            .get_logs(address, contract.event_kind(), from_block, to_block)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                log::warn!(
                    "⚠️  get_logs failed for {} ({}-{}), retrying next pass: {}",
                    address,
                    from_block,
                    to_block,
                    e
                );
                return Ok(PassOutcome::Indexed(report));
            }
        };
        report.logs_fetched = logs.len();

        let decoder = decoder_for(contract, &self.registry);
        let pending = self.process_logs(address, decoder.as_ref(), &logs, &mut report).await?;

        self.persist(pending, &mut report).await?;

        self.checkpoints.set_checkpoint(address, to_block).await?;
        report.checkpoint_advanced = true;

        Ok(PassOutcome::Indexed(report))
    }

    async fn block_time(&self, cache: &mut HashMap<u64, BlockTime>, block_number: u64) -> BlockTime {
        if let Some(bt) = cache.get(&block_number) {
            return *bt;
        }

        let bt = match self.chain.get_block_timestamp(block_number).await {
            Ok(bt) => bt,
            Err(e) => {
                log::warn!("⚠️  Block {} timestamp unavailable, using now: {}", block_number, e);
                BlockTime::Structured(Utc::now())
            }
        };
        cache.insert(block_number, bt);
        bt
    }

    async fn usd_price(&self, token_address: &str) -> Option<f64> {
        let price_source_id = self.registry.price_source_id(token_address)?;
        self.prices.price_for(price_source_id, token_address).await
    }

    async fn process_logs(
        &self,
        contract_address: &str,
        decoder: &dyn EventDecoder,
        logs: &[RawLog],
        report: &mut PassReport,
    ) -> Result<PendingWrites, IngestError> {
        let mut pending = PendingWrites::default();
        let mut block_times = HashMap::new();

        for log in logs {
            let block_time = self.block_time(&mut block_times, log.block_number).await;

            let Some(decoded) = decoder.decode(log, &block_time) else {
                report.malformed += 1;
                continue;
            };

            match decoded {
                DecodedEvent::Swap(mut swap) => {
                    let price = self.usd_price(&swap.token_in_address).await;
                    swap.usd_value = price.map(|p| swap.amount_in * p);
                    swap.size_tier = classify_swap_size(swap.usd_value);

                    pending.raw_events.push(RawEvent::from_record(
                        &swap,
                        swap.block_number,
                        &swap.tx_hash,
                        swap.log_index,
                        contract_address,
                        decoder.event_kind(),
                        swap.event_timestamp,
                    )?);
                    pending.swaps.push(swap);
                }
                DecodedEvent::Transfer(mut transfer) => {
                    let price = self.usd_price(&transfer.token_address).await;
                    transfer.usd_value = price.map(|p| transfer.amount * p);

                    if !filter_dust_transfer(transfer.usd_value, self.settings.min_transfer_usd) {
                        report.dust_dropped += 1;
                        continue;
                    }

                    transfer.direction = classify_transfer_direction(
                        &transfer.from_address,
                        &transfer.to_address,
                        &self.settings.tracked_wallets,
                    );
                    transfer.is_exchange = is_exchange_transfer(
                        &transfer.from_address,
                        &transfer.to_address,
                        &self.exchange_addresses,
                    );

                    pending.raw_events.push(RawEvent::from_record(
                        &transfer,
                        transfer.block_number,
                        &transfer.tx_hash,
                        transfer.log_index,
                        contract_address,
                        decoder.event_kind(),
                        transfer.event_timestamp,
                    )?);
                    pending.transfers.push(transfer);
                }
            }
        }

        Ok(pending)
    }

    async fn persist(&self, pending: PendingWrites, report: &mut PassReport) -> Result<(), StoreError> {
        let batch_size = self.settings.batch_size.max(1);

        for batch in pending.raw_events.chunks(batch_size) {
            report.raw_events_inserted += self.events.insert_raw_events(batch).await?;
        }
        for batch in pending.swaps.chunks(batch_size) {
            report.swaps_inserted += self.events.insert_swaps(batch).await?;
        }
        for batch in pending.transfers.chunks(batch_size) {
            report.transfers_inserted += self.events.insert_transfers(batch).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::price_cache::{PriceError, PriceOracle};
    use crate::indexer::types::{ArgValue, EventArgs, EventKind, FlowDirection, TxHashRepr};
    use crate::store::{AnalyticsSource, SqliteStore};
    use alloy_primitives::U256;
    use chrono::DateTime;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const POOL: &str = "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8";
    const WALLET: &str = "0x1111111111111111111111111111111111111111";

    struct StubChain {
        head: u64,
        logs: Vec<RawLog>,
        fail_logs: bool,
    }

    #[async_trait]
    impl ChainClient for StubChain {
        async fn current_block(&self) -> Result<u64, ChainError> {
            Ok(self.head)
        }

        async fn get_block_timestamp(&self, block_number: u64) -> Result<BlockTime, ChainError> {
            Ok(BlockTime::UnixSeconds(1_700_000_000 + block_number as i64 * 12))
        }

        async fn get_logs(
            &self,
            _contract: &str,
            _kind: EventKind,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<RawLog>, ChainError> {
            if self.fail_logs {
                return Err(ChainError::Decode("provider down".to_string()));
            }
            Ok(self
                .logs
                .iter()
                .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
                .cloned()
                .collect())
        }

        fn max_block_span(&self) -> u64 {
            10
        }
    }

    struct FixedOracle;

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn fetch_price(&self, price_source_id: &str) -> Result<f64, PriceError> {
            match price_source_id {
                "usd-coin" => Ok(1.0),
                "weth" => Ok(2000.0),
                other => Err(PriceError::MissingQuote(other.to_string())),
            }
        }

        fn source_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn transfer_log(block: u64, index: u32, to: &str, value: u128) -> RawLog {
        let mut args = EventArgs::new();
        args.insert("from".to_string(), ArgValue::Address(POOL.to_string()));
        args.insert("to".to_string(), ArgValue::Address(to.to_string()));
        args.insert("value".to_string(), ArgValue::Uint(U256::from(value)));
        RawLog {
            block_number: block,
            tx_hash: TxHashRepr::Hex(format!("0x{:x}", block * 100 + index as u64)),
            log_index: index,
            address: USDC.to_string(),
            args,
        }
    }

    fn orchestrator(chain: StubChain, store: Arc<SqliteStore>) -> IngestionOrchestrator {
        let prices = Arc::new(PriceCache::new(Arc::new(FixedOracle), None));
        let settings = IndexerSettings {
            contracts: vec![
                TrackedContract::pool(POOL, USDC, WETH),
                TrackedContract::token(USDC),
            ],
            tracked_wallets: [WALLET.to_uppercase().replace("0X", "0x")].into_iter().collect(),
            inter_contract_delay: Duration::ZERO,
            ..Default::default()
        };
        IngestionOrchestrator::new(
            Arc::new(chain),
            store.clone(),
            store,
            prices,
            TokenRegistry::with_known_tokens(),
            settings,
        )
    }

    fn temp_store() -> (NamedTempFile, Arc<SqliteStore>) {
        let file = NamedTempFile::new().unwrap();
        let store =
            SqliteStore::open_with_schema(file.path(), concat!(env!("CARGO_MANIFEST_DIR"), "/sql"))
                .unwrap();
        (file, Arc::new(store))
    }

    #[tokio::test]
    async fn test_dust_dropped_and_direction_classified() {
        let (_file, store) = temp_store();
        store.set_checkpoint(USDC, 99).await.unwrap();

        let chain = StubChain {
            head: 102,
            logs: vec![
                transfer_log(100, 0, WALLET, 5_000_000_000), // $5,000 to tracked wallet
                transfer_log(101, 0, WALLET, 999_000_000),   // $999: dust
            ],
            fail_logs: false,
        };
        let orch = orchestrator(chain, store.clone());

        let outcome = orch.run_pass(&TrackedContract::token(USDC)).await.unwrap();
        let PassOutcome::Indexed(report) = outcome else {
            panic!("expected indexed pass, got {:?}", outcome);
        };

        assert_eq!(report.from_block, 100);
        assert_eq!(report.to_block, 102);
        assert_eq!(report.dust_dropped, 1);
        assert_eq!(report.transfers_inserted, 1);
        assert_eq!(report.raw_events_inserted, 1);
        assert_eq!(store.get_checkpoint(USDC).await.unwrap(), Some(102));

        let flows = store
            .transfer_flows(DateTime::from_timestamp(0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].amount_usd, 5_000.0);
        assert_eq!(flows[0].direction, Some(FlowDirection::In));
    }

    #[tokio::test]
    async fn test_seed_and_caught_up() {
        let (_file, store) = temp_store();
        let chain = StubChain {
            head: 150,
            logs: Vec::new(),
            fail_logs: false,
        };
        let orch = orchestrator(chain, store.clone());
        let token = TrackedContract::token(USDC);

        // Lookback 200 > head: seeded at 0, then indexes 1..=9
        let outcome = orch.run_pass(&token).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Indexed(ref r) if r.from_block == 1 && r.to_block == 9));

        store.set_checkpoint(USDC, 150).await.unwrap();
        assert_eq!(orch.run_pass(&token).await.unwrap(), PassOutcome::CaughtUp);
    }

    #[tokio::test]
    async fn test_log_fetch_failure_keeps_checkpoint() {
        let (_file, store) = temp_store();
        store.set_checkpoint(POOL, 100).await.unwrap();

        let chain = StubChain {
            head: 200,
            logs: Vec::new(),
            fail_logs: true,
        };
        let orch = orchestrator(chain, store.clone());

        let outcome = orch.run_pass(&TrackedContract::pool(POOL, USDC, WETH)).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Indexed(ref r) if !r.checkpoint_advanced));
        assert_eq!(store.get_checkpoint(POOL).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_busy() {
        let (_file, store) = temp_store();
        let chain = StubChain {
            head: 10,
            logs: Vec::new(),
            fail_logs: false,
        };
        let orch = orchestrator(chain, store);
        let token = TrackedContract::token(USDC);

        let lock = orch.contract_lock(token.address());
        let _held = lock.lock().await;

        assert_eq!(orch.run_pass(&token).await.unwrap(), PassOutcome::Busy);
    }
}
