//! Integration tests: ingestion and analytics against a real SQLite file
//!
//! The chain and the price oracle are in-process fakes; everything between them and the
//! database is the production code path.
//!
//! Key integration points tested:
//! - One checkpointed pass over a 3-block range with a malformed swap
//! - Re-indexing a range after a lost checkpoint writes nothing new
//! - Checkpoints never move backwards
//! - Scheduler ticks drive every contract to head, then all four jobs populate their tables

#[cfg(test)]
mod pipeline_integration_tests {
    use async_trait::async_trait;
    use chainpulse::analytics::{run_all_jobs, JobOutcome};
    use chainpulse::config::PipelineConfig;
    use chainpulse::indexer::tokens::{TokenRegistry, TrackedContract};
    use chainpulse::indexer::types::{ArgValue, BlockTime, EventArgs, EventKind, RawLog, TxHashRepr};
    use chainpulse::indexer::{
        ChainClient, ChainError, IndexerSettings, IngestionOrchestrator, PassOutcome, PriceCache,
        PriceError, PriceOracle,
    };
    use chainpulse::runtime::analytics_jobs;
    use chainpulse::scheduler::run_indexer_tick;
    use chainpulse::store::{CheckpointStore, SqliteStore};
    use alloy_primitives::{I256, U256};
    use chrono::Utc;
    use rusqlite::Connection;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const POOL: &str = "0x8ad599c3a0ff1de082011efddc58f1908eb6e6d8";
    const TREASURY: &str = "0x9999999999999999999999999999999999999999";

    struct FakeChain {
        head: u64,
        /// Unix seconds of `head`; earlier blocks are 60 s apart
        head_time: i64,
        logs: Vec<RawLog>,
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn current_block(&self) -> Result<u64, ChainError> {
            Ok(self.head)
        }

        async fn get_block_timestamp(&self, block_number: u64) -> Result<BlockTime, ChainError> {
            Ok(BlockTime::UnixSeconds(
                self.head_time - (self.head - block_number) as i64 * 60,
            ))
        }

        async fn get_logs(
            &self,
            contract: &str,
            _kind: EventKind,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<RawLog>, ChainError> {
            Ok(self
                .logs
                .iter()
                .filter(|l| l.address == contract)
                .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
                .cloned()
                .collect())
        }

        fn max_block_span(&self) -> u64 {
            10
        }
    }

    struct FakeOracle;

    #[async_trait]
    impl PriceOracle for FakeOracle {
        async fn fetch_price(&self, price_source_id: &str) -> Result<f64, PriceError> {
            match price_source_id {
                "usd-coin" => Ok(1.0),
                "weth" => Ok(2_000.0),
                other => Err(PriceError::MissingQuote(other.to_string())),
            }
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    fn wallet(n: u64) -> String {
        format!("0x{:040x}", n + 1)
    }

    fn tx_hash(block: u64, index: u32) -> TxHashRepr {
        TxHashRepr::Hex(format!("0x{:064x}", block * 1_000 + index as u64))
    }

    /// Uniswap V3 Swap with raw (unscaled) amounts; positive = into the pool
    fn swap_log(block: u64, index: u32, sender: &str, amount0: i128, amount1: i128) -> RawLog {
        let mut args = EventArgs::new();
        args.insert("sender".to_string(), ArgValue::Address(sender.to_string()));
        args.insert("recipient".to_string(), ArgValue::Address(sender.to_string()));
        args.insert("amount0".to_string(), ArgValue::Int(I256::try_from(amount0).unwrap()));
        args.insert("amount1".to_string(), ArgValue::Int(I256::try_from(amount1).unwrap()));
        args.insert("sqrtPriceX96".to_string(), ArgValue::Uint(U256::from(1_771_595_571_142_957_166_518_320_255_467_520u128)));
        args.insert("liquidity".to_string(), ArgValue::Uint(U256::from(20_000_000_000_000_000_000u128)));
        args.insert("tick".to_string(), ArgValue::Int(I256::try_from(-200_000i64).unwrap()));
        RawLog {
            block_number: block,
            tx_hash: tx_hash(block, index),
            log_index: index,
            address: POOL.to_string(),
            args,
        }
    }

    fn transfer_log(block: u64, index: u32, from: &str, to: &str, value: u128) -> RawLog {
        let mut args = EventArgs::new();
        args.insert("from".to_string(), ArgValue::Address(from.to_string()));
        args.insert("to".to_string(), ArgValue::Address(to.to_string()));
        args.insert("value".to_string(), ArgValue::Uint(U256::from(value)));
        RawLog {
            block_number: block,
            tx_hash: tx_hash(block, index),
            log_index: index,
            address: USDC.to_string(),
            args,
        }
    }

    fn temp_store() -> (NamedTempFile, Arc<SqliteStore>) {
        let file = NamedTempFile::new().unwrap();
        let store =
            SqliteStore::open_with_schema(file.path(), concat!(env!("CARGO_MANIFEST_DIR"), "/sql"))
                .unwrap();
        (file, Arc::new(store))
    }

    fn orchestrator(chain: FakeChain, store: Arc<SqliteStore>, settings: IndexerSettings) -> IngestionOrchestrator {
        let prices = Arc::new(PriceCache::new(Arc::new(FakeOracle), None));
        IngestionOrchestrator::new(
            Arc::new(chain),
            store.clone(),
            store,
            prices,
            TokenRegistry::with_known_tokens(),
            settings,
        )
    }

    fn count(path: &Path, table: &str) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    fn three_block_chain() -> FakeChain {
        FakeChain {
            head: 102,
            head_time: 1_700_000_000,
            logs: vec![
                // 2,500 USDC in, 1.25 WETH out
                swap_log(100, 0, &wallet(1), 2_500_000_000, -1_250_000_000_000_000_000),
                // both sides positive: rejected by the decoder
                swap_log(101, 0, &wallet(2), 1_000_000, 1_000_000),
            ],
        }
    }

    fn pool_settings() -> IndexerSettings {
        IndexerSettings {
            contracts: vec![TrackedContract::pool(POOL, USDC, WETH)],
            inter_contract_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_three_block_pass_skips_malformed_swap() {
        // Test: one valid and one malformed swap over blocks 100..=102
        let (file, store) = temp_store();
        store.set_checkpoint(POOL, 99).await.unwrap();

        let orch = orchestrator(three_block_chain(), store.clone(), pool_settings());
        let outcome = orch.run_pass(&TrackedContract::pool(POOL, USDC, WETH)).await.unwrap();

        let PassOutcome::Indexed(report) = outcome else {
            panic!("expected indexed pass, got {:?}", outcome);
        };
        assert_eq!((report.from_block, report.to_block), (100, 102));
        assert_eq!(report.logs_fetched, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.swaps_inserted, 1);
        assert!(report.checkpoint_advanced);

        assert_eq!(count(file.path(), "raw_swaps"), 1);
        assert_eq!(count(file.path(), "raw_events"), 1);
        assert_eq!(store.get_checkpoint(POOL).await.unwrap(), Some(102));

        let conn = Connection::open(file.path()).unwrap();
        let (token_in, usd_value, size_bucket): (String, f64, String) = conn
            .query_row(
                "SELECT token_in_address, usd_value, size_bucket FROM raw_swaps",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(token_in, USDC);
        assert_eq!(usd_value, 2_500.0);
        assert_eq!(size_bucket, "standard");
    }

    #[tokio::test]
    async fn test_reindexing_after_lost_checkpoint_is_idempotent() {
        // Test: a crash between insert and checkpoint write replays the range without duplicates
        let (file, store) = temp_store();
        store.set_checkpoint(POOL, 99).await.unwrap();
        let pool = TrackedContract::pool(POOL, USDC, WETH);

        let orch = orchestrator(three_block_chain(), store.clone(), pool_settings());
        orch.run_pass(&pool).await.unwrap();

        {
            let conn = Connection::open(file.path()).unwrap();
            conn.execute("DELETE FROM block_checkpoints", []).unwrap();
        }
        store.set_checkpoint(POOL, 99).await.unwrap();

        let outcome = orch.run_pass(&pool).await.unwrap();
        let PassOutcome::Indexed(report) = outcome else {
            panic!("expected indexed pass, got {:?}", outcome);
        };
        assert_eq!(report.swaps_inserted, 0);
        assert_eq!(report.raw_events_inserted, 0);
        assert_eq!(count(file.path(), "raw_swaps"), 1);
        assert_eq!(count(file.path(), "raw_events"), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let (_file, store) = temp_store();
        store.set_checkpoint(POOL, 99).await.unwrap();

        let orch = orchestrator(three_block_chain(), store.clone(), pool_settings());
        orch.run_pass(&TrackedContract::pool(POOL, USDC, WETH)).await.unwrap();

        store.set_checkpoint(POOL, 50).await.unwrap();
        assert_eq!(store.get_checkpoint(POOL).await.unwrap(), Some(102));

        assert_eq!(
            orch.run_pass(&TrackedContract::pool(POOL, USDC, WETH)).await.unwrap(),
            PassOutcome::CaughtUp
        );
    }

    #[tokio::test]
    async fn test_ticks_to_head_then_all_jobs_write() {
        // Test: scheduler ticks index both contracts to head; analytics fill every table
        let (file, store) = temp_store();
        let head = 130;

        let mut logs = Vec::new();
        for block in 101..=head {
            let n = block - 100;
            let usdc_in = (n as i128) * 1_000_000_000; // n * 1,000 USDC
            logs.push(swap_log(block, 0, &wallet(n % 6), usdc_in, -(n as i128) * 500_000_000_000_000_000));
            if n % 3 == 0 {
                logs.push(transfer_log(block, 1, &wallet(n % 6), TREASURY, 5_000_000_000));
            }
        }

        let chain = FakeChain {
            head,
            head_time: Utc::now().timestamp(),
            logs,
        };
        let settings = IndexerSettings {
            contracts: vec![TrackedContract::pool(POOL, USDC, WETH), TrackedContract::token(USDC)],
            tracked_wallets: [TREASURY.to_string()].into_iter().collect(),
            default_lookback: 30,
            inter_contract_delay: Duration::ZERO,
            ..Default::default()
        };
        let orch = orchestrator(chain, store.clone(), settings);

        let mut total_swaps = 0;
        let mut total_transfers = 0;
        for _ in 0..6 {
            let summary = run_indexer_tick(&orch).await;
            assert_eq!(summary.failed, 0);
            total_swaps += summary.swaps;
            total_transfers += summary.transfers;
        }
        assert_eq!(total_swaps, 30);
        assert_eq!(total_transfers, 10);
        assert_eq!(store.get_checkpoint(POOL).await.unwrap(), Some(head));
        assert_eq!(store.get_checkpoint(USDC).await.unwrap(), Some(head));

        let config = PipelineConfig::from_lookup(&|_: &str| None).unwrap();
        let jobs = analytics_jobs(&config, store.clone());
        let results = run_all_jobs(&jobs).await;

        assert_eq!(results.len(), 4);
        for (name, result) in &results {
            assert!(
                matches!(result, Ok(JobOutcome::Written(_))),
                "{} did not write: {:?}",
                name,
                result
            );
        }

        assert_eq!(count(file.path(), "analytics_wallet_segments"), 6);
        assert!(count(file.path(), "analytics_token_flows") >= 1);
        assert!(count(file.path(), "analytics_protocol_health") >= 1);

        let conn = Connection::open(file.path()).unwrap();
        let inflow: f64 = conn
            .query_row("SELECT SUM(inflow_usd) FROM analytics_token_flows", [], |row| row.get(0))
            .unwrap();
        assert_eq!(inflow, 50_000.0);
    }
}
