//! SQLite implementation of every store trait
//!
//! One `Arc<Mutex<Connection>>` per handle. Every trait method takes the lock, does its work
//! synchronously and releases it before returning, so no lock is held across an `.await`.

use super::{
    AnalyticsSink, AnalyticsSource, CheckpointStore, DailyMedian, DailyWalletVolume, EventStore,
    HourlyVolume, QuoteStore, SourceSchema, StoreError, SwapActivity, TransferFlow,
};
use crate::analytics::anomaly::AnomalyRecord;
use crate::analytics::protocol_health::ProtocolHealthSnapshot;
use crate::analytics::segmentation::WalletSegment;
use crate::analytics::token_flow::TokenFlowBucket;
use crate::indexer::classifier::WHALE_MIN_USD;
use crate::indexer::types::{FlowDirection, PriceQuote, RawEvent, SwapEvent, TransferEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Curated tables that must both exist for `SourceSchema::Curated`
const CURATED_TABLES: [&str; 2] = ["marts_fact_swaps", "marts_fact_transfers"];

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir`, sorted by file name, and executes them. All files
/// must use `IF NOT EXISTS` clauses so re-running is a no-op.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Schema directory not found: {}", schema_dir),
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// WAL, NORMAL sync, in-memory temp store, 5 s busy timeout
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    stmt.exists([table])
}

/// `Curated` iff every curated table exists
pub fn resolve_source(conn: &Connection) -> Result<SourceSchema, rusqlite::Error> {
    for table in CURATED_TABLES {
        if !table_exists(conn, table)? {
            return Ok(SourceSchema::Raw);
        }
    }
    Ok(SourceSchema::Curated)
}

fn ts_from_db(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// (table, wallet column, USD column) of the swap source
fn swap_columns(source: SourceSchema) -> (&'static str, &'static str, &'static str) {
    match source {
        SourceSchema::Curated => ("marts_fact_swaps", "wallet_address", "amount_usd"),
        SourceSchema::Raw => ("raw_swaps", "sender_address", "usd_value"),
    }
}

/// Store handle over a single SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    source: SourceSchema,
}

impl SqliteStore {
    /// Open an existing database. The schema must already be migrated.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        let source = resolve_source(&conn)?;
        log::info!("✅ SQLite store opened (analytics source: {:?})", source);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            source,
        })
    }

    /// Open (creating if needed) and migrate from `schema_dir`
    pub fn open_with_schema(db_path: impl AsRef<Path>, schema_dir: &str) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        {
            let mut conn = Connection::open(db_path.as_ref())?;
            run_schema_migrations(&mut conn, schema_dir)?;
        }

        Self::open(db_path)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_checkpoint(&self, contract_address: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.conn();
        let block: Option<i64> = conn
            .query_row(
                "SELECT last_block FROM block_checkpoints WHERE contract_address = ?1",
                [contract_address],
                |row| row.get(0),
            )
            .optional()?;

        Ok(block.map(|b| b.max(0) as u64))
    }

    async fn set_checkpoint(&self, contract_address: &str, last_block: u64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO block_checkpoints (contract_address, last_block, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(contract_address) DO UPDATE SET
                last_block = MAX(block_checkpoints.last_block, excluded.last_block),
                updated_at = excluded.updated_at
            "#,
            params![contract_address, last_block as i64, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_raw_events(&self, events: &[RawEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for event in events {
            let params_json = serde_json::to_string(&event.event_params)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO raw_events
                 (block_number, tx_hash, log_index, contract_address, event_name,
                  event_params, event_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.block_number as i64,
                    event.tx_hash,
                    event.log_index,
                    event.contract_address,
                    event.event_name,
                    params_json,
                    event.event_timestamp.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        log::debug!("✅ Flushed {} raw events ({} new)", events.len(), inserted);

        Ok(inserted)
    }

    async fn insert_swaps(&self, swaps: &[SwapEvent]) -> Result<usize, StoreError> {
        if swaps.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for swap in swaps {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO raw_swaps
                 (block_number, tx_hash, log_index, pool_address, sender_address,
                  recipient_address, token0_address, token1_address, amount0, amount1,
                  token_in_address, token_out_address, amount_in, amount_out,
                  sqrt_price_x96, liquidity, tick, usd_value, size_bucket, event_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    swap.block_number as i64,
                    swap.tx_hash,
                    swap.log_index,
                    swap.pool_address,
                    swap.sender,
                    swap.recipient,
                    swap.token0_address,
                    swap.token1_address,
                    swap.amount0,
                    swap.amount1,
                    swap.token_in_address,
                    swap.token_out_address,
                    swap.amount_in,
                    swap.amount_out,
                    swap.sqrt_price_x96,
                    swap.liquidity,
                    swap.tick,
                    swap.usd_value,
                    swap.size_tier.as_str(),
                    swap.event_timestamp.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        log::debug!("✅ Flushed {} swaps ({} new)", swaps.len(), inserted);

        Ok(inserted)
    }

    async fn insert_transfers(&self, transfers: &[TransferEvent]) -> Result<usize, StoreError> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for transfer in transfers {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO raw_transfers
                 (block_number, tx_hash, log_index, token_address, from_address, to_address,
                  amount_raw, amount, usd_value, direction, is_exchange, event_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    transfer.block_number as i64,
                    transfer.tx_hash,
                    transfer.log_index,
                    transfer.token_address,
                    transfer.from_address,
                    transfer.to_address,
                    transfer.amount_raw,
                    transfer.amount,
                    transfer.usd_value,
                    transfer.direction.map(|d| d.as_str()),
                    transfer.is_exchange,
                    transfer.event_timestamp.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        log::debug!("✅ Flushed {} transfers ({} new)", transfers.len(), inserted);

        Ok(inserted)
    }
}

#[async_trait]
impl QuoteStore for SqliteStore {
    async fn upsert_quote(&self, quote: &PriceQuote) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO token_prices (price_source_id, token_address, price_usd, fetched_at, source)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(price_source_id) DO UPDATE SET
                token_address = excluded.token_address,
                price_usd = excluded.price_usd,
                fetched_at = excluded.fetched_at,
                source = excluded.source
            "#,
            params![
                quote.price_source_id,
                quote.token_address,
                quote.price_usd,
                quote.fetched_at.timestamp(),
                quote.source,
            ],
        )?;
        Ok(())
    }

    async fn load_quotes(&self) -> Result<Vec<PriceQuote>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT price_source_id, token_address, price_usd, fetched_at, source FROM token_prices",
        )?;

        let quotes = stmt
            .query_map([], |row| {
                Ok(PriceQuote {
                    price_source_id: row.get(0)?,
                    token_address: row.get(1)?,
                    price_usd: row.get(2)?,
                    fetched_at: ts_from_db(row.get(3)?),
                    source: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(quotes)
    }
}

#[async_trait]
impl AnalyticsSource for SqliteStore {
    fn source_schema(&self) -> SourceSchema {
        self.source
    }

    async fn swap_activity(&self, since: DateTime<Utc>) -> Result<Vec<SwapActivity>, StoreError> {
        let sql = match self.source {
            SourceSchema::Curated => {
                "SELECT wallet_address, token_in_address, amount_usd, event_timestamp
                 FROM marts_fact_swaps WHERE event_timestamp >= ?1"
            }
            SourceSchema::Raw => {
                "SELECT sender_address, token_in_address, usd_value, event_timestamp
                 FROM raw_swaps WHERE event_timestamp >= ?1"
            }
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([since.timestamp()], |row| {
                Ok(SwapActivity {
                    wallet_address: row.get(0)?,
                    token_in_address: row.get(1)?,
                    amount_usd: row.get(2)?,
                    event_timestamp: ts_from_db(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn hourly_token_volume(&self, since: DateTime<Utc>) -> Result<Vec<HourlyVolume>, StoreError> {
        let sql = match self.source {
            SourceSchema::Curated => {
                "SELECT (event_timestamp / 3600) * 3600 AS hour_bucket, token_in_address,
                        SUM(COALESCE(amount_usd, 0))
                 FROM marts_fact_swaps WHERE event_timestamp >= ?1
                 GROUP BY hour_bucket, token_in_address
                 ORDER BY token_in_address, hour_bucket"
            }
            SourceSchema::Raw => {
                "SELECT (event_timestamp / 3600) * 3600 AS hour_bucket, token_in_address,
                        SUM(COALESCE(usd_value, 0))
                 FROM raw_swaps WHERE event_timestamp >= ?1
                 GROUP BY hour_bucket, token_in_address
                 ORDER BY token_in_address, hour_bucket"
            }
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([since.timestamp()], |row| {
                Ok(HourlyVolume {
                    hour_bucket: ts_from_db(row.get(0)?),
                    token_address: row.get(1)?,
                    volume_usd: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn transfer_flows(&self, since: DateTime<Utc>) -> Result<Vec<TransferFlow>, StoreError> {
        let sql = match self.source {
            SourceSchema::Curated => {
                "SELECT token_address, from_address, to_address, COALESCE(amount_usd, 0),
                        direction, event_timestamp
                 FROM marts_fact_transfers WHERE event_timestamp >= ?1"
            }
            SourceSchema::Raw => {
                "SELECT token_address, from_address, to_address, COALESCE(usd_value, 0),
                        direction, event_timestamp
                 FROM raw_transfers WHERE event_timestamp >= ?1"
            }
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([since.timestamp()], |row| {
                let direction: Option<String> = row.get(4)?;
                Ok(TransferFlow {
                    token_address: row.get(0)?,
                    from_address: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    to_address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    amount_usd: row.get(3)?,
                    direction: direction.as_deref().and_then(FlowDirection::from_str),
                    event_timestamp: ts_from_db(row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn daily_wallet_volume(&self) -> Result<Vec<DailyWalletVolume>, StoreError> {
        let (table, wallet, usd) = swap_columns(self.source);
        let sql = format!(
            "SELECT (event_timestamp / 86400) * 86400 AS day_bucket, {wallet},
                    COUNT(*), SUM(COALESCE({usd}, 0.0)),
                    SUM(CASE WHEN {usd} >= ?1 THEN {usd} ELSE 0.0 END)
             FROM {table}
             GROUP BY day_bucket, {wallet}
             ORDER BY day_bucket, {wallet}"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([WHALE_MIN_USD], |row| {
                Ok(DailyWalletVolume {
                    date_bucket: ts_from_db(row.get(0)?).date_naive(),
                    wallet_address: row.get(1)?,
                    swap_count: row.get::<_, i64>(2)? as usize,
                    volume_usd: row.get(3)?,
                    whale_volume_usd: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    async fn daily_median_swap_size(&self) -> Result<Vec<DailyMedian>, StoreError> {
        let (table, _, usd) = swap_columns(self.source);
        // Middle row for odd counts, mean of the two middle rows for even counts
        let sql = format!(
            "WITH daily AS (
                 SELECT (event_timestamp / 86400) * 86400 AS day_bucket,
                        COALESCE({usd}, 0.0) AS amount
                 FROM {table}
             ),
             ranked AS (
                 SELECT day_bucket, amount,
                        ROW_NUMBER() OVER (PARTITION BY day_bucket ORDER BY amount) AS rn,
                        COUNT(*) OVER (PARTITION BY day_bucket) AS cnt
                 FROM daily
             )
             SELECT day_bucket, AVG(amount)
             FROM ranked
             WHERE rn IN ((cnt + 1) / 2, (cnt + 2) / 2)
             GROUP BY day_bucket
             ORDER BY day_bucket"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DailyMedian {
                    date_bucket: ts_from_db(row.get(0)?).date_naive(),
                    median_swap_usd: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[async_trait]
impl AnalyticsSink for SqliteStore {
    async fn replace_anomalies(&self, rows: &[AnomalyRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM analytics_anomalies", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO analytics_anomalies
                 (anomaly_id, hour_bucket, token_address, actual_volume, expected_volume,
                  z_score, severity, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.anomaly_id,
                    row.hour_bucket.timestamp(),
                    row.token_address,
                    row.actual_volume,
                    row.expected_volume,
                    row.z_score,
                    row.severity.as_str(),
                    row.detected_at.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn replace_wallet_segments(&self, rows: &[WalletSegment]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM analytics_wallet_segments", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO analytics_wallet_segments
                 (wallet_address, segment, cluster_id, rfm_recency, rfm_frequency, rfm_volume,
                  computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.wallet_address,
                    row.segment.as_str(),
                    row.cluster_id as i64,
                    row.rfm_recency,
                    row.rfm_frequency as i64,
                    row.rfm_volume,
                    row.computed_at.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn replace_token_flows(&self, rows: &[TokenFlowBucket]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM analytics_token_flows", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO analytics_token_flows
                 (hour_bucket, token_address, inflow_usd, outflow_usd, net_flow_usd,
                  unique_senders, unique_receivers, flow_direction)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.hour_bucket.timestamp(),
                    row.token_address,
                    row.inflow_usd,
                    row.outflow_usd,
                    row.net_flow_usd,
                    row.unique_senders as i64,
                    row.unique_receivers as i64,
                    row.flow_direction.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn replace_protocol_health(&self, rows: &[ProtocolHealthSnapshot]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM analytics_protocol_health", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO analytics_protocol_health
                 (date_bucket, unique_active_wallets, total_swaps, total_volume_usd,
                  median_swap_size, gini_coefficient, whale_share_pct, health_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.date_bucket.format("%Y-%m-%d").to_string(),
                    row.unique_active_wallets as i64,
                    row.total_swaps as i64,
                    row.total_volume_usd,
                    row.median_swap_size,
                    row.gini_coefficient,
                    row.whale_share_pct,
                    row.health_score,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
