//! ChainPulse: EVM swap/transfer indexer with batch analytics over SQLite

pub mod analytics;
pub mod config;
pub mod indexer;
pub mod runtime;
pub mod scheduler;
pub mod store;

use chrono::{DateTime, Utc};

/// Injectable wall clock
pub type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;
