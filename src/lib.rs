//! Order Log Reconcile Library
//!
//! Reconciles a trading bot's decision logs against the order history the
//! exchange reports: matches every logged open, close and partial close to
//! the order that executed it, corrects drifted records in place, completes
//! missing closes and validates partial-close chains.

pub mod common;
pub mod config;
pub mod decision_log;
pub mod exchange;
pub mod ingest;
pub mod reconcile;
pub mod store;

// Re-export commonly used types
pub use common::errors::{ReconcileError, Result};
pub use common::traits::{IngestOutcome, OrderSource, OrderStore};
pub use common::types::{
    ActionKind, DecisionAction, ExchangeOrder, OrderStatus, PositionSide, ReconcileCursor, Side,
};
pub use config::types::AppConfig;
pub use decision_log::DecisionFile;
pub use exchange::BinanceFuturesClient;
pub use ingest::{fetch_all, FetchSummary, OrderFetcher};
pub use reconcile::{run_all, Discrepancy, Matcher, Pass, Reconciler, RunSummary};
pub use store::{InMemoryOrderStore, OrderCache, SqliteOrderStore};
