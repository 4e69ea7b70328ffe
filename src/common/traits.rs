//! Trait definitions for the reconciler's external collaborators

use async_trait::async_trait;

use super::errors::Result;
use super::types::{ExchangeOrder, ReconcileCursor};

/// Source of an account's order history (the exchange REST API in production)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Fetch orders for a symbol.
    ///
    /// With `from_order_id` set, returns orders with id >= that id;
    /// otherwise returns orders created inside `[start_time, end_time]`
    /// (epoch milliseconds).
    async fn fetch_orders(
        &self,
        symbol: &str,
        from_order_id: Option<i64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<ExchangeOrder>>;
}

/// Outcome of one ingestion batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestOutcome {
    /// Orders written (inserted or refreshed)
    pub written: usize,
    /// Orders whose upsert failed and were skipped
    pub skipped: usize,
    /// Cursor after the batch committed
    pub cursor: i64,
}

/// Repository for fetched orders, scanned symbols and fetch cursors.
///
/// Orders are unique per (trader, symbol, order id); re-ingesting an order
/// refreshes it in place.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Remember that a trader opened positions on a symbol.
    /// Returns true when the pair was not known before.
    async fn record_symbol(&self, trader: &str, symbol: &str) -> Result<bool>;

    /// Known (trader, symbol) pairs ordered by trader then symbol,
    /// optionally restricted to one trader
    async fn symbols(&self, trader: Option<&str>) -> Result<Vec<(String, String)>>;

    /// Fetch cursor for a (trader, symbol), if one was ever committed
    async fn cursor(&self, trader: &str, symbol: &str) -> Result<Option<ReconcileCursor>>;

    /// Upsert a batch and advance the cursor, all-or-nothing.
    ///
    /// A single order that cannot be written is logged and skipped; a batch
    /// that cannot commit leaves both the orders and the cursor untouched.
    async fn ingest(
        &self,
        trader: &str,
        symbol: &str,
        orders: &[ExchangeOrder],
    ) -> Result<IngestOutcome>;

    /// All stored orders of a trader
    async fn query_orders(&self, trader: &str) -> Result<Vec<ExchangeOrder>>;

    /// Stored orders of a trader and symbol created inside `[start_ms, end_ms]`,
    /// ascending by creation time
    async fn query_orders_between(
        &self,
        trader: &str,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<ExchangeOrder>>;
}
