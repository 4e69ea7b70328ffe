//! SQLite-backed order store

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{ReconcileError, Result};
use crate::common::traits::{IngestOutcome, OrderStore};
use crate::common::types::{ExchangeOrder, OrderStatus, ReconcileCursor};
use crate::config::types::DatabaseConfig;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS symbols(
        trader_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        first_seen INTEGER NOT NULL,
        PRIMARY KEY(trader_id, symbol)
    )",
    "CREATE TABLE IF NOT EXISTS orders(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        trader_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        order_id INTEGER NOT NULL,
        side TEXT NOT NULL,
        position_side TEXT NOT NULL,
        status TEXT NOT NULL,
        avg_price TEXT NOT NULL,
        executed_qty TEXT NOT NULL,
        orig_qty TEXT NOT NULL,
        reduce_only INTEGER NOT NULL,
        close_position INTEGER NOT NULL,
        type TEXT NOT NULL,
        time INTEGER NOT NULL,
        update_time INTEGER NOT NULL,
        raw_json TEXT NOT NULL,
        UNIQUE(trader_id, symbol, order_id)
    )",
    "CREATE TABLE IF NOT EXISTS reconcile_state(
        trader_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        last_order_id INTEGER NOT NULL,
        last_fetch_time INTEGER NOT NULL,
        PRIMARY KEY(trader_id, symbol)
    )",
];

const UPSERT_ORDER: &str = "INSERT INTO orders(
        trader_id, symbol, order_id, side, position_side, status, avg_price,
        executed_qty, orig_qty, reduce_only, close_position, type, time, update_time, raw_json)
    VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
    ON CONFLICT(trader_id, symbol, order_id) DO UPDATE SET
        side = excluded.side,
        position_side = excluded.position_side,
        status = excluded.status,
        avg_price = excluded.avg_price,
        executed_qty = excluded.executed_qty,
        orig_qty = excluded.orig_qty,
        reduce_only = excluded.reduce_only,
        close_position = excluded.close_position,
        type = excluded.type,
        time = excluded.time,
        update_time = excluded.update_time,
        raw_json = excluded.raw_json";

const UPSERT_CURSOR: &str = "INSERT INTO reconcile_state(trader_id, symbol, last_order_id, last_fetch_time)
    VALUES(?,?,?,?)
    ON CONFLICT(trader_id, symbol) DO UPDATE SET
        last_order_id = excluded.last_order_id,
        last_fetch_time = excluded.last_fetch_time";

const ORDER_COLUMNS: &str = "symbol, order_id, side, position_side, status, avg_price, executed_qty, \
     orig_qty, reduce_only, close_position, type, time, update_time, raw_json";

/// Order store persisted in a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Open (creating if needed) the database at `path` and ensure the schema
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("Order store opened at {}", path.display());
        Ok(store)
    }

    /// Open the database described by configuration
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.path, config.max_connections).await
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Number of stored orders across all traders
    pub async fn order_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_decimal(text: &str) -> Decimal {
    text.trim().parse().unwrap_or(Decimal::ZERO)
}

fn order_from_row(row: &SqliteRow) -> Result<ExchangeOrder> {
    let side: String = row.try_get("side")?;
    let position_side: String = row.try_get("position_side")?;
    let status: String = row.try_get("status")?;
    let avg_price: String = row.try_get("avg_price")?;
    let executed_qty: String = row.try_get("executed_qty")?;
    let orig_qty: String = row.try_get("orig_qty")?;
    let raw_payload: String = row.try_get("raw_json")?;

    Ok(ExchangeOrder {
        order_id: row.try_get("order_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse().map_err(ReconcileError::Internal)?,
        position_side: position_side.parse().map_err(ReconcileError::Internal)?,
        status: OrderStatus::from(status.as_str()),
        executed_qty: parse_decimal(&executed_qty),
        orig_qty: parse_decimal(&orig_qty),
        avg_price: parse_decimal(&avg_price),
        limit_price: ExchangeOrder::limit_price_from_raw(&raw_payload),
        reduce_only: row.try_get("reduce_only")?,
        close_position: row.try_get("close_position")?,
        order_type: row.try_get("type")?,
        time: row.try_get("time")?,
        update_time: row.try_get("update_time")?,
        raw_payload,
    })
}

/// Decode rows, skipping the ones that cannot be trusted
fn orders_from_rows(rows: &[SqliteRow]) -> Vec<ExchangeOrder> {
    rows.iter()
        .filter_map(|row| match order_from_row(row) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable order row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn record_symbol(&self, trader: &str, symbol: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO symbols(trader_id, symbol, first_seen) VALUES(?,?,?)",
        )
        .bind(trader)
        .bind(symbol)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn symbols(&self, trader: Option<&str>) -> Result<Vec<(String, String)>> {
        let rows = match trader {
            Some(trader) => {
                sqlx::query(
                    "SELECT trader_id, symbol FROM symbols WHERE trader_id = ? ORDER BY trader_id, symbol",
                )
                .bind(trader)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT trader_id, symbol FROM symbols ORDER BY trader_id, symbol")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| -> Result<(String, String)> {
                Ok((row.try_get("trader_id")?, row.try_get("symbol")?))
            })
            .collect()
    }

    async fn cursor(&self, trader: &str, symbol: &str) -> Result<Option<ReconcileCursor>> {
        let row = sqlx::query(
            "SELECT last_order_id, last_fetch_time FROM reconcile_state WHERE trader_id = ? AND symbol = ?",
        )
        .bind(trader)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ReconcileCursor {
                last_order_id: row.try_get("last_order_id")?,
                last_fetch_time: row.try_get("last_fetch_time")?,
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, orders), fields(batch = orders.len()))]
    async fn ingest(
        &self,
        trader: &str,
        symbol: &str,
        orders: &[ExchangeOrder],
    ) -> Result<IngestOutcome> {
        if orders.is_empty() {
            let cursor = self.cursor(trader, symbol).await?;
            return Ok(IngestOutcome {
                cursor: cursor.map_or(0, |c| c.last_order_id),
                ..IngestOutcome::default()
            });
        }

        let mut tx = self.pool.begin().await?;
        let mut outcome = IngestOutcome::default();

        for order in orders {
            if order.order_id <= 0 {
                warn!(order_id = order.order_id, "Skipping order without id");
                outcome.skipped += 1;
                continue;
            }
            let written = sqlx::query(UPSERT_ORDER)
                .bind(trader)
                .bind(symbol)
                .bind(order.order_id)
                .bind(order.side.to_string())
                .bind(order.position_side.to_string())
                .bind(order.status.as_str())
                .bind(order.avg_price.to_string())
                .bind(order.executed_qty.to_string())
                .bind(order.orig_qty.to_string())
                .bind(order.reduce_only)
                .bind(order.close_position)
                .bind(order.order_type.as_str())
                .bind(order.time)
                .bind(order.update_time)
                .bind(order.raw_payload.as_str())
                .execute(&mut *tx)
                .await;

            match written {
                Ok(_) => outcome.written += 1,
                Err(e) => {
                    warn!(order_id = order.order_id, error = %e, "Failed to write order");
                    outcome.skipped += 1;
                }
            }
        }

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT last_order_id FROM reconcile_state WHERE trader_id = ? AND symbol = ?",
        )
        .bind(trader)
        .bind(symbol)
        .fetch_optional(&mut *tx)
        .await?;

        let batch_max = orders.iter().map(|o| o.order_id).max().unwrap_or(0);
        outcome.cursor = previous.unwrap_or(0).max(batch_max);

        sqlx::query(UPSERT_CURSOR)
            .bind(trader)
            .bind(symbol)
            .bind(outcome.cursor)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(written = outcome.written, cursor = outcome.cursor, "Batch committed");
        Ok(outcome)
    }

    async fn query_orders(&self, trader: &str) -> Result<Vec<ExchangeOrder>> {
        let sql = format!("SELECT {} FROM orders WHERE trader_id = ?", ORDER_COLUMNS);
        let rows = sqlx::query(&sql).bind(trader).fetch_all(&self.pool).await?;
        Ok(orders_from_rows(&rows))
    }

    async fn query_orders_between(
        &self,
        trader: &str,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<ExchangeOrder>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE trader_id = ? AND symbol = ? AND time BETWEEN ? AND ? ORDER BY time, order_id",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(trader)
            .bind(symbol)
            .bind(start_ms)
            .bind(end_ms)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders_from_rows(&rows))
    }
}
