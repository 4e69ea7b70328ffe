//! In-memory order store with the same semantics as the sqlite store

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::warn;

use crate::common::errors::Result;
use crate::common::traits::{IngestOutcome, OrderStore};
use crate::common::types::{ExchangeOrder, ReconcileCursor};

type OrderKey = (String, String, i64);

#[derive(Debug, Default)]
struct MemoryState {
    symbols: BTreeSet<(String, String)>,
    orders: BTreeMap<OrderKey, ExchangeOrder>,
    cursors: HashMap<(String, String), ReconcileCursor>,
}

/// Order store kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    state: RwLock<MemoryState>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders across all traders
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn record_symbol(&self, trader: &str, symbol: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .symbols
            .insert((trader.to_string(), symbol.to_string())))
    }

    async fn symbols(&self, trader: Option<&str>) -> Result<Vec<(String, String)>> {
        let state = self.state.read().await;
        Ok(state
            .symbols
            .iter()
            .filter(|(t, _)| trader.map_or(true, |wanted| wanted == t))
            .cloned()
            .collect())
    }

    async fn cursor(&self, trader: &str, symbol: &str) -> Result<Option<ReconcileCursor>> {
        let state = self.state.read().await;
        Ok(state
            .cursors
            .get(&(trader.to_string(), symbol.to_string()))
            .copied())
    }

    async fn ingest(
        &self,
        trader: &str,
        symbol: &str,
        orders: &[ExchangeOrder],
    ) -> Result<IngestOutcome> {
        let mut state = self.state.write().await;
        let key = (trader.to_string(), symbol.to_string());
        let previous = state.cursors.get(&key).map_or(0, |c| c.last_order_id);

        if orders.is_empty() {
            return Ok(IngestOutcome {
                cursor: previous,
                ..IngestOutcome::default()
            });
        }

        let mut outcome = IngestOutcome::default();
        for order in orders {
            if order.order_id <= 0 {
                warn!(trader = trader, symbol = symbol, order_id = order.order_id, "Skipping order without id");
                outcome.skipped += 1;
                continue;
            }
            let mut stored = order.clone();
            stored.symbol = symbol.to_string();
            state
                .orders
                .insert((trader.to_string(), symbol.to_string(), order.order_id), stored);
            outcome.written += 1;
        }

        let batch_max = orders.iter().map(|o| o.order_id).max().unwrap_or(0);
        outcome.cursor = previous.max(batch_max);
        state.cursors.insert(
            key,
            ReconcileCursor {
                last_order_id: outcome.cursor,
                last_fetch_time: chrono::Utc::now().timestamp_millis(),
            },
        );
        Ok(outcome)
    }

    async fn query_orders(&self, trader: &str) -> Result<Vec<ExchangeOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|((t, _, _), _)| t == trader)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn query_orders_between(
        &self,
        trader: &str,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<ExchangeOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<ExchangeOrder> = state
            .orders
            .iter()
            .filter(|((t, s, _), o)| {
                t == trader && s == symbol && o.time >= start_ms && o.time <= end_ms
            })
            .map(|(_, o)| o.clone())
            .collect();
        orders.sort_by_key(|o| (o.time, o.order_id));
        Ok(orders)
    }
}
