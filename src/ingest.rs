//! Incremental order fetching: exchange -> order store

use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::common::errors::{ReconcileError, Result};
use crate::common::traits::{IngestOutcome, OrderSource, OrderStore};
use crate::config::types::AppConfig;
use crate::exchange::BinanceFuturesClient;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Totals of one fetch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub traders: usize,
    /// Traders skipped for lack of credentials
    pub skipped_traders: usize,
    pub symbols: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub orders_written: usize,
}

/// Fetches new orders per (trader, symbol) and ingests them in one batch each
#[derive(Debug)]
pub struct OrderFetcher<'a, S: OrderStore + ?Sized> {
    store: &'a S,
    interval: Duration,
    lookback_days: i64,
}

impl<'a, S: OrderStore + ?Sized> OrderFetcher<'a, S> {
    pub fn new(store: &'a S, interval: Duration, lookback_days: i64) -> Self {
        Self {
            store,
            interval,
            lookback_days,
        }
    }

    /// Fetch everything since the cursor (or the lookback window on the
    /// first fetch) and ingest it
    #[instrument(skip(self, source))]
    pub async fn fetch_symbol(
        &self,
        source: &dyn OrderSource,
        trader: &str,
        symbol: &str,
    ) -> Result<IngestOutcome> {
        let cursor = self.store.cursor(trader, symbol).await?;

        let orders = match cursor {
            Some(c) if c.last_order_id > 0 => {
                source
                    .fetch_orders(symbol, Some(c.last_order_id), None, None)
                    .await?
            }
            _ => {
                let end = chrono::Utc::now().timestamp_millis();
                let start = end - self.lookback_days * DAY_MS;
                source.fetch_orders(symbol, None, Some(start), Some(end)).await?
            }
        };

        if orders.is_empty() {
            info!("[{}] {} no new orders", trader, symbol);
        }
        let outcome = self.store.ingest(trader, symbol, &orders).await?;
        info!(
            "[{}] {} fetched {} orders, cursor {}",
            trader, symbol, outcome.written, outcome.cursor
        );
        Ok(outcome)
    }

    /// Fetch all `symbols` of one trader, serialized with the configured delay
    pub async fn fetch_trader(
        &self,
        source: &dyn OrderSource,
        trader: &str,
        symbols: &[String],
        summary: &mut FetchSummary,
    ) {
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            summary.symbols += 1;

            match self.fetch_symbol(source, trader, symbol).await {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    summary.orders_written += outcome.written;
                }
                Err(ReconcileError::RateLimit {
                    message,
                    retry_after_seconds,
                }) => {
                    warn!("[{}] {} rate limited: {}", trader, symbol, message);
                    summary.failed += 1;
                    if let Some(seconds) = retry_after_seconds {
                        tokio::time::sleep(Duration::from_secs(seconds)).await;
                    }
                }
                Err(e) => {
                    warn!("[{}] {} fetch failed: {}", trader, symbol, e);
                    summary.failed += 1;
                }
            }
        }
    }
}

/// Group sorted (trader, symbol) pairs by trader
fn group_by_trader(pairs: Vec<(String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (trader, symbol) in pairs {
        match grouped.last_mut() {
            Some((last, symbols)) if *last == trader => symbols.push(symbol),
            _ => grouped.push((trader, vec![symbol])),
        }
    }
    grouped
}

/// Fetch orders for every scanned (trader, symbol) with each trader's own
/// credentials, falling back to the default account
pub async fn fetch_all<S: OrderStore + ?Sized>(store: &S, config: &AppConfig) -> Result<FetchSummary> {
    let fetcher = OrderFetcher::new(
        store,
        Duration::from_secs(config.settings.fetch_interval_seconds),
        config.settings.initial_lookback_days,
    );
    let base = BinanceFuturesClient::from_config(&config.exchange)?;
    let mut summary = FetchSummary::default();

    for (trader, symbols) in group_by_trader(store.symbols(None).await?) {
        summary.traders += 1;
        let Some(credentials) = config.credentials_for(&trader) else {
            warn!("[{}] no API credentials configured, skipping {} symbols", trader, symbols.len());
            summary.skipped_traders += 1;
            continue;
        };

        let client = base.clone().with_credentials(credentials);
        fetcher.fetch_trader(&client, &trader, &symbols, &mut summary).await;
        info!("[{}] done ({} symbols)", trader, symbols.len());
    }

    if summary.failed > 0 {
        error!("{} of {} symbol fetches failed", summary.failed, summary.symbols);
    }
    info!(
        "Fetch finished: traders={}, skipped={}, symbols={}, ok={}, failed={}, orders={}",
        summary.traders,
        summary.skipped_traders,
        summary.symbols,
        summary.succeeded,
        summary.failed,
        summary.orders_written
    );
    Ok(summary)
}
