//! Signed REST client for futures order history

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::auth::{sign_query, API_KEY_HEADER};
use super::messages::{AllOrdersEntry, ApiErrorBody};
use crate::common::errors::{ReconcileError, Result};
use crate::common::traits::OrderSource;
use crate::common::types::ExchangeOrder;
use crate::config::types::{ApiCredentials, ExchangeConfig, FuturesMarket};

/// REST client for the futures `allOrders` endpoint
#[derive(Debug, Clone)]
pub struct BinanceFuturesClient {
    /// HTTP client
    client: Client,
    /// Base URL for the REST API
    base_url: String,
    /// Market family, selects the path prefix
    market: FuturesMarket,
    /// API credentials for signed endpoints
    credentials: Option<ApiCredentials>,
    /// Optional `recvWindow` parameter
    recv_window_ms: Option<u64>,
}

impl BinanceFuturesClient {
    /// Create a new REST client (unauthenticated)
    pub fn new(base_url: &str, market: FuturesMarket) -> Result<Self> {
        Self::with_timeout(base_url, market, Duration::from_secs(15))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(base_url: &str, market: FuturesMarket, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            market,
            credentials: None,
            recv_window_ms: None,
        })
    }

    /// Create a client from configuration
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let mut client = Self::with_timeout(
            &config.base_url(),
            config.market,
            Duration::from_secs(config.request_timeout_seconds),
        )?;
        client.recv_window_ms = config.recv_window_ms;
        Ok(client)
    }

    /// Set API credentials for signed requests
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Build the signed query string for `allOrders`
    fn signed_query(
        &self,
        credentials: &ApiCredentials,
        symbol: &str,
        from_order_id: Option<i64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        timestamp: i64,
    ) -> Result<String> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("symbol", symbol);
        if let Some(id) = from_order_id.filter(|id| *id > 0) {
            query.append_pair("orderId", &id.to_string());
        }
        if let Some(start) = start_time.filter(|t| *t > 0) {
            query.append_pair("startTime", &start.to_string());
        }
        if let Some(end) = end_time.filter(|t| *t > 0) {
            query.append_pair("endTime", &end.to_string());
        }
        if let Some(window) = self.recv_window_ms {
            query.append_pair("recvWindow", &window.to_string());
        }
        query.append_pair("timestamp", &timestamp.to_string());
        let query = query.finish();

        let signature = sign_query(&credentials.secret_key, &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Get all orders of a symbol (active, canceled and filled)
    ///
    /// # Arguments
    /// * `symbol` - Futures symbol, e.g. `BTCUSDT`
    /// * `from_order_id` - Return orders with id >= this id
    /// * `start_time` / `end_time` - Creation time window in epoch milliseconds
    #[instrument(skip(self))]
    pub async fn all_orders(
        &self,
        symbol: &str,
        from_order_id: Option<i64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<ExchangeOrder>> {
        if symbol.trim().is_empty() {
            return Err(ReconcileError::InvalidResponse(
                "symbol must not be empty".to_string(),
            ));
        }
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ReconcileError::Authentication("allOrders requires API credentials".to_string())
        })?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let query = self.signed_query(
            credentials,
            symbol,
            from_order_id,
            start_time,
            end_time,
            timestamp,
        )?;
        let url = format!("{}{}?{}", self.base_url, self.market.all_orders_path(), query);
        debug!("Fetching orders for {} from {}", symbol, self.market.all_orders_path());

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &credentials.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_for_status(response).await);
        }

        let raw: Vec<serde_json::Value> = response.json().await?;
        let mut orders = Vec::with_capacity(raw.len());
        for value in raw {
            let payload = value.to_string();
            let parsed = serde_json::from_value::<AllOrdersEntry>(value)
                .map_err(|e| e.to_string())
                .and_then(|entry| entry.into_exchange_order(payload));
            match parsed {
                Ok(order) => orders.push(order),
                Err(e) => warn!(symbol = symbol, error = %e, "Skipping undecodable order"),
            }
        }

        Ok(orders)
    }

    /// Map a non-2xx response to a typed error
    async fn error_for_status(response: reqwest::Response) -> ReconcileError {
        let status = response.status();
        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| format!("code {}: {}", e.code, e.msg))
            .unwrap_or(body);

        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => ReconcileError::RateLimit {
                message,
                retry_after_seconds,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ReconcileError::Authentication(message)
            }
            _ => ReconcileError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, message
            )),
        }
    }
}

#[async_trait]
impl OrderSource for BinanceFuturesClient {
    async fn fetch_orders(
        &self,
        symbol: &str,
        from_order_id: Option<i64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<ExchangeOrder>> {
        self.all_orders(symbol, from_order_id, start_time, end_time)
            .await
    }
}
