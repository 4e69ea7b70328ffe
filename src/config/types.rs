//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Order store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Exchange REST configuration
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Per-trader exchange credentials
    #[serde(default)]
    pub traders: Vec<TraderAccount>,
    /// Credentials used for scanned traders that have none of their own
    #[serde(default)]
    pub default_account: Option<ApiCredentials>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
    /// Matching tolerances
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

impl AppConfig {
    /// Credentials to fetch a trader's orders with, falling back to the default account
    pub fn credentials_for(&self, trader_id: &str) -> Option<ApiCredentials> {
        self.traders
            .iter()
            .find(|t| t.id == trader_id)
            .map(|t| ApiCredentials::new(t.api_key.clone(), t.secret_key.clone()))
            .filter(|c| c.is_complete())
            .or_else(|| self.default_account.clone().filter(|c| c.is_complete()))
    }
}

/// Database configuration for the order cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the sqlite database file
    #[serde(default = "default_database_path")]
    pub path: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_path() -> String {
    "reconcile.db".to_string()
}

fn default_max_connections() -> u32 {
    1
}

/// Futures market family, selecting the REST host and path prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuturesMarket {
    /// USDⓈ-M futures (`fapi`)
    #[default]
    #[serde(alias = "fapi")]
    Usdm,
    /// COIN-M futures (`dapi`)
    #[serde(alias = "dapi")]
    Coinm,
}

impl FuturesMarket {
    pub fn default_rest_url(self) -> &'static str {
        match self {
            FuturesMarket::Usdm => "https://fapi.binance.com",
            FuturesMarket::Coinm => "https://dapi.binance.com",
        }
    }

    pub fn all_orders_path(self) -> &'static str {
        match self {
            FuturesMarket::Usdm => "/fapi/v1/allOrders",
            FuturesMarket::Coinm => "/dapi/v1/allOrders",
        }
    }
}

/// Exchange REST configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub market: FuturesMarket,
    /// Override for the REST base URL
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Optional `recvWindow` sent with signed requests
    #[serde(default)]
    pub recv_window_ms: Option<u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            market: FuturesMarket::default(),
            rest_url: None,
            request_timeout_seconds: default_request_timeout(),
            recv_window_ms: None,
        }
    }
}

impl ExchangeConfig {
    pub fn base_url(&self) -> String {
        self.rest_url
            .clone()
            .unwrap_or_else(|| self.market.default_rest_url().to_string())
    }
}

fn default_request_timeout() -> u64 {
    15
}

/// Exchange credentials bound to one trader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderAccount {
    pub id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Root directory holding one sub-directory of decision logs per trader
    #[serde(default = "default_decision_dir")]
    pub decision_dir: String,
    /// Delay between two symbol fetches, in seconds
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_seconds: u64,
    /// History window fetched for a symbol without cursor, in days
    #[serde(default = "default_initial_lookback_days")]
    pub initial_lookback_days: i64,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            decision_dir: default_decision_dir(),
            fetch_interval_seconds: default_fetch_interval(),
            initial_lookback_days: default_initial_lookback_days(),
            log_level: default_log_level(),
        }
    }
}

fn default_decision_dir() -> String {
    "decision_logs".to_string()
}

fn default_fetch_interval() -> u64 {
    3
}

fn default_initial_lookback_days() -> i64 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Matching tolerances used by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Maximum |order time - decision time|, inclusive, in milliseconds
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance_ms: i64,
    /// Deviation above which opens and closes are corrected
    #[serde(default = "default_open_close_threshold")]
    pub open_close_threshold: Decimal,
    /// Deviation above which partial closes are corrected or reported
    #[serde(default = "default_partial_close_threshold")]
    pub partial_close_threshold: Decimal,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            time_tolerance_ms: default_time_tolerance(),
            open_close_threshold: default_open_close_threshold(),
            partial_close_threshold: default_partial_close_threshold(),
        }
    }
}

fn default_time_tolerance() -> i64 {
    30 * 60 * 1000
}

fn default_open_close_threshold() -> Decimal {
    dec!(0.01)
}

fn default_partial_close_threshold() -> Decimal {
    dec!(0.05)
}

/// API credentials for signed requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }
}
