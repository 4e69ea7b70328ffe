//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{ReconcileError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with RECONCILE__)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("RECONCILE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| ReconcileError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ReconcileError::Configuration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Some("/nonexistent/reconcile.toml")).unwrap();
        assert_eq!(config.database.path, "reconcile.db");
        assert!(config.traders.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[database]
path = "/tmp/orders.db"

[exchange]
market = "coinm"

[[traders]]
id = "binance_trader_1"
api_key = "k"
secret_key = "s"

[reconcile]
open_close_threshold = 0.02
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.database.path, "/tmp/orders.db");
        assert_eq!(config.exchange.base_url(), "https://dapi.binance.com");
        assert_eq!(config.traders.len(), 1);
        assert_eq!(config.traders[0].id, "binance_trader_1");
        assert_eq!(config.reconcile.open_close_threshold, dec!(0.02));
        assert_eq!(config.reconcile.time_tolerance_ms, 1_800_000);
    }
}
