//! Common test utilities and fixtures
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use order_log_reconcile::common::types::{ExchangeOrder, OrderStatus, PositionSide, Side};
use order_log_reconcile::{DecisionAction, DecisionFile};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 2025-11-09 04:00:00 UTC
pub const T0: i64 = 1_762_660_800_000;
pub const MINUTE: i64 = 60_000;

pub fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("valid timestamp")
}

/// A filled, non-reducing order
pub fn order(
    id: i64,
    symbol: &str,
    side: Side,
    position_side: PositionSide,
    time: i64,
    quantity: Decimal,
    price: Decimal,
) -> ExchangeOrder {
    ExchangeOrder {
        order_id: id,
        symbol: symbol.to_string(),
        side,
        position_side,
        status: OrderStatus::Filled,
        executed_qty: quantity,
        orig_qty: quantity,
        avg_price: price,
        limit_price: Decimal::ZERO,
        reduce_only: false,
        close_position: false,
        order_type: "MARKET".to_string(),
        time,
        update_time: time,
        raw_payload: format!(r#"{{"orderId":{},"symbol":"{}"}}"#, id, symbol),
    }
}

pub fn reduce_only(mut order: ExchangeOrder) -> ExchangeOrder {
    order.reduce_only = true;
    order
}

pub fn close_position(mut order: ExchangeOrder) -> ExchangeOrder {
    order.close_position = true;
    order
}

/// One decision object as the bot logs it
pub fn decision(action: &str, symbol: &str, quantity: f64, price: f64, time: i64, order_id: i64) -> Value {
    json!({
        "action": action,
        "symbol": symbol,
        "quantity": quantity,
        "leverage": 5,
        "price": price,
        "order_id": order_id,
        "timestamp": at(time).to_rfc3339(),
        "success": true,
        "error": ""
    })
}

/// Temporary decision log root with one directory per trader
pub struct DecisionDir {
    root: TempDir,
}

impl DecisionDir {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn trader(&self, trader: &str) -> PathBuf {
        let dir = self.root.path().join(trader);
        fs::create_dir_all(&dir).expect("trader dir");
        dir
    }

    /// Write a bot record with the usual surrounding fields
    pub fn write_record(&self, trader: &str, name: &str, time: i64, decisions: Vec<Value>) -> PathBuf {
        let record = json!({
            "timestamp": at(time).to_rfc3339(),
            "cycle_number": 7,
            "input_prompt": "market snapshot ...",
            "cot_trace": "thinking\n  with   odd spacing",
            "decisions": decisions,
            "account_state": {"total_balance": 1000.5, "position_count": 1}
        });
        let path = self.trader(trader).join(name);
        fs::write(&path, serde_json::to_string_pretty(&record).expect("json")).expect("write record");
        path
    }

    pub fn actions(&self, path: &Path) -> Vec<DecisionAction> {
        DecisionFile::read(path).expect("readable decision file").actions().to_vec()
    }

    /// Names of files in a trader directory matching a prefix
    pub fn files_with_prefix(&self, trader: &str, prefix: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.trader(trader))
            .expect("read dir")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .map_or(false, |n| n.to_string_lossy().starts_with(prefix))
            })
            .collect();
        files.sort();
        files
    }
}

/// Sample API responses for testing
pub mod api_responses {
    /// `allOrders` with one open, one close and one malformed entry
    pub const ALL_ORDERS: &str = r#"[
        {
            "orderId": 8389765432,
            "symbol": "BTCUSDT",
            "status": "FILLED",
            "clientOrderId": "web_abc",
            "price": "0",
            "avgPrice": "67250.50",
            "origQty": "0.015",
            "executedQty": "0.015",
            "cumQuote": "1008.7575",
            "timeInForce": "GTC",
            "type": "MARKET",
            "reduceOnly": false,
            "closePosition": false,
            "side": "BUY",
            "positionSide": "LONG",
            "stopPrice": "0",
            "workingType": "CONTRACT_PRICE",
            "priceProtect": false,
            "origType": "MARKET",
            "time": 1762660800123,
            "updateTime": 1762660800200
        },
        {
            "orderId": 8389765999,
            "symbol": "BTCUSDT",
            "status": "FILLED",
            "clientOrderId": "web_def",
            "price": "68000",
            "avgPrice": "0",
            "origQty": "0",
            "executedQty": "0.015",
            "type": "TAKE_PROFIT_MARKET",
            "reduceOnly": true,
            "closePosition": true,
            "side": "SELL",
            "positionSide": "LONG",
            "origType": "TAKE_PROFIT_MARKET",
            "time": 1762664400000,
            "updateTime": 1762664400500
        },
        {
            "orderId": "not-a-number",
            "symbol": "BTCUSDT"
        }
    ]"#;

    pub const RATE_LIMITED: &str = r#"{"code": -1003, "msg": "Too many requests; current limit is 2400 requests per minute."}"#;

    pub const INVALID_KEY: &str = r#"{"code": -2015, "msg": "Invalid API-key, IP, or permissions for action."}"#;
}
