//! Futures REST message types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{ExchangeOrder, OrderStatus, PositionSide, Side};

/// One element of the `allOrders` response.
///
/// Numeric fields arrive as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllOrdersEntry {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<String>,
    #[serde(default)]
    pub orig_qty: Option<String>,
    pub side: String,
    #[serde(default)]
    pub position_side: String,
    pub status: String,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub orig_type: String,
    pub time: i64,
    #[serde(default)]
    pub update_time: i64,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

fn parse_decimal(field: &Option<String>) -> Decimal {
    field
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(Decimal::ZERO)
}

impl AllOrdersEntry {
    /// Normalize into an [`ExchangeOrder`], keeping `raw` as the audit payload
    pub fn into_exchange_order(self, raw: String) -> Result<ExchangeOrder, String> {
        let side: Side = self.side.parse()?;
        let position_side: PositionSide = self.position_side.parse()?;

        Ok(ExchangeOrder {
            order_id: self.order_id,
            side,
            position_side,
            status: OrderStatus::from(self.status.as_str()),
            executed_qty: parse_decimal(&self.executed_qty),
            orig_qty: parse_decimal(&self.orig_qty),
            avg_price: parse_decimal(&self.avg_price),
            limit_price: parse_decimal(&self.price),
            reduce_only: self.reduce_only,
            close_position: self.close_position,
            order_type: self.order_type,
            time: self.time,
            update_time: self.update_time,
            symbol: self.symbol,
            raw_payload: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ENTRY: &str = r#"{
        "avgPrice": "0.00000",
        "clientOrderId": "abc",
        "cumQuote": "0",
        "executedQty": "10",
        "orderId": 1917641,
        "origQty": "10",
        "origType": "TRAILING_STOP_MARKET",
        "price": "101.5",
        "reduceOnly": true,
        "side": "SELL",
        "positionSide": "LONG",
        "status": "FILLED",
        "stopPrice": "9300",
        "closePosition": false,
        "symbol": "BTCUSDT",
        "time": 1579276756075,
        "timeInForce": "GTC",
        "type": "TRAILING_STOP_MARKET",
        "updateTime": 1579276756075,
        "workingType": "CONTRACT_PRICE"
    }"#;

    #[test]
    fn test_normalize_entry() {
        let entry: AllOrdersEntry = serde_json::from_str(ENTRY).unwrap();
        let order = entry.into_exchange_order(ENTRY.to_string()).unwrap();

        assert_eq!(order.order_id, 1917641);
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.position_side, PositionSide::Long);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_qty, dec!(10));
        assert_eq!(order.avg_price, Decimal::ZERO);
        // zero average price falls back to the limit price
        assert_eq!(order.fill_price(), dec!(101.5));
        assert!(order.reduce_only);
        assert_eq!(order.raw_payload, ENTRY);
    }

    #[test]
    fn test_unknown_side_is_rejected() {
        let mut entry: AllOrdersEntry = serde_json::from_str(ENTRY).unwrap();
        entry.side = "HOLD".to_string();
        assert!(entry.into_exchange_order(String::new()).is_err());
    }
}
