//! Domain types shared by the store, the exchange client and the reconciler

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown order side: {}", other)),
        }
    }
}

/// Position side reported by the exchange.
///
/// `Both` is what one-way (non-hedge) accounts report for every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl PositionSide {
    /// Fill side that opens (increases) a position on this side
    pub fn opening_side(self) -> Side {
        match self {
            PositionSide::Short => Side::Sell,
            PositionSide::Long | PositionSide::Both => Side::Buy,
        }
    }

    /// Fill side that closes (reduces) a position on this side
    pub fn closing_side(self) -> Side {
        match self {
            PositionSide::Short => Side::Buy,
            PositionSide::Long | PositionSide::Both => Side::Sell,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
            PositionSide::Both => write!(f, "BOTH"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            "BOTH" | "" => Ok(PositionSide::Both),
            other => Err(format!("unknown position side: {}", other)),
        }
    }
}

/// Exchange order status
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Other(s) => s,
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a logged decision.
///
/// Unknown verbs are kept verbatim so that rewriting a file never loses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    AutoCloseLong,
    AutoCloseShort,
    PartialClose,
    Wait,
    Hold,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::OpenLong => "open_long",
            ActionKind::OpenShort => "open_short",
            ActionKind::CloseLong => "close_long",
            ActionKind::CloseShort => "close_short",
            ActionKind::AutoCloseLong => "auto_close_long",
            ActionKind::AutoCloseShort => "auto_close_short",
            ActionKind::PartialClose => "partial_close",
            ActionKind::Wait => "wait",
            ActionKind::Hold => "hold",
            ActionKind::Other(s) => s,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ActionKind::OpenLong | ActionKind::OpenShort)
    }

    /// Full close, including the bot's automatic (stop/target) closes
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            ActionKind::CloseLong
                | ActionKind::CloseShort
                | ActionKind::AutoCloseLong
                | ActionKind::AutoCloseShort
        )
    }

    pub fn is_partial_close(&self) -> bool {
        matches!(self, ActionKind::PartialClose)
    }

    /// Whether this action must be backed by a real exchange fill
    pub fn needs_order_match(&self) -> bool {
        self.is_open() || self.is_close() || self.is_partial_close()
    }

    /// Position side named by the verb; `None` for verbs without one
    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            ActionKind::OpenLong | ActionKind::CloseLong | ActionKind::AutoCloseLong => {
                Some(PositionSide::Long)
            }
            ActionKind::OpenShort | ActionKind::CloseShort | ActionKind::AutoCloseShort => {
                Some(PositionSide::Short)
            }
            _ => None,
        }
    }

    /// Full-close verb for a position side
    pub fn close_for(side: PositionSide) -> ActionKind {
        match side {
            PositionSide::Short => ActionKind::CloseShort,
            PositionSide::Long | PositionSide::Both => ActionKind::CloseLong,
        }
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open_long" => ActionKind::OpenLong,
            "open_short" => ActionKind::OpenShort,
            "close_long" => ActionKind::CloseLong,
            "close_short" => ActionKind::CloseShort,
            "auto_close_long" => ActionKind::AutoCloseLong,
            "auto_close_short" => ActionKind::AutoCloseShort,
            "partial_close" => ActionKind::PartialClose,
            "wait" => ActionKind::Wait,
            "hold" => ActionKind::Hold,
            _ => ActionKind::Other(s),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bot-logged decision, as found in the `decisions` array of a log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAction {
    pub action: ActionKind,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(default)]
    pub leverage: i64,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Exchange order id, 0 when the bot did not record one
    #[serde(default)]
    pub order_id: i64,
    /// Actual fill time as recorded by the bot
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

impl DecisionAction {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Neutralize an action that no exchange order backs
    pub fn downgrade_to_wait(&mut self) {
        self.action = ActionKind::Wait;
        self.order_id = 0;
        self.quantity = Decimal::ZERO;
        self.price = Decimal::ZERO;
    }
}

/// Normalized order record from the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub orig_qty: Decimal,
    pub avg_price: Decimal,
    /// Limit price from the raw payload, used when no average fill price exists
    pub limit_price: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    pub order_type: String,
    /// Creation time in epoch milliseconds
    pub time: i64,
    pub update_time: i64,
    /// Verbatim exchange payload, kept for audit
    pub raw_payload: String,
}

impl ExchangeOrder {
    /// Fill price: average price, falling back to the limit price
    pub fn fill_price(&self) -> Decimal {
        if self.avg_price > Decimal::ZERO {
            self.avg_price
        } else {
            self.limit_price
        }
    }

    pub fn is_reducing(&self) -> bool {
        self.reduce_only || self.close_position
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }

    /// Read the limit `price` field out of a raw payload, zero if absent
    pub fn limit_price_from_raw(raw: &str) -> Decimal {
        serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|v| match v.get("price") {
                Some(serde_json::Value::String(s)) => s.parse().ok(),
                Some(serde_json::Value::Number(n)) => n.to_string().parse().ok(),
                _ => None,
            })
            .unwrap_or(Decimal::ZERO)
    }
}

/// Per (trader, symbol) incremental fetch watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileCursor {
    pub last_order_id: i64,
    /// Epoch milliseconds of the last successful batch
    pub last_fetch_time: i64,
}
