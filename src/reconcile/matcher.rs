//! Matching a logged decision to the exchange order that executed it.
//!
//! Decisions and orders share no key, so a match is a filtered nearest-time
//! search: side, reduce flags, fill status, time window and non-zero
//! economics must all agree, and the closest surviving order in time wins.

use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;

use crate::common::types::{ActionKind, DecisionAction, ExchangeOrder, OrderStatus};
use crate::config::types::ReconcileSettings;
use crate::store::CandidateList;

/// Role of the decision being matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Open,
    Close,
    PartialClose,
}

impl MatchKind {
    pub fn for_action(kind: &ActionKind) -> Option<Self> {
        if kind.is_open() {
            Some(MatchKind::Open)
        } else if kind.is_close() {
            Some(MatchKind::Close)
        } else if kind.is_partial_close() {
            Some(MatchKind::PartialClose)
        } else {
            None
        }
    }
}

/// Normalized absolute difference `|a - b| / max(|a|, |b|)`, zero when both are zero
pub fn deviation(a: Decimal, b: Decimal) -> Decimal {
    let denominator = a.abs().max(b.abs());
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    (a - b).abs() / denominator
}

/// The selected order together with how far the decision is from it
#[derive(Debug, Clone, Copy)]
pub struct OrderMatch<'a> {
    pub order: &'a ExchangeOrder,
    /// |order time - decision time| in milliseconds
    pub time_delta_ms: i64,
    pub quantity: Decimal,
    pub price: Decimal,
    pub quantity_deviation: Decimal,
    pub price_deviation: Decimal,
    /// Quantity or price deviation is above the threshold for this kind
    pub exceeds_threshold: bool,
}

/// Pure matcher parameterized by the configured tolerances
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    settings: ReconcileSettings,
}

impl Matcher {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self { settings }
    }

    pub fn threshold(&self, kind: MatchKind) -> Decimal {
        match kind {
            MatchKind::Open | MatchKind::Close => self.settings.open_close_threshold,
            MatchKind::PartialClose => self.settings.partial_close_threshold,
        }
    }

    /// Whether an order could have executed a decision of `kind` on the
    /// list's position, ignoring time
    fn eligible(&self, kind: MatchKind, list: &CandidateList<'_>, order: &ExchangeOrder) -> bool {
        let expected_side = match kind {
            MatchKind::Open => list.position.opening_side(),
            MatchKind::Close | MatchKind::PartialClose => list.position.closing_side(),
        };
        if order.side != expected_side {
            return false;
        }

        let flags_ok = match kind {
            MatchKind::Open => !order.is_reducing(),
            MatchKind::Close | MatchKind::PartialClose => order.is_reducing(),
        };
        if !flags_ok {
            return false;
        }

        let status_ok = match (&order.status, kind) {
            (OrderStatus::Filled, _) => true,
            (OrderStatus::PartiallyFilled | OrderStatus::Canceled, MatchKind::PartialClose) => {
                order.executed_qty > Decimal::ZERO
            }
            _ => false,
        };
        if !status_ok {
            return false;
        }

        order.executed_qty > Decimal::ZERO && order.fill_price() > Decimal::ZERO
    }

    /// Select the order that executed `action`, if any.
    ///
    /// Lists are scanned in order and each list ascending by time; on equal
    /// time deltas the first order scanned is kept.
    pub fn find_match<'a>(
        &self,
        action: &DecisionAction,
        kind: MatchKind,
        candidates: &[CandidateList<'a>],
    ) -> Option<OrderMatch<'a>> {
        let decided_at = action.timestamp_ms();
        let mut best: Option<(&'a ExchangeOrder, i64)> = None;

        for list in candidates {
            for order in list.orders {
                let delta = (order.time - decided_at).abs();
                if delta > self.settings.time_tolerance_ms {
                    continue;
                }
                if !self.eligible(kind, list, order) {
                    continue;
                }
                if best.map_or(true, |(_, best_delta)| delta < best_delta) {
                    best = Some((order, delta));
                }
            }
        }

        let (order, time_delta_ms) = best?;
        let quantity = order.executed_qty;
        let price = order.fill_price();
        let quantity_deviation = deviation(action.quantity, quantity);
        let price_deviation = deviation(action.price, price);
        let threshold = self.threshold(kind);

        debug!(
            symbol = %action.symbol,
            action = %action.action,
            order_id = order.order_id,
            time_delta_ms,
            "Matched decision to order"
        );

        Some(OrderMatch {
            order,
            time_delta_ms,
            quantity,
            price,
            quantity_deviation,
            price_deviation,
            exceeds_threshold: quantity_deviation > threshold || price_deviation > threshold,
        })
    }

    /// Nearest reducing fill that could close an open position, at or after
    /// the open.
    ///
    /// Partial fills are not accepted here: a gap is only completed from an
    /// order the exchange reports as fully filled. Orders in `claimed` already
    /// back another decision and are skipped.
    pub fn find_gap_close<'a>(
        &self,
        open: &DecisionAction,
        candidates: &[CandidateList<'a>],
        claimed: &HashSet<i64>,
    ) -> Option<&'a ExchangeOrder> {
        let opened_at = open.timestamp_ms();
        let mut best: Option<&'a ExchangeOrder> = None;

        for list in candidates {
            for order in list.orders {
                if order.time < opened_at || order.status != OrderStatus::Filled {
                    continue;
                }
                if claimed.contains(&order.order_id) {
                    continue;
                }
                if !self.eligible(MatchKind::Close, list, order) {
                    continue;
                }
                if best.map_or(true, |b| order.time < b.time) {
                    best = Some(order);
                }
            }
        }
        best
    }
}

/// Up to `limit` orders closest in time to `action`, regardless of filters
pub fn nearest_orders<'a>(
    action: &DecisionAction,
    candidates: &[CandidateList<'a>],
    limit: usize,
) -> Vec<&'a ExchangeOrder> {
    let decided_at = action.timestamp_ms();
    let mut orders: Vec<&'a ExchangeOrder> =
        candidates.iter().flat_map(|list| list.orders.iter()).collect();
    orders.sort_by_key(|o| ((o.time - decided_at).abs(), o.order_id));
    orders.truncate(limit);
    orders
}
