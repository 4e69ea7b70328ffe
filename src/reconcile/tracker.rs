//! Per-position state rebuilt by replaying a trader's decisions in order

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::matcher::{deviation, MatchKind, Matcher};
use super::report::Discrepancy;
use crate::common::types::{ActionKind, DecisionAction, PositionSide};
use crate::store::OrderCache;

/// Sides a partial close is attached to when its position is unknown
pub(super) const PARTIAL_CLOSE_SIDES: [PositionSide; 2] = [PositionSide::Long, PositionSide::Short];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub symbol: String,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }
}

/// One partial close applied to a tracked position
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCloseLeg {
    pub action: DecisionAction,
    /// Percentage the model planned to close, when the log recorded it
    pub close_percentage: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullClose {
    pub time: DateTime<Utc>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionTracker {
    pub key: PositionKey,
    pub open: DecisionAction,
    pub partial_closes: Vec<PartialCloseLeg>,
    pub total_closed: Decimal,
    pub full_close: Option<FullClose>,
}

impl PositionTracker {
    fn opened_by(key: PositionKey, open: DecisionAction) -> Self {
        Self {
            key,
            open,
            partial_closes: Vec::new(),
            total_closed: Decimal::ZERO,
            full_close: None,
        }
    }

    pub fn open_quantity(&self) -> Decimal {
        self.open.quantity
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open.timestamp
    }

    pub fn is_closed(&self) -> bool {
        self.full_close.is_some()
    }

    /// Quantity left for the full close after all partial closes
    pub fn expected_remaining(&self) -> Decimal {
        self.open_quantity() - self.total_closed
    }
}

/// What replaying one action did to the book
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened(PositionKey),
    /// A new open replaced a tracker that was never fully closed
    Reopened {
        key: PositionKey,
        previous: Box<PositionTracker>,
    },
    PartiallyClosed(PositionKey),
    Closed(PositionKey),
    /// Action does not affect any tracked position
    Ignored,
}

/// All trackers of one trader during one pass
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    trackers: BTreeMap<PositionKey, PositionTracker>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PositionKey) -> Option<&PositionTracker> {
        self.trackers.get(key)
    }

    pub fn trackers(&self) -> impl Iterator<Item = &PositionTracker> {
        self.trackers.values()
    }

    /// Trackers with no full close, in key order
    pub fn unresolved(&self) -> impl Iterator<Item = &PositionTracker> {
        self.trackers.values().filter(|t| !t.is_closed())
    }

    /// Side of the first open, not fully closed position on `symbol`
    pub fn open_side_for(&self, symbol: &str) -> Option<PositionSide> {
        PARTIAL_CLOSE_SIDES.into_iter().find(|side| {
            self.trackers
                .get(&PositionKey::new(symbol, *side))
                .map_or(false, |t| !t.is_closed())
        })
    }

    /// Replay one successful action
    pub fn apply(&mut self, action: &DecisionAction, close_percentage: Option<Decimal>) -> Transition {
        if !action.success {
            return Transition::Ignored;
        }

        match &action.action {
            kind if kind.is_open() => {
                let Some(side) = kind.position_side() else {
                    return Transition::Ignored;
                };
                let key = PositionKey::new(action.symbol.clone(), side);
                let tracker = PositionTracker::opened_by(key.clone(), action.clone());
                match self.trackers.insert(key.clone(), tracker) {
                    Some(previous) if !previous.is_closed() => Transition::Reopened {
                        key,
                        previous: Box::new(previous),
                    },
                    _ => Transition::Opened(key),
                }
            }
            ActionKind::PartialClose => {
                let Some(side) = self.open_side_for(&action.symbol) else {
                    return Transition::Ignored;
                };
                let key = PositionKey::new(action.symbol.clone(), side);
                match self.trackers.get_mut(&key) {
                    Some(tracker) => {
                        tracker.total_closed += action.quantity;
                        tracker.partial_closes.push(PartialCloseLeg {
                            action: action.clone(),
                            close_percentage,
                        });
                        Transition::PartiallyClosed(key)
                    }
                    None => Transition::Ignored,
                }
            }
            kind if kind.is_close() => {
                let Some(side) = kind.position_side() else {
                    return Transition::Ignored;
                };
                let key = PositionKey::new(action.symbol.clone(), side);
                match self.trackers.get_mut(&key) {
                    Some(tracker) => {
                        tracker.full_close = Some(FullClose {
                            time: action.timestamp,
                            quantity: action.quantity,
                        });
                        Transition::Closed(key)
                    }
                    None => Transition::Ignored,
                }
            }
            _ => Transition::Ignored,
        }
    }

    /// Check every partial close against the order cache and every closed
    /// position's quantities against each other.
    ///
    /// Report only: nothing in the book is modified.
    pub fn validate(&self, cache: &OrderCache, matcher: &Matcher) -> Vec<Discrepancy> {
        let threshold = matcher.threshold(MatchKind::PartialClose);
        let mut findings = Vec::new();

        for tracker in self.trackers.values() {
            if tracker.partial_closes.is_empty() {
                continue;
            }
            let key = &tracker.key;
            let candidates: Vec<_> = cache.candidates(&key.symbol, key.side).into_iter().collect();

            for (i, leg) in tracker.partial_closes.iter().enumerate() {
                let leg_no = i + 1;
                let pc = &leg.action;
                match matcher.find_match(pc, MatchKind::PartialClose, &candidates) {
                    None => findings.push(Discrepancy::UnmatchedPartialClose {
                        symbol: key.symbol.clone(),
                        side: key.side,
                        leg: leg_no,
                        quantity: pc.quantity,
                        price: pc.price,
                        closed_at: pc.timestamp,
                    }),
                    Some(found) if found.exceeds_threshold => {
                        findings.push(Discrepancy::PartialCloseDeviation {
                            symbol: key.symbol.clone(),
                            side: key.side,
                            leg: leg_no,
                            quantity_before: pc.quantity,
                            quantity_after: found.quantity,
                            quantity_deviation: found.quantity_deviation,
                            price_before: pc.price,
                            price_after: found.price,
                            price_deviation: found.price_deviation,
                            closed_at: pc.timestamp,
                        })
                    }
                    Some(found) if found.order.order_id != pc.order_id => {
                        findings.push(Discrepancy::PartialCloseOrderId {
                            symbol: key.symbol.clone(),
                            side: key.side,
                            leg: leg_no,
                            before: pc.order_id,
                            after: found.order.order_id,
                            closed_at: pc.timestamp,
                        })
                    }
                    Some(_) => {}
                }
            }

            if let Some(full) = tracker.full_close {
                let expected = tracker.expected_remaining();
                let variance = deviation(expected, full.quantity);
                if variance > threshold {
                    findings.push(Discrepancy::QuantityVariance {
                        symbol: key.symbol.clone(),
                        side: key.side,
                        open_quantity: tracker.open_quantity(),
                        partial_total: tracker.total_closed,
                        expected_remaining: expected,
                        full_close_quantity: full.quantity,
                        deviation: variance,
                    });
                }
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{ExchangeOrder, OrderStatus, Side};
    use rust_decimal_macros::dec;

    const T0: i64 = 1_762_660_800_000;
    const MINUTE: i64 = 60_000;

    fn act(kind: ActionKind, quantity: Decimal, at: i64) -> DecisionAction {
        DecisionAction {
            action: kind,
            symbol: "SOLUSDT".to_string(),
            quantity,
            leverage: 5,
            price: dec!(150),
            order_id: 0,
            timestamp: DateTime::<Utc>::from_timestamp_millis(at).unwrap(),
            success: true,
            error: String::new(),
        }
    }

    fn sell(id: i64, quantity: Decimal, at: i64) -> ExchangeOrder {
        ExchangeOrder {
            order_id: id,
            symbol: "SOLUSDT".to_string(),
            side: Side::Sell,
            position_side: PositionSide::Long,
            status: OrderStatus::Filled,
            executed_qty: quantity,
            orig_qty: quantity,
            avg_price: dec!(150),
            limit_price: Decimal::ZERO,
            reduce_only: true,
            close_position: false,
            order_type: "MARKET".to_string(),
            time: at,
            update_time: at,
            raw_payload: String::new(),
        }
    }

    fn long_key() -> PositionKey {
        PositionKey::new("SOLUSDT", PositionSide::Long)
    }

    fn replay(book: &mut PositionBook, actions: &[DecisionAction]) {
        for a in actions {
            book.apply(a, None);
        }
    }

    #[test]
    fn test_open_partial_close_lifecycle() {
        let mut book = PositionBook::new();
        assert_eq!(
            book.apply(&act(ActionKind::OpenLong, dec!(10), T0), None),
            Transition::Opened(long_key())
        );
        assert_eq!(book.open_side_for("SOLUSDT"), Some(PositionSide::Long));
        assert_eq!(
            book.apply(&act(ActionKind::PartialClose, dec!(4), T0 + MINUTE), Some(dec!(40))),
            Transition::PartiallyClosed(long_key())
        );
        assert_eq!(
            book.apply(&act(ActionKind::CloseLong, dec!(6), T0 + 2 * MINUTE), None),
            Transition::Closed(long_key())
        );

        let tracker = book.get(&long_key()).unwrap();
        assert!(tracker.is_closed());
        assert_eq!(tracker.total_closed, dec!(4));
        assert_eq!(tracker.expected_remaining(), dec!(6));
        assert_eq!(tracker.partial_closes[0].close_percentage, Some(dec!(40)));
        assert_eq!(book.open_side_for("SOLUSDT"), None);
        assert_eq!(book.unresolved().count(), 0);
    }

    #[test]
    fn test_unresolved_open_is_overwritten_and_flagged() {
        let mut book = PositionBook::new();
        book.apply(&act(ActionKind::OpenLong, dec!(10), T0), None);
        let transition = book.apply(&act(ActionKind::OpenLong, dec!(7), T0 + MINUTE), None);

        match transition {
            Transition::Reopened { key, previous } => {
                assert_eq!(key, long_key());
                assert_eq!(previous.open_quantity(), dec!(10));
            }
            other => panic!("expected reopen, got {:?}", other),
        }
        assert_eq!(book.get(&long_key()).unwrap().open_quantity(), dec!(7));

        book.apply(&act(ActionKind::CloseLong, dec!(7), T0 + 2 * MINUTE), None);
        assert_eq!(
            book.apply(&act(ActionKind::OpenLong, dec!(3), T0 + 3 * MINUTE), None),
            Transition::Opened(long_key())
        );
    }

    #[test]
    fn test_failed_and_orphan_actions_are_ignored() {
        let mut book = PositionBook::new();
        let mut failed = act(ActionKind::OpenShort, dec!(1), T0);
        failed.success = false;
        assert_eq!(book.apply(&failed, None), Transition::Ignored);
        assert_eq!(
            book.apply(&act(ActionKind::PartialClose, dec!(1), T0), None),
            Transition::Ignored
        );
        assert_eq!(
            book.apply(&act(ActionKind::CloseShort, dec!(1), T0), None),
            Transition::Ignored
        );
        assert_eq!(book.apply(&act(ActionKind::Hold, dec!(0), T0), None), Transition::Ignored);
        assert_eq!(book.trackers().count(), 0);
    }

    #[test]
    fn test_partial_close_sum_validation() {
        let orders = vec![
            sell(1, dec!(4), T0 + MINUTE),
            sell(2, dec!(3), T0 + 2 * MINUTE),
        ];
        let cache = OrderCache::from_orders(orders);
        let matcher = Matcher::default();

        let mut first = act(ActionKind::PartialClose, dec!(4), T0 + MINUTE);
        first.order_id = 1;
        let mut second = act(ActionKind::PartialClose, dec!(3), T0 + 2 * MINUTE);
        second.order_id = 2;

        let mut book = PositionBook::new();
        replay(
            &mut book,
            &[
                act(ActionKind::OpenLong, dec!(10), T0),
                first.clone(),
                second.clone(),
                act(ActionKind::CloseLong, dec!(3), T0 + 3 * MINUTE),
            ],
        );
        assert!(book.validate(&cache, &matcher).is_empty());

        let mut book = PositionBook::new();
        replay(
            &mut book,
            &[
                act(ActionKind::OpenLong, dec!(10), T0),
                first,
                second,
                act(ActionKind::CloseLong, dec!(2.5), T0 + 3 * MINUTE),
            ],
        );
        let findings = book.validate(&cache, &matcher);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            Discrepancy::QuantityVariance {
                expected_remaining,
                full_close_quantity,
                deviation,
                ..
            } => {
                assert_eq!(*expected_remaining, dec!(3));
                assert_eq!(*full_close_quantity, dec!(2.5));
                assert!(*deviation > dec!(0.166) && *deviation < dec!(0.167));
            }
            other => panic!("unexpected finding {:?}", other),
        }
    }

    #[test]
    fn test_partial_close_leg_findings() {
        let cache = OrderCache::from_orders(vec![
            sell(1, dec!(4), T0 + MINUTE),
            sell(2, dec!(5), T0 + 10 * MINUTE),
        ]);
        let matcher = Matcher::default();

        let mut book = PositionBook::new();
        replay(
            &mut book,
            &[
                act(ActionKind::OpenLong, dec!(10), T0),
                // order id missing
                act(ActionKind::PartialClose, dec!(4), T0 + MINUTE),
                // quantity off by 20%
                act(ActionKind::PartialClose, dec!(4), T0 + 10 * MINUTE),
                // nothing within the window
                act(ActionKind::PartialClose, dec!(1), T0 + 120 * MINUTE),
            ],
        );

        let findings = book.validate(&cache, &matcher);
        assert_eq!(findings.len(), 3);
        assert!(matches!(findings[0], Discrepancy::PartialCloseOrderId { leg: 1, after: 1, .. }));
        assert!(matches!(findings[1], Discrepancy::PartialCloseDeviation { leg: 2, .. }));
        assert!(matches!(findings[2], Discrepancy::UnmatchedPartialClose { leg: 3, .. }));
    }
}
