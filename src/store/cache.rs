//! Grouped, read-only view of one trader's orders used by the matcher

use std::collections::HashMap;

use crate::common::types::{ExchangeOrder, PositionSide};

/// Key of one order group inside a trader's cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub symbol: String,
    pub position_side: PositionSide,
}

impl GroupKey {
    pub fn new(symbol: impl Into<String>, position_side: PositionSide) -> Self {
        Self {
            symbol: symbol.into(),
            position_side,
        }
    }
}

/// Orders to match against, together with the position they act on.
///
/// `position` is the position the decision refers to (long or short); for a
/// hedge-neutral fallback list the orders report `BOTH` but the expected
/// fill side is still derived from `position`.
#[derive(Debug, Clone, Copy)]
pub struct CandidateList<'a> {
    pub position: PositionSide,
    pub orders: &'a [ExchangeOrder],
}

/// One trader's orders grouped by (symbol, position side)
#[derive(Debug, Clone, Default)]
pub struct OrderCache {
    groups: HashMap<GroupKey, Vec<ExchangeOrder>>,
}

impl OrderCache {
    /// Group and sort orders ascending by (creation time, order id)
    pub fn from_orders(orders: impl IntoIterator<Item = ExchangeOrder>) -> Self {
        let mut groups: HashMap<GroupKey, Vec<ExchangeOrder>> = HashMap::new();
        for order in orders {
            let key = GroupKey::new(order.symbol.clone(), order.position_side);
            groups.entry(key).or_default().push(order);
        }
        for list in groups.values_mut() {
            list.sort_by_key(|o| (o.time, o.order_id));
        }
        Self { groups }
    }

    pub fn group(&self, symbol: &str, position_side: PositionSide) -> &[ExchangeOrder] {
        self.groups
            .get(&GroupKey::new(symbol, position_side))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Candidates for a position: its own group, or the `BOTH` group when
    /// the account reported nothing for that side
    pub fn candidates(&self, symbol: &str, position: PositionSide) -> Option<CandidateList<'_>> {
        let primary = self.group(symbol, position);
        let orders = if primary.is_empty() {
            self.group(symbol, PositionSide::Both)
        } else {
            primary
        };
        if orders.is_empty() {
            None
        } else {
            Some(CandidateList { position, orders })
        }
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }
}
