//! Turning a match result into a corrected decision

use super::matcher::OrderMatch;
use super::report::Discrepancy;
use crate::common::types::DecisionAction;

/// Decision after correction, with the finding that justified the change
#[derive(Debug, Clone, PartialEq)]
pub struct Corrected {
    pub action: DecisionAction,
    pub discrepancy: Option<Discrepancy>,
}

/// Apply the outcome of matching `action` against the order cache.
///
/// No match downgrades to `wait`; a match past the threshold takes
/// quantity, price, order id and fill time from the order; a match within
/// the threshold only fixes a differing order id.
pub fn correct(action: &DecisionAction, found: Option<&OrderMatch<'_>>) -> Corrected {
    let mut corrected = action.clone();

    let Some(found) = found else {
        corrected.downgrade_to_wait();
        return Corrected {
            action: corrected,
            discrepancy: Some(Discrepancy::Downgraded {
                symbol: action.symbol.clone(),
                action: action.action.clone(),
                decided_at: action.timestamp,
                quantity: action.quantity,
                price: action.price,
            }),
        };
    };

    let order = found.order;
    if found.exceeds_threshold {
        corrected.quantity = found.quantity;
        corrected.price = found.price;
        corrected.order_id = order.order_id;
        corrected.timestamp = order.created_at().unwrap_or(action.timestamp);
        return Corrected {
            action: corrected,
            discrepancy: Some(Discrepancy::DataDeviation {
                symbol: action.symbol.clone(),
                action: action.action.clone(),
                order_id: order.order_id,
                quantity_before: action.quantity,
                quantity_after: found.quantity,
                quantity_deviation: found.quantity_deviation,
                price_before: action.price,
                price_after: found.price,
                price_deviation: found.price_deviation,
            }),
        };
    }

    if action.order_id != order.order_id {
        corrected.order_id = order.order_id;
        return Corrected {
            action: corrected,
            discrepancy: Some(Discrepancy::OrderIdMismatch {
                symbol: action.symbol.clone(),
                action: action.action.clone(),
                before: action.order_id,
                after: order.order_id,
            }),
        };
    }

    Corrected {
        action: corrected,
        discrepancy: None,
    }
}
