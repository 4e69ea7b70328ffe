//! Synthesizing the close a decision log never recorded

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::tracker::PositionTracker;
use crate::common::errors::Result;
use crate::common::types::{ActionKind, DecisionAction, ExchangeOrder};
use crate::decision_log::{write_new_decision_file, CompletionRecord};

/// Deterministic name of the completion file for `order`
pub fn completion_file_name(order: &ExchangeOrder) -> String {
    let stamp = order
        .created_at()
        .map(|t| t.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| order.time.to_string());
    format!("decision_reconcile_{}_{}.json", stamp, order.order_id)
}

/// Close action for `tracker` built from the order that closed it.
///
/// A reduce-only order without close-position is recorded as a partial close.
pub fn synthesize_close(tracker: &PositionTracker, order: &ExchangeOrder) -> DecisionAction {
    let action = if order.reduce_only && !order.close_position {
        ActionKind::PartialClose
    } else {
        ActionKind::close_for(tracker.key.side)
    };

    DecisionAction {
        action,
        symbol: tracker.key.symbol.clone(),
        quantity: order.executed_qty,
        leverage: tracker.open.leverage,
        price: order.fill_price(),
        order_id: order.order_id,
        timestamp: order.created_at().unwrap_or(tracker.open.timestamp),
        success: true,
        error: String::new(),
    }
}

/// A completion file that was written
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub path: PathBuf,
    pub action: DecisionAction,
}

/// Write the completion for `tracker` into `dir`.
///
/// Returns `None` when the file already exists from an earlier run.
pub fn write_completion(
    dir: impl AsRef<Path>,
    tracker: &PositionTracker,
    order: &ExchangeOrder,
) -> Result<Option<Completion>> {
    let action = synthesize_close(tracker, order);
    let path = dir.as_ref().join(completion_file_name(order));
    let record = CompletionRecord {
        timestamp: action.timestamp,
        decisions: vec![action.clone()],
    };

    if !write_new_decision_file(&path, &record)? {
        debug!("Completion {} already exists", path.display());
        return Ok(None);
    }
    info!(
        symbol = %action.symbol,
        action = %action.action,
        order_id = action.order_id,
        "Completed missing close: {}",
        path.display()
    );
    Ok(Some(Completion { path, action }))
}
