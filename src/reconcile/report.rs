//! Human-readable discrepancy reports written next to a trader's logs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::common::errors::Result;
use crate::common::types::{ActionKind, PositionSide};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn percent(ratio: Decimal) -> Decimal {
    (ratio * Decimal::ONE_HUNDRED).round_dp(2)
}

/// One finding of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    /// No order backs the decision; it was rewritten to `wait`
    Downgraded {
        symbol: String,
        action: ActionKind,
        decided_at: DateTime<Utc>,
        quantity: Decimal,
        price: Decimal,
    },
    /// Quantity or price drifted past the threshold and was overwritten
    DataDeviation {
        symbol: String,
        action: ActionKind,
        order_id: i64,
        quantity_before: Decimal,
        quantity_after: Decimal,
        quantity_deviation: Decimal,
        price_before: Decimal,
        price_after: Decimal,
        price_deviation: Decimal,
    },
    OrderIdMismatch {
        symbol: String,
        action: ActionKind,
        before: i64,
        after: i64,
    },
    /// A missing close was synthesized into a new decision file
    Completed {
        symbol: String,
        action: ActionKind,
        order_id: i64,
        quantity: Decimal,
        price: Decimal,
        filled_at: DateTime<Utc>,
        file: String,
    },
    /// A new open replaced one that had never been closed
    OverwrittenOpen {
        symbol: String,
        side: PositionSide,
        previous_quantity: Decimal,
        previous_opened_at: DateTime<Utc>,
        opened_at: DateTime<Utc>,
    },
    UnmatchedPartialClose {
        symbol: String,
        side: PositionSide,
        leg: usize,
        quantity: Decimal,
        price: Decimal,
        closed_at: DateTime<Utc>,
    },
    PartialCloseDeviation {
        symbol: String,
        side: PositionSide,
        leg: usize,
        quantity_before: Decimal,
        quantity_after: Decimal,
        quantity_deviation: Decimal,
        price_before: Decimal,
        price_after: Decimal,
        price_deviation: Decimal,
        closed_at: DateTime<Utc>,
    },
    PartialCloseOrderId {
        symbol: String,
        side: PositionSide,
        leg: usize,
        before: i64,
        after: i64,
        closed_at: DateTime<Utc>,
    },
    /// open - sum(partial closes) disagrees with the recorded full close
    QuantityVariance {
        symbol: String,
        side: PositionSide,
        open_quantity: Decimal,
        partial_total: Decimal,
        expected_remaining: Decimal,
        full_close_quantity: Decimal,
        deviation: Decimal,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::Downgraded {
                symbol,
                action,
                decided_at,
                quantity,
                price,
            } => write!(
                f,
                "[DOWNGRADED] {} {} has no matching order (decided {}, qty {}, price {}) -> wait",
                symbol,
                action,
                decided_at.format(TIME_FORMAT),
                quantity.normalize(),
                price.normalize()
            ),
            Discrepancy::DataDeviation {
                symbol,
                action,
                order_id,
                quantity_before,
                quantity_after,
                quantity_deviation,
                price_before,
                price_after,
                price_deviation,
            } => write!(
                f,
                "[DEVIATION] {} {} order {}: qty {} -> {} ({}%), price {} -> {} ({}%)",
                symbol,
                action,
                order_id,
                quantity_before.normalize(),
                quantity_after.normalize(),
                percent(*quantity_deviation),
                price_before.normalize(),
                price_after.normalize(),
                percent(*price_deviation)
            ),
            Discrepancy::OrderIdMismatch {
                symbol,
                action,
                before,
                after,
            } => write!(f, "[ORDER ID] {} {}: {} -> {}", symbol, action, before, after),
            Discrepancy::Completed {
                symbol,
                action,
                order_id,
                quantity,
                price,
                filled_at,
                file,
            } => write!(
                f,
                "[COMPLETED] {} {} from order {} (qty {}, price {}, filled {}) -> {}",
                symbol,
                action,
                order_id,
                quantity.normalize(),
                price.normalize(),
                filled_at.format(TIME_FORMAT),
                file
            ),
            Discrepancy::OverwrittenOpen {
                symbol,
                side,
                previous_quantity,
                previous_opened_at,
                opened_at,
            } => write!(
                f,
                "[OVERWRITTEN] {} {} open of {} at {} was never closed before the open at {}",
                symbol,
                side,
                previous_quantity.normalize(),
                previous_opened_at.format(TIME_FORMAT),
                opened_at.format(TIME_FORMAT)
            ),
            Discrepancy::UnmatchedPartialClose {
                symbol,
                side,
                leg,
                quantity,
                price,
                closed_at,
            } => write!(
                f,
                "[UNMATCHED] {} {} partial_close #{} has no matching order: qty {}, price {}, at {}",
                symbol,
                side,
                leg,
                quantity.normalize(),
                price.normalize(),
                closed_at.format(TIME_FORMAT)
            ),
            Discrepancy::PartialCloseDeviation {
                symbol,
                side,
                leg,
                quantity_before,
                quantity_after,
                quantity_deviation,
                price_before,
                price_after,
                price_deviation,
                closed_at,
            } => write!(
                f,
                "[DEVIATION] {} {} partial_close #{}: qty {} -> {} ({}%), price {} -> {} ({}%), at {}",
                symbol,
                side,
                leg,
                quantity_before.normalize(),
                quantity_after.normalize(),
                percent(*quantity_deviation),
                price_before.normalize(),
                price_after.normalize(),
                percent(*price_deviation),
                closed_at.format(TIME_FORMAT)
            ),
            Discrepancy::PartialCloseOrderId {
                symbol,
                side,
                leg,
                before,
                after,
                closed_at,
            } => write!(
                f,
                "[ORDER ID] {} {} partial_close #{}: {} -> {}, at {}",
                symbol,
                side,
                leg,
                before,
                after,
                closed_at.format(TIME_FORMAT)
            ),
            Discrepancy::QuantityVariance {
                symbol,
                side,
                open_quantity,
                partial_total,
                expected_remaining,
                full_close_quantity,
                deviation,
            } => write!(
                f,
                "[VARIANCE] {} {} open {} - partial closes {} = expected {}, full close {} ({}%)",
                symbol,
                side,
                open_quantity.normalize(),
                partial_total.normalize(),
                expected_remaining.normalize(),
                full_close_quantity.normalize(),
                percent(*deviation)
            ),
        }
    }
}

/// Which pass produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    OpenMismatch,
    PartialClose,
}

impl ReportKind {
    fn file_prefix(self) -> &'static str {
        match self {
            ReportKind::OpenMismatch => "open_mismatch_report",
            ReportKind::PartialClose => "partial_close_report",
        }
    }

    fn title(self) -> &'static str {
        match self {
            ReportKind::OpenMismatch => "=== Decision log reconciliation report ===",
            ReportKind::PartialClose => "=== Partial close reconciliation report ===",
        }
    }
}

/// Discrepancies of one trader for one pass
#[derive(Debug, Clone)]
pub struct DiscrepancyReport {
    kind: ReportKind,
    trader: String,
    entries: Vec<Discrepancy>,
}

impl DiscrepancyReport {
    pub fn new(kind: ReportKind, trader: impl Into<String>) -> Self {
        Self {
            kind,
            trader: trader.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: Discrepancy) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Discrepancy] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut lines = vec![
            self.kind.title().to_string(),
            format!("Generated: {} UTC", generated_at.format(TIME_FORMAT)),
            format!("Trader ID: {}", self.trader),
            String::new(),
        ];
        lines.extend(self.entries.iter().map(ToString::to_string));
        lines.push(String::new());
        lines.join("\n")
    }

    /// Write the report into `dir`; nothing is written for an empty report.
    ///
    /// An existing report with the same timestamp is kept and a numbered
    /// name is used instead.
    pub fn write_to(&self, dir: impl AsRef<Path>, generated_at: DateTime<Utc>) -> Result<Option<PathBuf>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let body = self.render(generated_at);
        let stem = format!(
            "{}_{}",
            self.kind.file_prefix(),
            generated_at.format("%Y%m%d_%H%M%S")
        );
        let mut n = 0;
        loop {
            let name = if n == 0 {
                format!("{}.txt", stem)
            } else {
                format!("{}_{}.txt", stem, n)
            };
            let path = dir.as_ref().join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
