//! Per-trader reconciliation passes and the driver over all traders

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::completion::write_completion;
use super::correction::{correct, Corrected};
use super::matcher::{nearest_orders, MatchKind, Matcher};
use super::report::{Discrepancy, DiscrepancyReport, ReportKind};
use super::tracker::{PositionBook, PositionTracker, Transition, PARTIAL_CLOSE_SIDES};
use crate::common::errors::Result;
use crate::common::traits::OrderStore;
use crate::common::types::{DecisionAction, PositionSide};
use crate::decision_log::{decision_files, trader_dirs, DecisionFile};
use crate::store::{load_grouped, CandidateList, OrderCache};

const NEAREST_CANDIDATES: usize = 5;

/// Which pass to run over the decision logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Correct decisions in place and complete missing closes
    Reconcile,
    /// Validate partial-close chains, report only
    PartialClose,
}

/// Result of one pass over one trader's directory
#[derive(Debug, Clone)]
pub struct TraderOutcome {
    pub trader: String,
    pub files_read: usize,
    /// Files that could not be read or parsed
    pub files_skipped: usize,
    pub files_rewritten: usize,
    pub downgrades: usize,
    pub corrections: usize,
    pub completions: usize,
    /// Per-file or per-completion failures; the pass continued past them
    pub failures: usize,
    pub report: DiscrepancyReport,
    pub report_path: Option<PathBuf>,
}

impl TraderOutcome {
    fn new(trader: &str, kind: ReportKind) -> Self {
        Self {
            trader: trader.to_string(),
            files_read: 0,
            files_skipped: 0,
            files_rewritten: 0,
            downgrades: 0,
            corrections: 0,
            completions: 0,
            failures: 0,
            report: DiscrepancyReport::new(kind, trader),
            report_path: None,
        }
    }

    fn record(&mut self, finding: Discrepancy) {
        warn!(trader = %self.trader, "{}", finding);
        match finding {
            Discrepancy::Downgraded { .. } => self.downgrades += 1,
            Discrepancy::DataDeviation { .. } | Discrepancy::OrderIdMismatch { .. } => {
                self.corrections += 1
            }
            Discrepancy::Completed { .. } => self.completions += 1,
            _ => {}
        }
        self.report.push(finding);
    }

    fn write_report(&mut self, dir: &Path, now: DateTime<Utc>) {
        match self.report.write_to(dir, now) {
            Ok(Some(path)) => {
                info!(
                    trader = %self.trader,
                    entries = self.report.len(),
                    "Report written: {}",
                    path.display()
                );
                self.report_path = Some(path);
            }
            Ok(None) => info!(trader = %self.trader, "No discrepancies"),
            Err(e) => {
                error!(trader = %self.trader, error = %e, "Failed to write report");
                self.failures += 1;
            }
        }
    }
}

fn overwritten(previous: &PositionTracker, open: &DecisionAction) -> Discrepancy {
    Discrepancy::OverwrittenOpen {
        symbol: previous.key.symbol.clone(),
        side: previous.key.side,
        previous_quantity: previous.open_quantity(),
        previous_opened_at: previous.open_time(),
        opened_at: open.timestamp,
    }
}

/// Read every decision file of a trader in replay order.
///
/// Files are listed by name, then ordered by the record's own timestamp so
/// completion files land next to the cycle they complete. Unreadable files
/// are skipped as a whole.
fn load_decision_files(dir: &Path, outcome: &mut TraderOutcome) -> Result<Vec<DecisionFile>> {
    let mut files = Vec::new();
    for path in decision_files(dir)? {
        match DecisionFile::read(&path) {
            Ok(file) => files.push(file),
            Err(e) => {
                warn!(trader = %outcome.trader, error = %e, "Skipping decision file");
                outcome.files_skipped += 1;
            }
        }
    }
    // files without a record timestamp keep their lexical place behind the
    // timestamped file listed before them
    let mut last_seen = None;
    let mut keyed: Vec<_> = files
        .into_iter()
        .map(|file| {
            if let Some(ts) = file.record_timestamp() {
                last_seen = Some(ts);
            }
            (last_seen, file)
        })
        .collect();
    keyed.sort_by_key(|(replay_at, _)| *replay_at);

    outcome.files_read = keyed.len();
    Ok(keyed.into_iter().map(|(_, file)| file).collect())
}

/// Reconciles one trader's logs against that trader's orders
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    cache: &'a OrderCache,
    matcher: &'a Matcher,
}

impl<'a> Reconciler<'a> {
    pub fn new(cache: &'a OrderCache, matcher: &'a Matcher) -> Self {
        Self { cache, matcher }
    }

    /// Position lists an action is matched against.
    ///
    /// Partial closes carry no side, so they follow the open position on
    /// the symbol, or try both sides when none is tracked.
    fn candidates(&self, action: &DecisionAction, book: &PositionBook) -> Vec<CandidateList<'a>> {
        let sides: Vec<PositionSide> = match action.action.position_side() {
            Some(side) => vec![side],
            None => match book.open_side_for(&action.symbol) {
                Some(side) => vec![side],
                None => PARTIAL_CLOSE_SIDES.to_vec(),
            },
        };
        sides
            .into_iter()
            .filter_map(|side| self.cache.candidates(&action.symbol, side))
            .collect()
    }

    fn resolve(&self, action: &DecisionAction, kind: MatchKind, book: &PositionBook) -> Corrected {
        let lists = self.candidates(action, book);
        let found = self.matcher.find_match(action, kind, &lists);

        if found.is_none() {
            debug!(
                symbol = %action.symbol,
                action = %action.action,
                decided_at = %action.timestamp,
                "No matching order"
            );
            for (i, order) in nearest_orders(action, &lists, NEAREST_CANDIDATES).iter().enumerate() {
                let minutes = (order.time - action.timestamp_ms()) as f64 / 60_000.0;
                debug!(
                    "  #{} order {} ({:+.1} min, {} {}, {}, reduce_only={}, close_position={})",
                    i + 1,
                    order.order_id,
                    minutes,
                    order.side,
                    order.position_side,
                    order.status,
                    order.reduce_only,
                    order.close_position
                );
            }
        }

        correct(action, found.as_ref())
    }

    /// Correct every decision in `dir`, complete missing closes and write
    /// the open mismatch report.
    pub fn reconcile_trader(&self, trader: &str, dir: &Path, now: DateTime<Utc>) -> Result<TraderOutcome> {
        let mut outcome = TraderOutcome::new(trader, ReportKind::OpenMismatch);
        let mut files = load_decision_files(dir, &mut outcome)?;
        let mut book = PositionBook::new();
        let mut claimed: HashSet<i64> = HashSet::new();

        for file in &mut files {
            if let Err(e) = self.correct_file(file, &mut book, &mut claimed, &mut outcome) {
                error!(trader, file = %file.path().display(), error = %e, "Failed to correct file");
                outcome.failures += 1;
                continue;
            }
            if !file.is_dirty() {
                continue;
            }
            match file.rewrite_in_place() {
                Ok(backup) => {
                    info!(trader, "Corrected {} (backup {})", file.path().display(), backup.display());
                    outcome.files_rewritten += 1;
                }
                Err(e) => {
                    error!(trader, file = %file.path().display(), error = %e, "Failed to rewrite file");
                    outcome.failures += 1;
                }
            }
        }

        self.complete_gaps(dir, &book, &mut claimed, &mut outcome);
        outcome.write_report(dir, now);
        Ok(outcome)
    }

    fn correct_file(
        &self,
        file: &mut DecisionFile,
        book: &mut PositionBook,
        claimed: &mut HashSet<i64>,
        outcome: &mut TraderOutcome,
    ) -> Result<()> {
        for index in 0..file.actions().len() {
            let original = file.actions()[index].clone();
            if !original.success {
                continue;
            }

            let action = match MatchKind::for_action(&original.action) {
                Some(kind) => {
                    let corrected = self.resolve(&original, kind, book);
                    file.update_action(index, corrected.action.clone())?;
                    if let Some(finding) = corrected.discrepancy {
                        outcome.record(finding);
                    }
                    corrected.action
                }
                None => original,
            };

            if action.order_id > 0 && action.action.needs_order_match() {
                claimed.insert(action.order_id);
            }

            let close_percentage = if action.action.is_partial_close() {
                file.planned_close_percentage(&action.symbol)
            } else {
                None
            };
            if let Transition::Reopened { previous, .. } = book.apply(&action, close_percentage) {
                outcome.record(overwritten(&previous, &action));
            }
        }
        Ok(())
    }

    fn complete_gaps(
        &self,
        dir: &Path,
        book: &PositionBook,
        claimed: &mut HashSet<i64>,
        outcome: &mut TraderOutcome,
    ) {
        for tracker in book.unresolved() {
            let lists: Vec<_> = self
                .cache
                .candidates(&tracker.key.symbol, tracker.key.side)
                .into_iter()
                .collect();
            let Some(order) = self.matcher.find_gap_close(&tracker.open, &lists, claimed) else {
                continue;
            };

            match write_completion(dir, tracker, order) {
                Ok(Some(completion)) => {
                    claimed.insert(order.order_id);
                    let file = completion
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    outcome.record(Discrepancy::Completed {
                        symbol: completion.action.symbol.clone(),
                        action: completion.action.action.clone(),
                        order_id: order.order_id,
                        quantity: completion.action.quantity,
                        price: completion.action.price,
                        filled_at: completion.action.timestamp,
                        file,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        trader = %outcome.trader,
                        symbol = %tracker.key.symbol,
                        error = %e,
                        "Failed to write completion"
                    );
                    outcome.failures += 1;
                }
            }
        }
    }

    /// Replay the logs as recorded and validate partial-close chains.
    ///
    /// Nothing in `dir` is modified apart from the report.
    pub fn partial_close_trader(&self, trader: &str, dir: &Path, now: DateTime<Utc>) -> Result<TraderOutcome> {
        let mut outcome = TraderOutcome::new(trader, ReportKind::PartialClose);
        let files = load_decision_files(dir, &mut outcome)?;
        let mut book = PositionBook::new();

        for file in &files {
            for action in file.actions() {
                let close_percentage = if action.action.is_partial_close() {
                    file.planned_close_percentage(&action.symbol)
                } else {
                    None
                };
                if let Transition::Reopened { previous, .. } = book.apply(action, close_percentage) {
                    outcome.record(overwritten(&previous, action));
                }
            }
        }

        for finding in book.validate(self.cache, self.matcher) {
            outcome.record(finding);
        }
        outcome.write_report(dir, now);
        Ok(outcome)
    }
}

/// Totals over all traders of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub traders: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub discrepancies: usize,
    pub files_rewritten: usize,
    pub completions: usize,
    pub reports: Vec<PathBuf>,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &TraderOutcome) {
        self.discrepancies += outcome.report.len();
        self.files_rewritten += outcome.files_rewritten;
        self.completions += outcome.completions;
        if let Some(path) = &outcome.report_path {
            self.reports.push(path.clone());
        }
        if outcome.failures == 0 {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Run `pass` for every trader directory under `root`.
///
/// Traders are isolated: each gets its own order cache, and a failing
/// trader is counted and skipped. A trader with no stored orders is still
/// reconciled, so every one of its decisions ends up downgraded.
pub async fn run_all<S: OrderStore + ?Sized>(
    store: &S,
    root: impl AsRef<Path>,
    matcher: &Matcher,
    pass: Pass,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for (trader, dir) in trader_dirs(root)? {
        summary.traders += 1;

        let cache = match load_grouped(store, &trader).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(trader = %trader, error = %e, "Failed to load orders");
                summary.failed += 1;
                continue;
            }
        };
        if cache.is_empty() {
            warn!(trader = %trader, "No stored orders (did fetch-orders run?)");
        }
        info!(trader = %trader, orders = cache.len(), ?pass, "Reconciling trader");

        let reconciler = Reconciler::new(&cache, matcher);
        let now = Utc::now();
        let result = match pass {
            Pass::Reconcile => reconciler.reconcile_trader(&trader, &dir, now),
            Pass::PartialClose => reconciler.partial_close_trader(&trader, &dir, now),
        };
        match result {
            Ok(outcome) => summary.absorb(&outcome),
            Err(e) => {
                error!(trader = %trader, error = %e, "Reconciliation failed");
                summary.failed += 1;
            }
        }
    }

    info!(
        "Run finished: {} traders, {} ok, {} failed, {} discrepancies, {} files corrected, {} completions",
        summary.traders,
        summary.succeeded,
        summary.failed,
        summary.discrepancies,
        summary.files_rewritten,
        summary.completions
    );
    Ok(summary)
}
