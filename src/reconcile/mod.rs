//! Reconciliation of decision logs against exchange order history

pub mod completion;
pub mod correction;
pub mod engine;
pub mod matcher;
pub mod report;
pub mod tracker;

pub use engine::{run_all, Pass, Reconciler, RunSummary, TraderOutcome};
pub use matcher::{deviation, MatchKind, Matcher, OrderMatch};
pub use report::{Discrepancy, DiscrepancyReport, ReportKind};
pub use tracker::{PositionBook, PositionKey, PositionTracker, Transition};
