//! Decision log I/O: reading, field-preserving rewrite, backups and scanning

pub mod file;
pub mod scan;

pub use file::{backup_file, write_new_decision_file, CompletionRecord, DecisionFile};
pub use scan::{decision_files, scan_symbols, trader_dirs, ScanSummary};
