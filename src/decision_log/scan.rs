//! Directory layout of decision logs: `<root>/<trader>/**/*.json`

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::file::DecisionFile;
use crate::common::errors::Result;
use crate::common::traits::OrderStore;

/// Trader sub-directories of the decision root, sorted by trader id
pub fn trader_dirs(root: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn is_decision_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
}

/// Decision files directly inside a trader directory, in lexical order
pub fn decision_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_decision_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn walk_decision_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_decision_files(&path, out)?;
        } else if file_type.is_file() && is_decision_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Result of a symbol scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Successful opens seen across all files
    pub open_occurrences: usize,
    /// Distinct (trader, symbol) pairs known to the store after the scan
    pub unique_pairs: usize,
    /// Files skipped because they could not be read or parsed
    pub skipped_files: usize,
}

/// Record every (trader, symbol) with at least one successful open
pub async fn scan_symbols<S: OrderStore + ?Sized>(
    store: &S,
    root: impl AsRef<Path>,
) -> Result<ScanSummary> {
    let mut summary = ScanSummary::default();

    for (trader, dir) in trader_dirs(root)? {
        let mut files = Vec::new();
        walk_decision_files(&dir, &mut files)?;
        files.sort();

        for path in files {
            let file = match DecisionFile::read(&path) {
                Ok(file) => file,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    summary.skipped_files += 1;
                    continue;
                }
            };
            for action in file.actions() {
                if !action.success || !action.action.is_open() {
                    continue;
                }
                let symbol = action.symbol.trim();
                if symbol.is_empty() {
                    continue;
                }
                summary.open_occurrences += 1;
                store.record_symbol(&trader, symbol).await?;
            }
        }
    }

    summary.unique_pairs = store.symbols(None).await?.len();
    info!(
        "Symbols collected: {} opens -> {} unique pairs ({} files skipped)",
        summary.open_occurrences, summary.unique_pairs, summary.skipped_files
    );
    Ok(summary)
}
