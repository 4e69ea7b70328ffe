//! A single decision log file.
//!
//! Top-level fields are held as raw JSON so a rewrite re-emits every field
//! except `decisions` exactly as it was read. Decisions themselves are kept
//! as generic values next to their typed view; corrections patch only the
//! fields that changed, so unknown per-decision fields survive as well.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::common::errors::{ReconcileError, Result};
use crate::common::types::DecisionAction;

const DECISIONS_FIELD: &str = "decisions";

/// One item of the model's planned decisions, embedded as a JSON string
/// under `decision_json`
#[derive(Debug, Clone, Deserialize)]
struct PlannedDecision {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    close_percentage: Option<Decimal>,
}

/// Parsed decision log file
#[derive(Debug)]
pub struct DecisionFile {
    path: PathBuf,
    fields: IndexMap<String, Box<RawValue>>,
    decisions: Vec<Value>,
    actions: Vec<DecisionAction>,
    dirty: bool,
}

impl DecisionFile {
    /// Read and parse a decision file; any malformed decision rejects the whole file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::parse(path, &text)
    }

    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let fields: IndexMap<String, Box<RawValue>> = serde_json::from_str(text)
            .map_err(|e| ReconcileError::malformed(&path, e.to_string()))?;

        let decisions: Vec<Value> = match fields.get(DECISIONS_FIELD) {
            Some(raw) => serde_json::from_str::<Option<Vec<Value>>>(raw.get())
                .map_err(|e| ReconcileError::malformed(&path, e.to_string()))?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let actions = decisions
            .iter()
            .enumerate()
            .map(|(i, value)| {
                serde_json::from_value::<DecisionAction>(value.clone()).map_err(|e| {
                    ReconcileError::malformed(&path, format!("decision #{}: {}", i + 1, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path,
            fields,
            decisions,
            actions,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn actions(&self) -> &[DecisionAction] {
        &self.actions
    }

    /// Whether any decision was updated since the file was read
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record-level timestamp (when the bot wrote the cycle), if present
    pub fn record_timestamp(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("timestamp")
            .and_then(|raw| serde_json::from_str(raw.get()).ok())
    }

    /// Close percentage the model planned for a partial close of `symbol`
    pub fn planned_close_percentage(&self, symbol: &str) -> Option<Decimal> {
        let raw = self.fields.get("decision_json")?;
        let embedded: String = serde_json::from_str(raw.get()).ok()?;
        let planned: Vec<PlannedDecision> = serde_json::from_str(&embedded).ok()?;
        planned
            .into_iter()
            .find(|d| d.action == "partial_close" && d.symbol == symbol)
            .and_then(|d| d.close_percentage)
    }

    /// Replace decision `index`, patching only the fields that changed
    pub fn update_action(&mut self, index: usize, updated: DecisionAction) -> Result<()> {
        let current = self.actions.get(index).ok_or_else(|| {
            ReconcileError::Internal(format!(
                "decision index {} out of range in {}",
                index,
                self.path.display()
            ))
        })?;
        if *current == updated {
            return Ok(());
        }

        let patch = serde_json::to_value(&updated)?;
        let object = self.decisions[index].as_object_mut().ok_or_else(|| {
            ReconcileError::malformed(&self.path, format!("decision #{} is not an object", index + 1))
        })?;

        let mut changed = Vec::new();
        if current.action != updated.action {
            changed.push("action");
        }
        if current.quantity != updated.quantity {
            changed.push("quantity");
        }
        if current.price != updated.price {
            changed.push("price");
        }
        if current.order_id != updated.order_id {
            changed.push("order_id");
        }
        if current.timestamp != updated.timestamp {
            changed.push("timestamp");
        }
        for key in changed {
            if let Some(value) = patch.get(key) {
                object.insert(key.to_string(), value.clone());
            }
        }

        self.actions[index] = updated;
        self.dirty = true;
        Ok(())
    }

    /// Back the file up, then write it again with only `decisions` replaced.
    ///
    /// The rewrite re-parses the backup, so what is preserved is exactly what
    /// is on disk. Returns the backup path.
    pub fn rewrite_in_place(&self) -> Result<PathBuf> {
        let backup = backup_file(&self.path)?;
        let text = fs::read_to_string(&backup)?;
        let mut fields: IndexMap<String, Box<RawValue>> = serde_json::from_str(&text)
            .map_err(|e| ReconcileError::malformed(&backup, e.to_string()))?;

        let decisions = RawValue::from_string(serde_json::to_string_pretty(&self.decisions)?)?;
        fields.insert(DECISIONS_FIELD.to_string(), decisions);

        fs::write(&self.path, serde_json::to_string_pretty(&fields)?)?;
        Ok(backup)
    }
}

/// Rename `path` to a backup next to it and return the backup path.
///
/// Uses `<file>.bak`, or `<file>.bak.N` when earlier backups exist, so no
/// backup is ever overwritten.
pub fn backup_file(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let base = format!("{}.bak", path.display());
    let mut backup = PathBuf::from(&base);
    let mut n = 1;
    while backup.exists() {
        backup = PathBuf::from(format!("{}.{}", base, n));
        n += 1;
    }
    fs::rename(path, &backup)?;
    Ok(backup)
}

/// Content of a synthesized completion file
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub timestamp: DateTime<Utc>,
    pub decisions: Vec<DecisionAction>,
}

/// Write a new decision file, never replacing an existing one.
///
/// Returns `false` when a file already exists at `path`.
pub fn write_new_decision_file(path: impl AsRef<Path>, record: &CompletionRecord) -> Result<bool> {
    let body = serde_json::to_string_pretty(record)?;
    let file = OpenOptions::new().write(true).create_new(true).open(path.as_ref());
    match file {
        Ok(mut file) => {
            file.write_all(body.as_bytes())?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ActionKind;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const RECORD: &str = r#"{
  "timestamp": "2025-11-09T12:00:00+08:00",
  "cycle_number": 42,
  "raw_response": "<reasoning>  spaced   text </reasoning>",
  "decision_json": "[{\"symbol\":\"BTCUSDT\",\"action\":\"partial_close\",\"close_percentage\":40}]",
  "decisions": [
    {
      "action": "open_long",
      "symbol": "BTCUSDT",
      "quantity": 10,
      "leverage": 5,
      "price": 100,
      "order_id": 0,
      "timestamp": "2025-11-09T12:00:00+08:00",
      "success": true,
      "error": "",
      "note": "kept"
    },
    {
      "action": "hold",
      "symbol": "ETHUSDT",
      "success": false
    }
  ],
  "account_state": {"total_balance": 1000.50, "positions": []}
}"#;

    #[test]
    fn test_parse_typed_view() {
        let file = DecisionFile::parse("a.json", RECORD).unwrap();
        assert_eq!(file.actions().len(), 2);
        assert_eq!(file.actions()[0].action, ActionKind::OpenLong);
        assert_eq!(file.actions()[0].quantity, dec!(10));
        assert!(!file.actions()[1].success);
        assert_eq!(file.planned_close_percentage("BTCUSDT"), Some(dec!(40)));
        assert_eq!(file.planned_close_percentage("ETHUSDT"), None);
        assert!(file.record_timestamp().is_some());
    }

    #[test]
    fn test_malformed_decision_rejects_file() {
        let text = r#"{"decisions": [{"action": "open_long", "quantity": "ten"}]}"#;
        let err = DecisionFile::parse("bad.json", text).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedDecisionFile { .. }));
    }

    #[test]
    fn test_non_object_document_is_malformed() {
        assert!(DecisionFile::parse("arr.json", "[1,2,3]").is_err());
    }

    #[test]
    fn test_missing_or_null_decisions_is_empty() {
        let file = DecisionFile::parse("a.json", r#"{"timestamp": null}"#).unwrap();
        assert!(file.actions().is_empty());
        let file = DecisionFile::parse("b.json", r#"{"decisions": null}"#).unwrap();
        assert!(file.actions().is_empty());
    }

    #[test]
    fn test_rewrite_preserves_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decision_20251109_120000.json");
        fs::write(&path, RECORD).unwrap();

        let mut file = DecisionFile::read(&path).unwrap();
        let mut corrected = file.actions()[0].clone();
        corrected.order_id = 777;
        file.update_action(0, corrected).unwrap();
        assert!(file.is_dirty());

        let backup = file.rewrite_in_place().unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), RECORD);

        let rewritten = fs::read_to_string(&path).unwrap();
        let before: IndexMap<String, Box<RawValue>> = serde_json::from_str(RECORD).unwrap();
        let after: IndexMap<String, Box<RawValue>> = serde_json::from_str(&rewritten).unwrap();
        let before_keys: Vec<&String> = before.keys().collect();
        let after_keys: Vec<&String> = after.keys().collect();
        assert_eq!(before_keys, after_keys);
        for (key, value) in &before {
            if key != DECISIONS_FIELD {
                assert_eq!(value.get(), after[key].get(), "field {} changed", key);
            }
        }

        let reread = DecisionFile::read(&path).unwrap();
        assert_eq!(reread.actions()[0].order_id, 777);
        assert_eq!(reread.actions()[0].quantity, dec!(10));
        assert_eq!(reread.decisions[0]["note"], "kept");
        // untouched fields keep their original encoding
        assert_eq!(reread.decisions[0]["timestamp"], "2025-11-09T12:00:00+08:00");
        assert_eq!(reread.decisions[1], before_decision(1));
    }

    fn before_decision(index: usize) -> Value {
        let value: Value = serde_json::from_str(RECORD).unwrap();
        value["decisions"][index].clone()
    }

    #[test]
    fn test_backups_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.json");

        fs::write(&path, "first").unwrap();
        let first = backup_file(&path).unwrap();
        fs::write(&path, "second").unwrap();
        let second = backup_file(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first).unwrap(), "first");
        assert_eq!(fs::read_to_string(second).unwrap(), "second");
        assert!(!path.exists());
    }

    #[test]
    fn test_write_new_never_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decision_reconcile_x.json");
        let record = CompletionRecord {
            timestamp: Utc::now(),
            decisions: Vec::new(),
        };

        assert!(write_new_decision_file(&path, &record).unwrap());
        fs::write(&path, "sentinel").unwrap();
        assert!(!write_new_decision_file(&path, &record).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "sentinel");
    }
}
