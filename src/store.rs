// =============================================================================
// Durable Stores — ledger journal, weight table, attribution aggregates
// =============================================================================
//
// Three small file-backed stores satisfy the engine's persistence contracts:
//
//   - LedgerStore       append-only JSONL journal of prediction records.
//                       Every mutation appends the full record; on load the
//                       last record per id wins. Nothing is ever rewritten,
//                       so a crash can only lose the line being appended.
//   - WeightStore       versioned weight-table document.
//   - AttributionStore  keyed attribution aggregates per period.
//
// Document stores use the atomic tmp + rename pattern. Any failure surfaces
// as `FusionError::PersistenceFailure`; the caller aborts only the current step and
// the previously persisted state remains authoritative.
// =============================================================================

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::errors::FusionError;
use crate::ledger::TradePrediction;
use crate::learning::attribution::AttributionRecord;
use crate::weights::WeightTable;

/// Serialise `value` to pretty JSON and atomically replace `path`.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T, op: &str) -> Result<(), FusionError> {
    let content =
        serde_json::to_string_pretty(value).map_err(|e| FusionError::persistence(op, e))?;

    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, &content).map_err(|e| FusionError::persistence(op, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| FusionError::persistence(op, e))?;

    debug!(path = %path.display(), op, "document persisted (atomic)");
    Ok(())
}

/// Load a JSON document, returning `None` when the file does not exist yet.
fn load_json<T: DeserializeOwned>(path: &Path, op: &str) -> Result<Option<T>, FusionError> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| FusionError::persistence(op, e))?;
    let value = serde_json::from_str(&content).map_err(|e| FusionError::persistence(op, e))?;
    Ok(Some(value))
}

// =============================================================================
// LedgerStore — append-only prediction journal
// =============================================================================

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one full prediction record as a JSON line and flush it.
    pub fn append(&self, prediction: &TradePrediction) -> Result<(), FusionError> {
        let line = serde_json::to_string(prediction)
            .map_err(|e| FusionError::persistence("ledger append", e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FusionError::persistence("ledger append", e))?;

        writeln!(file, "{line}").map_err(|e| FusionError::persistence("ledger append", e))?;
        file.flush()
            .map_err(|e| FusionError::persistence("ledger append", e))?;

        Ok(())
    }

    /// Replay the journal. Records keep first-seen order; a later line for
    /// the same id replaces the earlier one in place. Unparseable lines
    /// (e.g. a torn final line after a crash) are skipped with a warning.
    pub fn load(&self) -> Result<Vec<TradePrediction>, FusionError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| FusionError::persistence("ledger load", e))?;

        let mut records: Vec<TradePrediction> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut skipped = 0usize;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradePrediction>(line) {
                Ok(record) => match index.get(&record.id) {
                    Some(&i) => records[i] = record,
                    None => {
                        index.insert(record.id.clone(), records.len());
                        records.push(record);
                    }
                },
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                path = %self.path.display(),
                skipped,
                "ledger journal contained unreadable lines"
            );
        }

        info!(
            path = %self.path.display(),
            records = records.len(),
            "prediction ledger replayed"
        );

        Ok(records)
    }
}

// =============================================================================
// WeightStore — versioned weight-table document
// =============================================================================

pub struct WeightStore {
    path: PathBuf,
}

impl WeightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(&self, table: &WeightTable) -> Result<(), FusionError> {
        atomic_write_json(&self.path, table, "weight table save")?;
        info!(
            version = table.version,
            engines = table.multipliers.len(),
            "weight table persisted"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<WeightTable>, FusionError> {
        load_json(&self.path, "weight table load")
    }
}

// =============================================================================
// AttributionStore — keyed aggregates per lookback period
// =============================================================================

pub struct AttributionStore {
    path: PathBuf,
}

impl AttributionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(
        &self,
        records: &std::collections::BTreeMap<String, AttributionRecord>,
    ) -> Result<(), FusionError> {
        atomic_write_json(&self.path, records, "attribution save")
    }

    pub fn load(
        &self,
    ) -> Result<Option<std::collections::BTreeMap<String, AttributionRecord>>, FusionError> {
        load_json(&self.path, "attribution load")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PredictionState;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("meridian-{}-{}", name, uuid::Uuid::new_v4()))
    }

    fn sample_prediction(id: &str) -> TradePrediction {
        let mut p = TradePrediction::sample("NVDA", 100.0);
        p.id = id.to_string();
        p
    }

    #[test]
    fn journal_last_record_wins() {
        let path = temp_path("ledger.jsonl");
        let store = LedgerStore::new(&path);

        let mut a = sample_prediction("a");
        store.append(&a).unwrap();
        store.append(&sample_prediction("b")).unwrap();

        a.state = PredictionState::Win;
        a.pnl_pct = 10.0;
        store.append(&a).unwrap();

        let replayed = store.load().unwrap();
        assert_eq!(replayed.len(), 2);
        // First-seen order preserved, latest content applied.
        assert_eq!(replayed[0].id, "a");
        assert_eq!(replayed[0].state, PredictionState::Win);
        assert_eq!(replayed[1].id, "b");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn journal_skips_torn_lines() {
        let path = temp_path("ledger-torn.jsonl");
        let store = LedgerStore::new(&path);
        store.append(&sample_prediction("a")).unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"id\": \"tor").unwrap();
        drop(file);

        let replayed = store.load().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, "a");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn weight_store_round_trip() {
        let path = temp_path("weights.json");
        let store = WeightStore::new(&path);

        assert!(store.load().unwrap().is_none());

        let table = WeightTable::seeded(["gamma_exposure", "sentiment"]);
        store.save(&table).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.version, table.version);
        assert_eq!(loaded.multiplier("sentiment"), 1.0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn attribution_store_round_trip() {
        let path = temp_path("attribution.json");
        let store = AttributionStore::new(&path);

        let mut records = std::collections::BTreeMap::new();
        records.insert(
            "shadow_flow".to_string(),
            AttributionRecord {
                engine_id: "shadow_flow".to_string(),
                win_count: 6,
                loss_count: 0,
                sample_size: 6,
                period: "60d".to_string(),
            },
        );
        store.save(&records).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded["shadow_flow"].win_count, 6);

        std::fs::remove_file(&path).ok();
    }
}
