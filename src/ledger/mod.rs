// =============================================================================
// Prediction Ledger — durable record of every generated plan
// =============================================================================
//
// Life-cycle:
//   Pending -> Win | Loss | Neutral
//
// Entries are created by the prediction pipeline, mutated only by the
// outcome grader, and never deleted: terminal entries are the training
// signal for attribution. Terminal states are immutable; `commit` silently
// refuses any write against an already-terminal entry.
//
// Durability: every accepted mutation is appended to the journal BEFORE the
// in-memory copy is updated, so a crash loses at most the one in-flight
// record and never leaves memory ahead of disk.
// =============================================================================

pub mod grading;

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::FusionError;
use crate::store::LedgerStore;
use crate::types::{AssetTier, PredictionState};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Which exit levels the price has touched at any grading pass. Flags are
/// sticky: once set they are never cleared by a later pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HitFlags {
    #[serde(default)]
    pub tp1: bool,
    #[serde(default)]
    pub tp2: bool,
    #[serde(default)]
    pub tp3: bool,
    #[serde(default)]
    pub stop: bool,
}

/// A tracked prediction: the full plan plus its grading state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePrediction {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub ticker: String,
    pub created_at: String,

    /// Calibrated confidence at creation time.
    pub confidence_at_prediction: f64,
    pub tier: AssetTier,

    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,

    /// Percent of capital the sizer allocated.
    #[serde(default)]
    pub allocation_pct: f64,

    /// Normalised per-engine scores at prediction time. Drives attribution.
    pub signal_snapshot: BTreeMap<String, f64>,

    #[serde(default)]
    pub state: PredictionState,

    /// Unrealised P&L percent while pending; final P&L once terminal.
    #[serde(default)]
    pub pnl_pct: f64,

    #[serde(default)]
    pub days_held: i64,

    /// Best unrealised move observed, percent. Never decreases.
    #[serde(default)]
    pub max_favorable_excursion: f64,

    /// Worst unrealised move observed, percent (stored <= 0). Its magnitude
    /// never shrinks.
    #[serde(default)]
    pub max_adverse_excursion: f64,

    #[serde(default)]
    pub hit_flags: HitFlags,

    /// Price seen on the most recent grading pass.
    #[serde(default)]
    pub last_price: Option<f64>,

    /// Timestamp of the most recent grading pass.
    #[serde(default)]
    pub graded_at: Option<String>,

    /// Timestamp at which the entry reached a terminal state.
    #[serde(default)]
    pub terminal_at: Option<String>,
}

impl TradePrediction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: impl Into<String>,
        tier: AssetTier,
        confidence: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit_1: f64,
        take_profit_2: f64,
        take_profit_3: f64,
        allocation_pct: f64,
        signal_snapshot: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.into(),
            created_at: Utc::now().to_rfc3339(),
            confidence_at_prediction: confidence,
            tier,
            entry_price,
            stop_loss,
            take_profit_1,
            take_profit_2,
            take_profit_3,
            allocation_pct,
            signal_snapshot,
            state: PredictionState::Pending,
            pnl_pct: 0.0,
            days_held: 0,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
            hit_flags: HitFlags::default(),
            last_price: None,
            graded_at: None,
            terminal_at: None,
        }
    }

    /// A minimal pending prediction around `entry` with a 5% stop and a 10%
    /// first target (useful for testing).
    pub fn sample(ticker: &str, entry: f64) -> Self {
        Self::new(
            ticker,
            AssetTier::Growth,
            70.0,
            entry,
            entry * 0.95,
            entry * 1.10,
            entry * 1.20,
            entry * 1.30,
            5.0,
            BTreeMap::new(),
        )
    }
}

/// Aggregate ledger counts for the operational snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub neutrals: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Thread-safe owner of all prediction records, backed by the append-only
/// journal.
pub struct PredictionLedger {
    entries: RwLock<Vec<TradePrediction>>,
    store: LedgerStore,
}

impl PredictionLedger {
    /// Open the ledger, replaying the journal at `store`.
    pub fn open(store: LedgerStore) -> Result<Self, FusionError> {
        let entries = store.load()?;
        Ok(Self {
            entries: RwLock::new(entries),
            store,
        })
    }

    /// Record a newly generated prediction. Journal first, memory second.
    pub fn insert(&self, prediction: TradePrediction) -> Result<(), FusionError> {
        self.store.append(&prediction)?;

        info!(
            id = %prediction.id,
            ticker = %prediction.ticker,
            tier = %prediction.tier,
            confidence = format!("{:.1}", prediction.confidence_at_prediction),
            entry = prediction.entry_price,
            stop = prediction.stop_loss,
            tp1 = prediction.take_profit_1,
            "prediction recorded"
        );

        self.entries.write().push(prediction);
        Ok(())
    }

    /// Commit a graded copy of an entry back to the ledger.
    ///
    /// Returns `Ok(false)` without writing when the stored entry is already
    /// terminal (re-grading a terminal entry is a no-op) or unknown.
    pub fn commit(&self, updated: TradePrediction) -> Result<bool, FusionError> {
        // Check the guard before touching the journal so refused writes
        // leave no trace on disk.
        {
            let entries = self.entries.read();
            match entries.iter().find(|p| p.id == updated.id) {
                Some(existing) if existing.state.is_terminal() => {
                    warn!(
                        id = %updated.id,
                        state = %existing.state,
                        "refusing write against terminal prediction"
                    );
                    return Ok(false);
                }
                Some(_) => {}
                None => {
                    warn!(id = %updated.id, "commit for unknown prediction id");
                    return Ok(false);
                }
            }
        }

        self.store.append(&updated)?;

        let mut entries = self.entries.write();
        if let Some(slot) = entries.iter_mut().find(|p| p.id == updated.id) {
            *slot = updated;
        }
        Ok(true)
    }

    /// Snapshot of all currently pending entries.
    pub fn pending(&self) -> Vec<TradePrediction> {
        self.entries
            .read()
            .iter()
            .filter(|p| p.state == PredictionState::Pending)
            .cloned()
            .collect()
    }

    /// Terminal entries whose grading completed at or after `cutoff`.
    pub fn terminal_since(&self, cutoff: chrono::DateTime<Utc>) -> Vec<TradePrediction> {
        self.entries
            .read()
            .iter()
            .filter(|p| p.state.is_terminal())
            .filter(|p| {
                p.terminal_at
                    .as_deref()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<TradePrediction> {
        self.entries.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn counts(&self) -> LedgerCounts {
        let entries = self.entries.read();
        let mut counts = LedgerCounts::default();
        for p in entries.iter() {
            match p.state {
                PredictionState::Pending => counts.pending += 1,
                PredictionState::Win => counts.wins += 1,
                PredictionState::Loss => counts.losses += 1,
                PredictionState::Neutral => counts.neutrals += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for PredictionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self.counts();
        f.debug_struct("PredictionLedger")
            .field("pending", &counts.pending)
            .field("wins", &counts.wins)
            .field("losses", &counts.losses)
            .field("neutrals", &counts.neutrals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger() -> (PredictionLedger, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("meridian-ledger-{}.jsonl", Uuid::new_v4()));
        let ledger = PredictionLedger::open(LedgerStore::new(&path)).unwrap();
        (ledger, path)
    }

    #[test]
    fn insert_and_pending() {
        let (ledger, path) = temp_ledger();
        ledger.insert(TradePrediction::sample("NVDA", 100.0)).unwrap();
        ledger.insert(TradePrediction::sample("AMD", 50.0)).unwrap();

        assert_eq!(ledger.pending().len(), 2);
        assert_eq!(ledger.counts().pending, 2);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn terminal_entries_are_immutable() {
        let (ledger, path) = temp_ledger();
        let mut p = TradePrediction::sample("NVDA", 100.0);
        let id = p.id.clone();
        ledger.insert(p.clone()).unwrap();

        p.state = PredictionState::Win;
        p.pnl_pct = 10.0;
        p.terminal_at = Some(Utc::now().to_rfc3339());
        assert!(ledger.commit(p.clone()).unwrap());

        // A second write attempting to reopen the entry is refused.
        p.state = PredictionState::Pending;
        assert!(!ledger.commit(p).unwrap());
        assert_eq!(ledger.get(&id).unwrap().state, PredictionState::Win);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn reload_survives_restart() {
        let path = std::env::temp_dir().join(format!("meridian-ledger-{}.jsonl", Uuid::new_v4()));

        {
            let ledger = PredictionLedger::open(LedgerStore::new(&path)).unwrap();
            let mut p = TradePrediction::sample("TSLA", 200.0);
            ledger.insert(p.clone()).unwrap();
            p.state = PredictionState::Loss;
            p.pnl_pct = -5.0;
            p.terminal_at = Some(Utc::now().to_rfc3339());
            ledger.commit(p).unwrap();
        }

        let reopened = PredictionLedger::open(LedgerStore::new(&path)).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.counts().losses, 1);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn terminal_since_filters_by_cutoff() {
        let (ledger, path) = temp_ledger();
        let mut p = TradePrediction::sample("NVDA", 100.0);
        ledger.insert(p.clone()).unwrap();
        p.state = PredictionState::Win;
        p.terminal_at = Some(Utc::now().to_rfc3339());
        ledger.commit(p).unwrap();

        let recent = ledger.terminal_since(Utc::now() - chrono::Duration::days(1));
        assert_eq!(recent.len(), 1);

        let future = ledger.terminal_since(Utc::now() + chrono::Duration::days(1));
        assert!(future.is_empty());

        std::fs::remove_file(path).ok();
    }
}
