// =============================================================================
// Central Application State — Meridian Fusion Engine
// =============================================================================
//
// The single source of truth for the engine. Scorers read weight-table
// snapshots from here; the learning cycle writes new tables back through
// the one guarded path (`apply_weights`).
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared state.
//   - The ledger manages its own interior locking.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::fusion::CalibrationState;
use crate::ledger::{LedgerCounts, PredictionLedger};
use crate::learning::CycleReport;
use crate::runtime_config::RuntimeConfig;
use crate::store::{AttributionStore, LedgerStore, WeightStore};
use crate::types::MarketContext;
use crate::weights::WeightTable;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent cycle reports to retain.
const MAX_RECENT_CYCLES: usize = 24;

/// A recorded operational error for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Central state shared across async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation so dashboard clients can detect staleness cheaply.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Weight table (the one shared mutable resource) ──────────────────
    weights: RwLock<WeightTable>,
    weight_store: WeightStore,

    // ── Prediction tracking ─────────────────────────────────────────────
    pub ledger: PredictionLedger,
    pub attribution_store: AttributionStore,

    // ── Calibration ─────────────────────────────────────────────────────
    pub calibration: RwLock<CalibrationState>,
    pub market_context: RwLock<MarketContext>,

    // ── Operational ring buffers ────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub recent_cycles: RwLock<Vec<CycleReport>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct state from config: open the stores under `data_dir`,
    /// replay the ledger, and load or seed the weight table.
    pub fn new(config: RuntimeConfig, engine_ids: &[&str]) -> Result<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let weight_store = WeightStore::new(data_dir.join("weights.json"));
        let attribution_store = AttributionStore::new(data_dir.join("attribution.json"));
        let ledger = PredictionLedger::open(LedgerStore::new(data_dir.join("predictions.jsonl")))
            .context("failed to open prediction ledger")?;

        // Load the persisted table, or seed every known engine at 1.0 with
        // any configured overrides (clamped into bounds).
        let weights = match weight_store.load().context("failed to load weight table")? {
            Some(table) => table,
            None => {
                let mut table = WeightTable::seeded(engine_ids.iter().copied());
                for (engine_id, &value) in &config.weight_overrides {
                    table.set_clamped(engine_id, value, config.weight_floor, config.weight_ceiling);
                }
                weight_store
                    .save(&table)
                    .context("failed to persist seeded weight table")?;
                table
            }
        };

        Ok(Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            weights: RwLock::new(weights),
            weight_store,
            ledger,
            attribution_store,
            calibration: RwLock::new(CalibrationState::neutral()),
            market_context: RwLock::new(MarketContext::default()),
            recent_errors: RwLock::new(Vec::new()),
            recent_cycles: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Weight table access ─────────────────────────────────────────────

    /// Cloned snapshot of the current weight table. Scorers work entirely
    /// on the snapshot, so an optimizer write never blocks a read in
    /// progress and vice versa.
    pub fn weight_snapshot(&self) -> WeightTable {
        self.weights.read().clone()
    }

    /// Install a new weight table. The one writer path: called only by the
    /// cycle orchestrator, which serialises against itself. Persists to the
    /// store before swapping the in-memory table, so on failure the old
    /// table remains authoritative everywhere.
    pub fn apply_weights(&self, table: WeightTable) -> Result<(), crate::errors::FusionError> {
        self.weight_store.save(&table)?;
        *self.weights.write() = table;
        self.increment_version();
        Ok(())
    }

    // ── Calibration ─────────────────────────────────────────────────────

    pub fn drift_factor(&self) -> f64 {
        self.calibration.read().drift_factor
    }

    // ── Error log ───────────────────────────────────────────────────────

    /// Record an operator-visible error. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted first.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Cycle reports ───────────────────────────────────────────────────

    pub fn push_cycle_report(&self, report: CycleReport) {
        let mut cycles = self.recent_cycles.write();
        cycles.push(report);
        while cycles.len() > MAX_RECENT_CYCLES {
            cycles.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot builder ────────────────────────────────────────────────

    /// Build the serialisable snapshot served at `GET /api/v1/state`.
    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            weights: self.weight_snapshot(),
            market_context: *self.market_context.read(),
            calibration: self.calibration.read().clone(),
            ledger: self.ledger.counts(),
            last_cycle: self.recent_cycles.read().last().cloned(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Full engine snapshot for the dashboard API.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub weights: WeightTable,
    pub market_context: MarketContext,
    pub calibration: CalibrationState,
    pub ledger: LedgerCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
    pub recent_errors: Vec<ErrorRecord>,
}
