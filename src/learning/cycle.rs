// =============================================================================
// Cycle Orchestrator — the scheduled learning loop
// =============================================================================
//
// Once per interval:
//   1. Grade open predictions against live prices.
//   2. Tally attribution over terminal predictions in the lookback window.
//   3. Optimise a candidate weight table from the tallies.
//   4. Drift-check and apply (or blend) the candidate.
//   5. Recompute the calibration drift factor.
//
// The orchestrator is the only writer of the weight table and runs under
// mutual exclusion against itself: if a cycle is still in progress when the
// next trigger fires, the new invocation is skipped outright. A failure in
// any persistence step aborts the remainder of that cycle; the previously
// applied weight table stays in effect.
// =============================================================================

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::errors::FusionError;
use crate::ledger::grading::{GradeSummary, OutcomeGrader};
use crate::learning::attribution::AttributionEngine;
use crate::learning::drift::{DriftDetector, DriftReport};
use crate::learning::optimizer::{OptimizerParams, WeightOptimizer};
use crate::providers::PriceProvider;
use crate::types::PredictionState;
use crate::weights::WeightTable;

/// Serialisable record of one completed learning cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub id: String,
    pub started_at: String,
    pub duration_ms: u64,
    pub grade: GradeSummary,
    /// Engines that appeared in the attribution tallies.
    pub engines_attributed: usize,
    pub weights_version_before: u64,
    pub weights_version_after: u64,
    /// The weight table in effect after this cycle.
    pub new_weights: WeightTable,
    pub drift: DriftReport,
    /// Calibration drift factor in effect after this cycle.
    pub drift_factor: f64,
}

pub struct CycleOrchestrator {
    state: Arc<AppState>,
    grader: OutcomeGrader,
    /// Serialises cycles against each other. `try_lock` failure means a
    /// prior cycle is still running and this invocation is skipped.
    guard: Mutex<()>,
}

impl CycleOrchestrator {
    pub fn new(state: Arc<AppState>, provider: Arc<dyn PriceProvider>) -> Self {
        Self {
            state,
            grader: OutcomeGrader::new(provider),
            guard: Mutex::new(()),
        }
    }

    /// Run one learning cycle. Returns `Ok(None)` when skipped because a
    /// prior cycle is still in progress.
    pub async fn run_learning_cycle(&self) -> Result<Option<CycleReport>, FusionError> {
        let _guard = match self.guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("learning cycle already in progress; skipping this trigger");
                return Ok(None);
            }
        };

        let started = std::time::Instant::now();
        let started_at = Utc::now().to_rfc3339();
        info!("learning cycle started");

        let (time_box_days, grade_delay_ms, lookback_days, optimizer_params) = {
            let cfg = self.state.runtime_config.read();
            (
                cfg.time_box_days,
                cfg.grade_delay_ms,
                cfg.lookback_days,
                OptimizerParams {
                    learning_rate: cfg.learning_rate,
                    weight_floor: cfg.weight_floor,
                    weight_ceiling: cfg.weight_ceiling,
                    min_sample_size: cfg.min_sample_size,
                },
            )
        };

        // ── 1. Grade open predictions ───────────────────────────────────
        // Each graded entry commits to the journal independently, so a
        // crash mid-pass loses at most the in-flight entry.
        let grade = self
            .grader
            .grade_open_predictions(&self.state.ledger, time_box_days, grade_delay_ms)
            .await;

        if grade.persist_failures > 0 {
            self.state.push_error(format!(
                "grading: {} journal writes failed; entries remain pending",
                grade.persist_failures
            ));
        }

        // ── 2. Attribution over the lookback window ─────────────────────
        let cutoff = Utc::now() - Duration::days(lookback_days);
        let terminal = self.state.ledger.terminal_since(cutoff);
        let attribution = AttributionEngine::build(&terminal, &format!("{lookback_days}d"));

        if let Err(e) = self.state.attribution_store.save(&attribution) {
            error!(error = %e, "attribution persistence failed; aborting cycle");
            self.state.push_error(format!("learning cycle aborted: {e}"));
            return Err(e);
        }

        // ── 3. Optimise a candidate table ───────────────────────────────
        let base = self.state.weight_snapshot();
        let candidate = WeightOptimizer::optimize(&base, &attribution, optimizer_params);

        // ── 4. Drift check + apply ──────────────────────────────────────
        let (drift_threshold, blend_alpha) = {
            let cfg = self.state.runtime_config.read();
            (cfg.drift_threshold, cfg.drift_blend_alpha)
        };
        let (applied, drift) = DriftDetector::apply(&base, candidate, drift_threshold, blend_alpha);

        if let Err(e) = self.state.apply_weights(applied) {
            error!(error = %e, "weight table persistence failed; prior table remains in effect");
            self.state.push_error(format!("learning cycle aborted: {e}"));
            return Err(e);
        }

        // ── 5. Recompute the calibration drift factor ───────────────────
        self.recompute_drift_factor();

        let new_weights = self.state.weight_snapshot();
        let report = CycleReport {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            grade,
            engines_attributed: attribution.len(),
            weights_version_before: base.version,
            weights_version_after: new_weights.version,
            new_weights,
            drift,
            drift_factor: self.state.drift_factor(),
        };

        info!(
            duration_ms = report.duration_ms,
            graded = report.grade.evaluated,
            wins = report.grade.wins,
            losses = report.grade.losses,
            engines = report.engines_attributed,
            damped = report.drift.damped,
            weights_version = report.weights_version_after,
            "learning cycle complete"
        );

        self.state.push_cycle_report(report.clone());
        Ok(Some(report))
    }

    /// Compare predicted confidence with realized outcomes over the rolling
    /// calibration window and refresh the drift-correction factor.
    fn recompute_drift_factor(&self) {
        let (window_days, floor, ceiling, min_sample) = {
            let cfg = self.state.runtime_config.read();
            (
                cfg.calibration_window_days,
                cfg.drift_factor_floor,
                cfg.drift_factor_ceiling,
                cfg.min_sample_size,
            )
        };

        let cutoff = Utc::now() - Duration::days(window_days);
        let outcomes: Vec<(f64, bool)> = self
            .state
            .ledger
            .terminal_since(cutoff)
            .iter()
            .filter_map(|p| match p.state {
                PredictionState::Win => Some((p.confidence_at_prediction, true)),
                PredictionState::Loss => Some((p.confidence_at_prediction, false)),
                _ => None,
            })
            .collect();

        self.state
            .calibration
            .write()
            .recompute(&outcomes, floor, ceiling, min_sample);
    }
}

/// Periodic driver. Spawn once at startup:
///
///   tokio::spawn(run_cycle_loop(orchestrator));
///
/// The interval is re-read from config each tick so it can be retuned at
/// runtime.
pub async fn run_cycle_loop(orchestrator: Arc<CycleOrchestrator>) {
    loop {
        let interval_secs = orchestrator
            .state
            .runtime_config
            .read()
            .cycle_interval_secs
            .max(1);
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;

        match orchestrator.run_learning_cycle().await {
            Ok(Some(report)) => {
                info!(cycle_id = %report.id, "scheduled learning cycle finished");
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "scheduled learning cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::KNOWN_ENGINE_IDS;
    use crate::ledger::TradePrediction;
    use crate::providers::StaticPriceProvider;
    use crate::runtime_config::RuntimeConfig;

    fn temp_state() -> (Arc<AppState>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("meridian-cycle-{}", uuid::Uuid::new_v4()));
        let mut config = RuntimeConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..RuntimeConfig::default()
        };
        config.grade_delay_ms = 0;
        let state = Arc::new(AppState::new(config, KNOWN_ENGINE_IDS).unwrap());
        (state, dir)
    }

    fn shadow_prediction(entry: f64) -> TradePrediction {
        let mut p = TradePrediction::sample("SHDW", entry);
        p.stop_loss = entry * 0.95;
        p.take_profit_1 = entry * 1.10;
        p.signal_snapshot = [("shadow_flow".to_string(), 70.0)].into_iter().collect();
        p
    }

    #[tokio::test]
    async fn winning_engine_weight_increases_after_one_cycle() {
        let (state, dir) = temp_state();

        // Six pending predictions carried only by shadow_flow.
        for _ in 0..6 {
            state.ledger.insert(shadow_prediction(100.0)).unwrap();
        }

        let provider = Arc::new(StaticPriceProvider::new());
        provider.set_price("SHDW", 111.0); // above every TP1

        let orchestrator = CycleOrchestrator::new(state.clone(), provider);
        let report = orchestrator.run_learning_cycle().await.unwrap().unwrap();

        assert_eq!(report.grade.wins, 6);
        assert_eq!(report.engines_attributed, 1);
        assert!(!report.drift.damped);

        let table = state.weight_snapshot();
        // shadow_flow strictly increased; untouched engines unchanged.
        assert!(table.multiplier("shadow_flow") > 1.0);
        assert_eq!(table.multiplier("gamma_exposure"), 1.0);
        assert_eq!(table.multiplier("sentiment"), 1.0);
        assert!(table.within_bounds(0.5, 2.0));
        assert_eq!(table.version, report.weights_version_after);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let (state, dir) = temp_state();
        let provider = Arc::new(StaticPriceProvider::new());
        let orchestrator = CycleOrchestrator::new(state, provider);

        // Simulate an in-flight cycle by holding the guard.
        let held = orchestrator.guard.try_lock().unwrap();
        let result = orchestrator.run_learning_cycle().await.unwrap();
        assert!(result.is_none());
        drop(held);

        // Once released, cycles run again.
        let result = orchestrator.run_learning_cycle().await.unwrap();
        assert!(result.is_some());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn dark_quotes_leave_everything_untouched() {
        let (state, dir) = temp_state();
        state.ledger.insert(shadow_prediction(100.0)).unwrap();

        // Provider has no quotes at all.
        let provider = Arc::new(StaticPriceProvider::new());
        let orchestrator = CycleOrchestrator::new(state.clone(), provider);
        let report = orchestrator.run_learning_cycle().await.unwrap().unwrap();

        assert_eq!(report.grade.skipped, 1);
        assert_eq!(report.grade.wins, 0);
        assert_eq!(state.ledger.pending().len(), 1);
        // No attribution, so no weight moved.
        assert_eq!(report.engines_attributed, 0);
        assert_eq!(state.weight_snapshot().multiplier("shadow_flow"), 1.0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn drift_factor_updates_from_decisive_outcomes() {
        let (state, dir) = temp_state();

        // Six confident predictions that all lose at the stop.
        for _ in 0..6 {
            let mut p = shadow_prediction(100.0);
            p.confidence_at_prediction = 90.0;
            state.ledger.insert(p).unwrap();
        }

        let provider = Arc::new(StaticPriceProvider::new());
        provider.set_price("SHDW", 90.0); // below every stop

        let orchestrator = CycleOrchestrator::new(state.clone(), provider);
        let report = orchestrator.run_learning_cycle().await.unwrap().unwrap();

        assert_eq!(report.grade.losses, 6);
        // Realized 0.0 vs predicted 0.9: the factor clamps at the floor.
        assert!((report.drift_factor - 0.5).abs() < 1e-12);

        std::fs::remove_dir_all(dir).ok();
    }
}
