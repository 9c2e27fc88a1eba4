// =============================================================================
// Attribution Engine — per-engine win/loss accounting
// =============================================================================
//
// Walks the terminal predictions inside the lookback window and, for each,
// credits every engine that was active (nonzero) in the signal snapshot at
// prediction time: a WIN increments the engine's win count, a LOSS its loss
// count. NEUTRAL outcomes carry no credit either way.
//
// This is co-occurrence attribution, not causal inference: an engine gets
// credit for merely being present in a winning ensemble. There is no
// counterfactual ground truth to do better with, so the heuristic is kept
// and labeled as such rather than dressed up.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ledger::TradePrediction;
use crate::types::PredictionState;

/// Win/loss tally for one engine over one lookback period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub engine_id: String,
    pub win_count: u32,
    pub loss_count: u32,
    /// Decisive outcomes the engine was active in: wins + losses.
    pub sample_size: u32,
    /// Human-readable period label, e.g. "60d".
    pub period: String,
}

impl AttributionRecord {
    fn new(engine_id: &str, period: &str) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            win_count: 0,
            loss_count: 0,
            sample_size: 0,
            period: period.to_string(),
        }
    }

    /// Net contribution in [-1, 1]: (wins - losses) / sample.
    pub fn net_contribution(&self) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        (self.win_count as f64 - self.loss_count as f64) / self.sample_size as f64
    }
}

pub struct AttributionEngine;

impl AttributionEngine {
    /// Tally engine activity across `terminal` predictions.
    ///
    /// Engines absent from every snapshot simply do not appear in the
    /// output; the optimizer leaves their weights untouched.
    pub fn build(
        terminal: &[TradePrediction],
        period: &str,
    ) -> BTreeMap<String, AttributionRecord> {
        let mut records: BTreeMap<String, AttributionRecord> = BTreeMap::new();

        for prediction in terminal {
            let won = match prediction.state {
                PredictionState::Win => true,
                PredictionState::Loss => false,
                // Pending should not be passed in; Neutral carries no credit.
                _ => continue,
            };

            for (engine_id, &score) in &prediction.signal_snapshot {
                if score == 0.0 {
                    // The engine abstained on this prediction.
                    continue;
                }

                let record = records
                    .entry(engine_id.clone())
                    .or_insert_with(|| AttributionRecord::new(engine_id, period));

                if won {
                    record.win_count += 1;
                } else {
                    record.loss_count += 1;
                }
                record.sample_size += 1;
            }
        }

        for record in records.values() {
            debug!(
                engine_id = %record.engine_id,
                wins = record.win_count,
                losses = record.loss_count,
                net = format!("{:+.3}", record.net_contribution()),
                "attribution tallied"
            );
        }

        info!(
            engines = records.len(),
            predictions = terminal.len(),
            period,
            "attribution pass complete"
        );

        records
    }
}
