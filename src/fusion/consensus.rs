// =============================================================================
// Consensus Scorer — weighted fusion with abstention-aware rescaling
// =============================================================================
//
// Fuses the per-engine readings for one ticker into a single 0-100 score.
// Engines that abstain (normalise to exactly 0) are excluded from both the
// numerator and the weight denominator, so the remaining weights rescale to
// fill 100% and an abstention never drags the score toward bearish.
//
// Pure function of its inputs plus a weight-table snapshot: no side effects,
// safe for unlimited concurrent callers.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fusion::normalizer::normalize_score;
use crate::runtime_config::TierBands;
use crate::types::ConfidenceTier;
use crate::weights::WeightTable;

/// Score returned when every engine abstained. Neutral by construction, and
/// distinguishable from a confidently-neutral read via
/// `active_engine_count == 0`.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Result of fusing one ticker's readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub ticker: String,

    /// Weighted mean of the active engines' normalised scores, or 50 when
    /// no engine was active.
    pub final_score: f64,

    pub confidence_tier: ConfidenceTier,

    /// Normalised score per supplied engine, abstainers included (at 0),
    /// for auditability.
    pub breakdown: BTreeMap<String, f64>,

    /// Number of engines that contributed a nonzero score.
    pub active_engine_count: usize,

    /// Sum of the weight multipliers of the active engines; 0 when none.
    pub total_weight_used: f64,

    /// Version of the weight table this result was fused under.
    pub weights_version: u64,
}

/// The consensus fusion function.
pub struct ConsensusScorer;

impl ConsensusScorer {
    /// Fuse `readings` (raw `engine_id -> score`) under the given weight
    /// table snapshot.
    pub fn score(
        ticker: &str,
        readings: &HashMap<String, f64>,
        weights: &WeightTable,
        bands: &TierBands,
    ) -> ConsensusResult {
        let mut breakdown = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut active = 0usize;

        for (engine_id, &raw) in readings {
            let score = normalize_score(raw);
            breakdown.insert(engine_id.clone(), score);

            // Exactly 0 means the engine abstained: it contributes to
            // neither the numerator nor the weight denominator.
            if score == 0.0 {
                continue;
            }

            let weight = weights.multiplier(engine_id);
            weighted_sum += score * weight;
            total_weight += weight;
            active += 1;
        }

        let final_score = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            NEUTRAL_SCORE
        };

        let confidence_tier = tier_for(final_score, bands);

        debug!(
            ticker,
            final_score = format!("{:.2}", final_score),
            tier = %confidence_tier,
            active_engines = active,
            total_weight = format!("{:.3}", total_weight),
            "consensus fused"
        );

        ConsensusResult {
            ticker: ticker.to_string(),
            final_score,
            confidence_tier,
            breakdown,
            active_engine_count: active,
            total_weight_used: total_weight,
            weights_version: weights.version,
        }
    }
}

/// Band a score into its confidence tier.
pub fn tier_for(score: f64, bands: &TierBands) -> ConfidenceTier {
    if score < bands.low_max {
        ConfidenceTier::Low
    } else if score < bands.medium_max {
        ConfidenceTier::Medium
    } else if score <= bands.high_max {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Maximum
    }
}
