// =============================================================================
// Drift Detector — damped application of new weight tables
// =============================================================================
//
// One noisy learning window must not destabilise the ensemble. The detector
// measures the mean absolute change between the applied table and the
// optimizer's candidate; above the threshold the candidate is not applied
// directly but blended toward the old table:
//
//   applied = old * (1 - alpha) + candidate * alpha,  alpha < 1
//
// The event is logged as a warning, never an error: a damped update is a
// degraded-but-expected mode, not a failure.
// =============================================================================

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::FusionError;
use crate::weights::WeightTable;

/// Outcome of one drift check, kept in the cycle report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Mean absolute multiplier change between old and candidate tables.
    pub distance: f64,
    pub threshold: f64,
    /// Whether the candidate was blended instead of applied directly.
    pub damped: bool,
    /// Blend factor used when damped.
    pub blend_alpha: f64,
}

pub struct DriftDetector;

impl DriftDetector {
    /// Decide how to apply `candidate` against the currently `applied`
    /// table. Returns the table to install plus the report.
    pub fn apply(
        applied: &WeightTable,
        candidate: WeightTable,
        threshold: f64,
        blend_alpha: f64,
    ) -> (WeightTable, DriftReport) {
        let distance = applied.mean_abs_change(&candidate);

        if distance <= threshold {
            debug!(
                distance = format!("{:.4}", distance),
                threshold = format!("{:.4}", threshold),
                "weight drift within threshold; applying directly"
            );
            let report = DriftReport {
                distance,
                threshold,
                damped: false,
                blend_alpha,
            };
            return (candidate, report);
        }

        let event = FusionError::DriftExceeded {
            distance,
            threshold,
        };
        warn!(
            error = %event,
            blend_alpha = format!("{:.2}", blend_alpha),
            "damping weight update"
        );

        // Blend over the union of engine ids. Both inputs are bounded, so
        // every convex combination is bounded too.
        let ids: HashSet<String> = applied
            .multipliers
            .keys()
            .chain(candidate.multipliers.keys())
            .cloned()
            .collect();

        let mut blended = candidate.clone();
        for id in ids {
            let old = applied.multiplier(&id);
            let new = candidate.multiplier(&id);
            blended
                .multipliers
                .insert(id, old * (1.0 - blend_alpha) + new * blend_alpha);
        }

        let report = DriftReport {
            distance,
            threshold,
            damped: true,
            blend_alpha,
        };
        (blended, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_change_applies_directly() {
        let old = WeightTable::seeded(["gamma", "sentiment"]);
        let mut candidate = old.next_version();
        candidate.set_clamped("gamma", 1.1, 0.5, 2.0);

        let (applied, report) = DriftDetector::apply(&old, candidate, 0.15, 0.5);
        assert!(!report.damped);
        assert!((applied.multiplier("gamma") - 1.1).abs() < 1e-12);
    }

    #[test]
    fn large_change_is_blended() {
        let old = WeightTable::seeded(["gamma", "sentiment"]);
        let mut candidate = old.next_version();
        candidate.set_clamped("gamma", 2.0, 0.5, 2.0);
        candidate.set_clamped("sentiment", 0.5, 0.5, 2.0);
        // distance = (1.0 + 0.5) / 2 = 0.75 > 0.15.

        let (applied, report) = DriftDetector::apply(&old, candidate, 0.15, 0.5);
        assert!(report.damped);
        assert!((report.distance - 0.75).abs() < 1e-12);
        // Halfway between old (1.0) and candidate.
        assert!((applied.multiplier("gamma") - 1.5).abs() < 1e-12);
        assert!((applied.multiplier("sentiment") - 0.75).abs() < 1e-12);
        // Still bounded.
        assert!(applied.within_bounds(0.5, 2.0));
    }

    #[test]
    fn blended_table_keeps_candidate_version() {
        let old = WeightTable::seeded(["gamma"]);
        let mut candidate = old.next_version();
        candidate.set_clamped("gamma", 2.0, 0.5, 2.0);

        let (applied, _) = DriftDetector::apply(&old, candidate, 0.01, 0.3);
        assert_eq!(applied.version, old.version + 1);
    }
}
