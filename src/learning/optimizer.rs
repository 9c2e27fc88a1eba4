// =============================================================================
// Weight Optimizer — bounded multiplier updates from attribution
// =============================================================================
//
// Converts attribution tallies into a candidate weight table:
//
//   new_weight = clamp(base * (1 + k * net_contribution), floor, ceiling)
//
// The learning rate k is deliberately small so a short streak cannot whip
// the ensemble around. Engines below the minimum sample size, and engines
// with no attribution at all, keep their current weight untouched.
// =============================================================================

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::errors::FusionError;
use crate::learning::attribution::AttributionRecord;
use crate::weights::WeightTable;

/// Optimisation parameters, extracted from the runtime config.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerParams {
    pub learning_rate: f64,
    pub weight_floor: f64,
    pub weight_ceiling: f64,
    pub min_sample_size: u32,
}

pub struct WeightOptimizer;

impl WeightOptimizer {
    /// Produce the next-version candidate table. `base` is never mutated.
    pub fn optimize(
        base: &WeightTable,
        attribution: &BTreeMap<String, AttributionRecord>,
        params: OptimizerParams,
    ) -> WeightTable {
        let mut next = base.next_version();
        let mut adjusted = 0usize;
        let mut withheld = 0usize;

        for (engine_id, record) in attribution {
            if record.sample_size < params.min_sample_size {
                // Below the noise threshold: withhold, do not zero.
                let reason = FusionError::InsufficientSample {
                    engine_id: engine_id.clone(),
                    sample_size: record.sample_size,
                    minimum: params.min_sample_size,
                };
                debug!(error = %reason, "weight update withheld");
                withheld += 1;
                continue;
            }

            let current = base.multiplier(engine_id);
            let proposed = current * (1.0 + params.learning_rate * record.net_contribution());
            next.set_clamped(
                engine_id,
                proposed,
                params.weight_floor,
                params.weight_ceiling,
            );

            debug!(
                engine_id = %engine_id,
                current = format!("{:.3}", current),
                proposed = format!("{:.3}", proposed),
                applied = format!("{:.3}", next.multiplier(engine_id)),
                net = format!("{:+.3}", record.net_contribution()),
                sample = record.sample_size,
                "engine weight adjusted"
            );
            adjusted += 1;
        }

        info!(
            version = next.version,
            adjusted,
            withheld,
            "weight optimisation complete"
        );

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OptimizerParams {
        OptimizerParams {
            learning_rate: 0.2,
            weight_floor: 0.5,
            weight_ceiling: 2.0,
            min_sample_size: 5,
        }
    }

    fn record(engine: &str, wins: u32, losses: u32) -> (String, AttributionRecord) {
        (
            engine.to_string(),
            AttributionRecord {
                engine_id: engine.to_string(),
                win_count: wins,
                loss_count: losses,
                sample_size: wins + losses,
                period: "60d".to_string(),
            },
        )
    }

    #[test]
    fn all_win_engine_strictly_increases_others_unchanged() {
        // Six wins for shadow_flow only: its weight rises, every other
        // engine keeps its multiplier.
        let base = WeightTable::seeded(["shadow_flow", "gamma_exposure", "sentiment"]);
        let attribution: BTreeMap<_, _> = [record("shadow_flow", 6, 0)].into_iter().collect();

        let next = WeightOptimizer::optimize(&base, &attribution, params());

        assert!(next.multiplier("shadow_flow") > base.multiplier("shadow_flow"));
        assert!((next.multiplier("shadow_flow") - 1.2).abs() < 1e-9);
        assert_eq!(next.multiplier("gamma_exposure"), 1.0);
        assert_eq!(next.multiplier("sentiment"), 1.0);
        assert_eq!(next.version, base.version + 1);
    }

    #[test]
    fn losing_engine_is_debited() {
        let base = WeightTable::seeded(["narrative"]);
        let attribution: BTreeMap<_, _> = [record("narrative", 1, 5)].into_iter().collect();

        let next = WeightOptimizer::optimize(&base, &attribution, params());
        // net = (1-5)/6 = -0.6667; 1.0 * (1 - 0.2*0.6667) ~= 0.8667.
        assert!(next.multiplier("narrative") < 1.0);
        assert!(next.multiplier("narrative") >= 0.5);
    }

    #[test]
    fn below_min_sample_is_withheld() {
        let base = WeightTable::seeded(["gamma_exposure"]);
        let attribution: BTreeMap<_, _> = [record("gamma_exposure", 3, 0)].into_iter().collect();

        let next = WeightOptimizer::optimize(&base, &attribution, params());
        assert_eq!(next.multiplier("gamma_exposure"), 1.0);
    }

    #[test]
    fn weights_stay_bounded_under_repeated_optimisation() {
        let mut table = WeightTable::seeded(["shadow_flow", "narrative"]);
        let attribution: BTreeMap<_, _> = [record("shadow_flow", 20, 0), record("narrative", 0, 20)]
            .into_iter()
            .collect();

        for _ in 0..50 {
            table = WeightOptimizer::optimize(&table, &attribution, params());
            assert!(table.within_bounds(0.5, 2.0));
        }

        // Saturated at the bounds, not beyond them.
        assert!((table.multiplier("shadow_flow") - 2.0).abs() < 1e-9);
        assert!((table.multiplier("narrative") - 0.5).abs() < 1e-9);
    }
}
