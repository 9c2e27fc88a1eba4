// =============================================================================
// Position Sizer — fractional-Kelly allocation + stop/target geometry
// =============================================================================
//
// Converts calibrated confidence into a bounded allocation percentage and
// the price levels a prediction will be graded against.
//
//   win_probability = monotonic S-curve of confidence
//   raw_kelly       = p - (1 - p) / risk_reward
//   allocation_pct  = clamp(raw_kelly * scalar, 0, max_cap)
//
// The Kelly scalar is halved in a High volatility profile. Stop and target
// distances widen 20% in High volatility and tighten 20% in Low, so exits
// sit outside ordinary noise in rough tape and closer in quiet tape.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime_config::{TierTable, WinProbParams};
use crate::types::{AssetTier, VolatilityProfile};

/// Stop/target widening multiplier in a High volatility profile, and the
/// reciprocal tightening in Low.
const HIGH_VOL_EXIT_MULT: f64 = 1.2;
const LOW_VOL_EXIT_MULT: f64 = 0.8;

/// A complete position/risk plan for one prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub tier: AssetTier,
    pub confidence: f64,
    pub volatility_profile: VolatilityProfile,

    /// Percent of capital to allocate, in `[0, max_cap(tier)]`.
    pub allocation_pct: f64,

    /// Stop distance below entry, percent.
    pub stop_pct: f64,

    /// First-target distance above entry, percent. Targets 2 and 3 sit at
    /// two and three times this distance.
    pub target_pct: f64,

    /// The win probability the Kelly fraction was computed from.
    pub win_probability: f64,

    /// Reward : risk ratio assumed for this tier.
    pub risk_reward: f64,
}

/// Price levels derived from an entry price and a plan. Always
/// `stop < entry < tp1 < tp2 < tp3` for any positive entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
}

pub struct PositionSizer;

impl PositionSizer {
    /// Map calibrated confidence to win probability.
    ///
    /// Logistic curve, strictly increasing in confidence. With default
    /// parameters: ~0.54 at confidence 55, ~0.65 at 70, ~0.77 at 100.
    pub fn win_probability(confidence: f64, params: &WinProbParams) -> f64 {
        let c = confidence.clamp(0.0, 100.0);
        let sigmoid = 1.0 / (1.0 + (-(c - params.midpoint) / params.steepness).exp());
        params.floor + params.range * sigmoid
    }

    /// Build the allocation plan for one prediction.
    pub fn plan(
        confidence: f64,
        tier: AssetTier,
        volatility: VolatilityProfile,
        win_prob: &WinProbParams,
        tiers: &TierTable,
    ) -> AllocationPlan {
        let params = tiers.params(tier);
        let p = Self::win_probability(confidence, win_prob);

        let raw_kelly = p - (1.0 - p) / params.risk_reward;

        // Half-Kelly on top of the tier scalar when the tape is rough.
        let scalar = if volatility == VolatilityProfile::High {
            params.kelly_scalar / 2.0
        } else {
            params.kelly_scalar
        };

        let allocation_pct = (raw_kelly * scalar * 100.0).clamp(0.0, params.max_alloc_pct);

        let exit_mult = match volatility {
            VolatilityProfile::High => HIGH_VOL_EXIT_MULT,
            VolatilityProfile::Low => LOW_VOL_EXIT_MULT,
            VolatilityProfile::Normal => 1.0,
        };

        let stop_pct = params.base_stop_pct * exit_mult;
        let target_pct = params.base_target_pct * exit_mult;

        debug!(
            tier = %tier,
            confidence = format!("{:.1}", confidence),
            win_probability = format!("{:.3}", p),
            raw_kelly = format!("{:.4}", raw_kelly),
            allocation_pct = format!("{:.2}", allocation_pct),
            stop_pct = format!("{:.2}", stop_pct),
            target_pct = format!("{:.2}", target_pct),
            volatility = %volatility,
            "allocation plan built"
        );

        AllocationPlan {
            tier,
            confidence,
            volatility_profile: volatility,
            allocation_pct,
            stop_pct,
            target_pct,
            win_probability: p,
            risk_reward: params.risk_reward,
        }
    }

    /// Project a plan onto an entry price.
    pub fn levels(entry: f64, plan: &AllocationPlan) -> PriceLevels {
        PriceLevels {
            entry,
            stop_loss: entry * (1.0 - plan.stop_pct / 100.0),
            take_profit_1: entry * (1.0 + plan.target_pct / 100.0),
            take_profit_2: entry * (1.0 + 2.0 * plan.target_pct / 100.0),
            take_profit_3: entry * (1.0 + 3.0 * plan.target_pct / 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> (WinProbParams, TierTable) {
        (WinProbParams::default(), TierTable::default())
    }

    #[test]
    fn win_probability_is_monotonic_and_anchored() {
        let params = WinProbParams::default();
        let mut prev = 0.0;
        for c in 0..=100 {
            let p = PositionSizer::win_probability(c as f64, &params);
            assert!(p > prev, "p must be strictly increasing");
            prev = p;
        }
        // Moderate confidence lands near 0.55.
        let moderate = PositionSizer::win_probability(55.0, &params);
        assert!((0.50..=0.60).contains(&moderate), "moderate p = {moderate}");
        // Maximum confidence approaches but does not exceed 0.80.
        let max = PositionSizer::win_probability(100.0, &params);
        assert!((0.75..=0.80).contains(&max), "max p = {max}");
    }

    #[test]
    fn allocation_bounded_per_tier() {
        let (wp, tiers) = defaults();
        for tier in [
            AssetTier::Conservative,
            AssetTier::Growth,
            AssetTier::Aggressive,
        ] {
            let cap = tiers.params(tier).max_alloc_pct;
            for c in [0.0, 25.0, 50.0, 75.0, 100.0] {
                for vol in [
                    VolatilityProfile::Low,
                    VolatilityProfile::Normal,
                    VolatilityProfile::High,
                ] {
                    let plan = PositionSizer::plan(c, tier, vol, &wp, &tiers);
                    assert!(
                        plan.allocation_pct >= 0.0 && plan.allocation_pct <= cap,
                        "allocation {} outside [0, {}] at c={} tier={} vol={}",
                        plan.allocation_pct,
                        cap,
                        c,
                        tier,
                        vol
                    );
                }
            }
        }
    }

    #[test]
    fn low_confidence_allocates_nothing() {
        let (wp, tiers) = defaults();
        // p(0) ~= 0.36: negative Kelly for every tier's risk:reward.
        let plan = PositionSizer::plan(
            0.0,
            AssetTier::Conservative,
            VolatilityProfile::Normal,
            &wp,
            &tiers,
        );
        assert_eq!(plan.allocation_pct, 0.0);
    }

    #[test]
    fn high_volatility_halves_the_scalar() {
        // Confidence 40 keeps the growth-tier allocation below its cap in
        // both profiles, so the halving is exact rather than clamped away.
        let (wp, tiers) = defaults();
        let normal = PositionSizer::plan(
            40.0,
            AssetTier::Growth,
            VolatilityProfile::Normal,
            &wp,
            &tiers,
        );
        let high = PositionSizer::plan(
            40.0,
            AssetTier::Growth,
            VolatilityProfile::High,
            &wp,
            &tiers,
        );
        assert!(normal.allocation_pct < tiers.growth.max_alloc_pct);
        assert!(high.allocation_pct < normal.allocation_pct);
        assert!((high.allocation_pct * 2.0 - normal.allocation_pct).abs() < 1e-9);
    }

    #[test]
    fn exits_widen_in_high_vol_and_tighten_in_low() {
        let (wp, tiers) = defaults();
        let base = tiers.growth.base_stop_pct;
        let high = PositionSizer::plan(
            70.0,
            AssetTier::Growth,
            VolatilityProfile::High,
            &wp,
            &tiers,
        );
        let low = PositionSizer::plan(70.0, AssetTier::Growth, VolatilityProfile::Low, &wp, &tiers);
        assert!((high.stop_pct - base * 1.2).abs() < 1e-9);
        assert!((low.stop_pct - base * 0.8).abs() < 1e-9);
    }

    #[test]
    fn levels_are_ordered_around_entry() {
        let (wp, tiers) = defaults();
        for tier in [
            AssetTier::Conservative,
            AssetTier::Growth,
            AssetTier::Aggressive,
        ] {
            let plan = PositionSizer::plan(80.0, tier, VolatilityProfile::Normal, &wp, &tiers);
            let levels = PositionSizer::levels(250.0, &plan);
            assert!(levels.stop_loss < levels.entry);
            assert!(levels.entry < levels.take_profit_1);
            assert!(levels.take_profit_1 < levels.take_profit_2);
            assert!(levels.take_profit_2 < levels.take_profit_3);
        }
    }

    #[test]
    fn risk_reward_ladder_by_tier() {
        let (wp, tiers) = defaults();
        let cons = PositionSizer::plan(
            70.0,
            AssetTier::Conservative,
            VolatilityProfile::Normal,
            &wp,
            &tiers,
        );
        let growth =
            PositionSizer::plan(70.0, AssetTier::Growth, VolatilityProfile::Normal, &wp, &tiers);
        let aggr = PositionSizer::plan(
            70.0,
            AssetTier::Aggressive,
            VolatilityProfile::Normal,
            &wp,
            &tiers,
        );
        assert!((cons.risk_reward - 1.5).abs() < f64::EPSILON);
        assert!((growth.risk_reward - 2.0).abs() < f64::EPSILON);
        assert!((aggr.risk_reward - 3.0).abs() < f64::EPSILON);
    }
}
