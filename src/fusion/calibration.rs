// =============================================================================
// Confidence Calibrator — regime modifiers + learned drift correction
// =============================================================================
//
// Adjusts a fused consensus score for the current market environment
// (volatility bucket, seasonality window, asset tier) and for the engine's
// own historical over/under-confidence (the drift-correction factor).
//
// The drift factor is recomputed once per learning cycle, never per call:
// it is the ratio of realized win rate to predicted win rate over a rolling
// window, clamped into a configured band so one bad window cannot crater
// every score.
//
// Whether regime modifiers apply before or after the drift factor is a
// configured policy (`CalibrationOrder`), not a hardcoded choice.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runtime_config::CalibrationParams;
use crate::types::{AssetTier, CalibrationOrder, MarketContext, Seasonality, VolatilityProfile};

// =============================================================================
// Calibrator (pure)
// =============================================================================

pub struct Calibrator;

impl Calibrator {
    /// Calibrate a fused score. Output is always clamped to [0, 100].
    pub fn apply(
        score: f64,
        ctx: MarketContext,
        tier: AssetTier,
        drift_factor: f64,
        params: &CalibrationParams,
        order: CalibrationOrder,
    ) -> f64 {
        let calibrated = match order {
            CalibrationOrder::RegimeThenDrift => {
                Self::regime_adjust(score, ctx, tier, params) * drift_factor
            }
            CalibrationOrder::DriftThenRegime => {
                Self::regime_adjust(score * drift_factor, ctx, tier, params)
            }
        };

        let clamped = calibrated.clamp(0.0, 100.0);

        debug!(
            raw = format!("{:.2}", score),
            calibrated = format!("{:.2}", clamped),
            drift_factor = format!("{:.3}", drift_factor),
            volatility = %ctx.volatility,
            seasonality = %ctx.seasonality,
            tier = %tier,
            "confidence calibrated"
        );

        clamped
    }

    /// Apply the multiplicative volatility/tier modifiers and the additive
    /// seasonality adjustment.
    fn regime_adjust(
        score: f64,
        ctx: MarketContext,
        tier: AssetTier,
        params: &CalibrationParams,
    ) -> f64 {
        let vol_mult = match ctx.volatility {
            VolatilityProfile::Low => params.low_vol_multiplier,
            VolatilityProfile::Normal => 1.0,
            VolatilityProfile::High => params.high_vol_multiplier,
        };

        let seasonal_adj = match ctx.seasonality {
            Seasonality::Normal => 0.0,
            Seasonality::FomcWeek => params.fomc_adjustment,
            Seasonality::EarningsSeason => params.earnings_adjustment,
        };

        let tier_mult = match tier {
            AssetTier::Aggressive => params.aggressive_tier_multiplier,
            _ => 1.0,
        };

        score * vol_mult * tier_mult + seasonal_adj
    }
}

// =============================================================================
// CalibrationState — the periodically recomputed drift factor
// =============================================================================

/// Rolling comparison of predicted confidence vs realized outcomes, plus
/// the drift-correction factor it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Multiplier applied to calibrated confidence. 1.0 = no correction.
    pub drift_factor: f64,

    /// Mean predicted win probability over the window (confidence / 100).
    pub predicted_win_rate: Option<f64>,

    /// Realized win rate over the window: wins / (wins + losses).
    pub realized_win_rate: Option<f64>,

    /// Number of decisive (WIN/LOSS) outcomes in the window.
    pub sample_size: u32,

    /// When the factor was last recomputed.
    pub computed_at: Option<String>,
}

impl CalibrationState {
    /// Boot-time state: no correction until outcomes accumulate.
    pub fn neutral() -> Self {
        Self {
            drift_factor: 1.0,
            predicted_win_rate: None,
            realized_win_rate: None,
            sample_size: 0,
            computed_at: None,
        }
    }

    /// Recompute the drift factor from `(confidence_at_prediction, won)`
    /// pairs of decisive terminal predictions inside the rolling window.
    ///
    /// With fewer than `min_sample` outcomes the previous factor is kept:
    /// a thin window is noise, not evidence of miscalibration.
    pub fn recompute(
        &mut self,
        outcomes: &[(f64, bool)],
        floor: f64,
        ceiling: f64,
        min_sample: u32,
    ) {
        if (outcomes.len() as u32) < min_sample {
            debug!(
                sample_size = outcomes.len(),
                min_sample, "drift factor unchanged: insufficient outcomes"
            );
            return;
        }

        let predicted =
            outcomes.iter().map(|(c, _)| c / 100.0).sum::<f64>() / outcomes.len() as f64;
        let wins = outcomes.iter().filter(|(_, won)| *won).count();
        let realized = wins as f64 / outcomes.len() as f64;

        let raw = if predicted > 0.0 {
            realized / predicted
        } else {
            1.0
        };
        let factor = raw.clamp(floor, ceiling);

        info!(
            predicted = format!("{:.3}", predicted),
            realized = format!("{:.3}", realized),
            raw_factor = format!("{:.3}", raw),
            drift_factor = format!("{:.3}", factor),
            sample_size = outcomes.len(),
            "drift-correction factor recomputed"
        );

        self.drift_factor = factor;
        self.predicted_win_rate = Some(predicted);
        self.realized_win_rate = Some(realized);
        self.sample_size = outcomes.len() as u32;
        self.computed_at = Some(Utc::now().to_rfc3339());
    }
}
