// =============================================================================
// Runtime Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable of the fusion and learning pipeline lives here so the engine
// can be reconfigured without a rebuild. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash. All fields carry
// `#[serde(default)]` so adding new fields never breaks older config files.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AssetTier, CalibrationOrder};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_weight_floor() -> f64 {
    0.5
}

fn default_weight_ceiling() -> f64 {
    2.0
}

fn default_learning_rate() -> f64 {
    0.2
}

fn default_min_sample_size() -> u32 {
    5
}

fn default_lookback_days() -> i64 {
    60
}

fn default_drift_threshold() -> f64 {
    0.15
}

fn default_drift_blend_alpha() -> f64 {
    0.5
}

fn default_time_box_days() -> i64 {
    14
}

fn default_grade_delay_ms() -> u64 {
    250
}

fn default_cycle_interval_secs() -> u64 {
    3600
}

fn default_engine_timeout_ms() -> u64 {
    4000
}

fn default_calibration_window_days() -> i64 {
    30
}

fn default_drift_factor_floor() -> f64 {
    0.5
}

fn default_drift_factor_ceiling() -> f64 {
    1.5
}

fn default_data_dir() -> String {
    "data".to_string()
}

// =============================================================================
// TierBands
// =============================================================================

/// Confidence tier band edges. Scores at or below `low_max` are LOW, up to
/// `medium_max` MEDIUM, up to `high_max` HIGH, and above that MAXIMUM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBands {
    pub low_max: f64,
    pub medium_max: f64,
    pub high_max: f64,
}

impl Default for TierBands {
    fn default() -> Self {
        Self {
            low_max: 40.0,
            medium_max: 70.0,
            high_max: 85.0,
        }
    }
}

// =============================================================================
// TierParams
// =============================================================================

/// Per-tier sizing parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierParams {
    /// Reward : risk ratio assumed for the Kelly formula.
    pub risk_reward: f64,

    /// Fractional-Kelly scalar applied to the raw Kelly fraction.
    pub kelly_scalar: f64,

    /// Hard cap on allocation percentage for this tier.
    pub max_alloc_pct: f64,

    /// Base stop-loss distance from entry, percent.
    pub base_stop_pct: f64,

    /// Base first-target distance from entry, percent.
    pub base_target_pct: f64,
}

/// Sizing parameters for each asset tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierTable {
    pub conservative: TierParams,
    pub growth: TierParams,
    pub aggressive: TierParams,
}

impl TierTable {
    pub fn params(&self, tier: AssetTier) -> TierParams {
        match tier {
            AssetTier::Conservative => self.conservative,
            AssetTier::Growth => self.growth,
            AssetTier::Aggressive => self.aggressive,
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            conservative: TierParams {
                risk_reward: 1.5,
                kelly_scalar: 0.5,
                max_alloc_pct: 10.0,
                base_stop_pct: 5.0,
                base_target_pct: 7.5,
            },
            growth: TierParams {
                risk_reward: 2.0,
                kelly_scalar: 0.6,
                max_alloc_pct: 15.0,
                base_stop_pct: 8.0,
                base_target_pct: 16.0,
            },
            aggressive: TierParams {
                risk_reward: 3.0,
                kelly_scalar: 0.75,
                max_alloc_pct: 20.0,
                base_stop_pct: 12.0,
                base_target_pct: 36.0,
            },
        }
    }
}

// =============================================================================
// Calibration & sizing parameter blocks
// =============================================================================

/// Regime modifier tables for the confidence calibrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Multiplicative modifier in a low-volatility environment.
    pub low_vol_multiplier: f64,
    /// Multiplicative modifier in a high-volatility environment.
    pub high_vol_multiplier: f64,
    /// Additive adjustment during FOMC week (points).
    pub fomc_adjustment: f64,
    /// Additive adjustment during earnings season (points).
    pub earnings_adjustment: f64,
    /// Multiplicative shading for aggressive-tier names.
    pub aggressive_tier_multiplier: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            low_vol_multiplier: 1.05,
            high_vol_multiplier: 0.90,
            fomc_adjustment: -5.0,
            earnings_adjustment: 3.0,
            aggressive_tier_multiplier: 0.95,
        }
    }
}

/// Parameters of the confidence -> win-probability mapping.
///
/// `p(c) = floor + range / (1 + exp(-(c - midpoint) / steepness))`, a
/// monotonic S-curve. Defaults anchor moderate confidence near 0.55 and
/// maximum confidence near 0.78.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WinProbParams {
    pub floor: f64,
    pub range: f64,
    pub midpoint: f64,
    pub steepness: f64,
}

impl Default for WinProbParams {
    fn default() -> Self {
        Self {
            floor: 0.35,
            range: 0.45,
            midpoint: 60.0,
            steepness: 15.0,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Fusion ---------------------------------------------------------------

    /// Confidence tier band edges.
    #[serde(default)]
    pub tier_bands: TierBands,

    /// Optional per-engine starting weights overriding the neutral 1.0 seed.
    #[serde(default)]
    pub weight_overrides: BTreeMap<String, f64>,

    // --- Weight bounds & learning --------------------------------------------

    /// Lower bound on any engine weight multiplier.
    #[serde(default = "default_weight_floor")]
    pub weight_floor: f64,

    /// Upper bound on any engine weight multiplier.
    #[serde(default = "default_weight_ceiling")]
    pub weight_ceiling: f64,

    /// Learning-rate constant `k`. Deliberately small so one noisy window
    /// cannot swing the ensemble.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Minimum attribution sample size before an engine's weight may move.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u32,

    /// Attribution lookback window in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    // --- Drift damping --------------------------------------------------------

    /// Mean-absolute-change threshold above which a new table is blended
    /// instead of applied directly.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Blend factor when damping: `applied = old*(1-alpha) + new*alpha`.
    #[serde(default = "default_drift_blend_alpha")]
    pub drift_blend_alpha: f64,

    // --- Grading --------------------------------------------------------------

    /// Days a prediction may stay open before the time box closes it.
    #[serde(default = "default_time_box_days")]
    pub time_box_days: i64,

    /// Delay between consecutive price fetches while grading, for provider
    /// rate limits.
    #[serde(default = "default_grade_delay_ms")]
    pub grade_delay_ms: u64,

    /// Interval between learning cycles.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Per-engine evaluation budget for the signal adapter.
    #[serde(default = "default_engine_timeout_ms")]
    pub engine_timeout_ms: u64,

    // --- Calibration ----------------------------------------------------------

    /// Regime modifier tables.
    #[serde(default)]
    pub calibration: CalibrationParams,

    /// Order of regime modifiers vs. drift factor.
    #[serde(default)]
    pub calibration_order: CalibrationOrder,

    /// Rolling window over which realized win rate is compared to predicted
    /// confidence.
    #[serde(default = "default_calibration_window_days")]
    pub calibration_window_days: i64,

    /// Lower clamp on the drift-correction factor.
    #[serde(default = "default_drift_factor_floor")]
    pub drift_factor_floor: f64,

    /// Upper clamp on the drift-correction factor.
    #[serde(default = "default_drift_factor_ceiling")]
    pub drift_factor_ceiling: f64,

    // --- Sizing ---------------------------------------------------------------

    /// Confidence -> win-probability curve.
    #[serde(default)]
    pub win_prob: WinProbParams,

    /// Per-tier sizing parameters.
    #[serde(default)]
    pub tiers: TierTable,

    // --- Storage --------------------------------------------------------------

    /// Directory holding the ledger, weight table, and attribution files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tier_bands: TierBands::default(),
            weight_overrides: BTreeMap::new(),
            weight_floor: default_weight_floor(),
            weight_ceiling: default_weight_ceiling(),
            learning_rate: default_learning_rate(),
            min_sample_size: default_min_sample_size(),
            lookback_days: default_lookback_days(),
            drift_threshold: default_drift_threshold(),
            drift_blend_alpha: default_drift_blend_alpha(),
            time_box_days: default_time_box_days(),
            grade_delay_ms: default_grade_delay_ms(),
            cycle_interval_secs: default_cycle_interval_secs(),
            engine_timeout_ms: default_engine_timeout_ms(),
            calibration: CalibrationParams::default(),
            calibration_order: CalibrationOrder::default(),
            calibration_window_days: default_calibration_window_days(),
            drift_factor_floor: default_drift_factor_floor(),
            drift_factor_ceiling: default_drift_factor_ceiling(),
            win_prob: WinProbParams::default(),
            tiers: TierTable::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            weight_floor = config.weight_floor,
            weight_ceiling = config.weight_ceiling,
            learning_rate = config.learning_rate,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!((cfg.weight_floor - 0.5).abs() < f64::EPSILON);
        assert!((cfg.weight_ceiling - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.min_sample_size, 5);
        assert_eq!(cfg.time_box_days, 14);
        assert_eq!(cfg.lookback_days, 60);
        assert!((cfg.tier_bands.low_max - 40.0).abs() < f64::EPSILON);
        assert!((cfg.tier_bands.high_max - 85.0).abs() < f64::EPSILON);
        assert_eq!(cfg.calibration_order, CalibrationOrder::RegimeThenDrift);
        // Risk:reward ladder matches the tier definitions.
        assert!((cfg.tiers.conservative.risk_reward - 1.5).abs() < f64::EPSILON);
        assert!((cfg.tiers.growth.risk_reward - 2.0).abs() < f64::EPSILON);
        assert!((cfg.tiers.aggressive.risk_reward - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!((cfg.learning_rate - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.min_sample_size, 5);
        assert!((cfg.drift_threshold - 0.15).abs() < f64::EPSILON);
        assert_eq!(cfg.data_dir, "data");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "learning_rate": 0.1, "min_sample_size": 10 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.learning_rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(cfg.min_sample_size, 10);
        assert_eq!(cfg.time_box_days, 14);
        assert!((cfg.weight_ceiling - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.min_sample_size, cfg2.min_sample_size);
        assert!((cfg.drift_blend_alpha - cfg2.drift_blend_alpha).abs() < f64::EPSILON);
        assert_eq!(cfg.calibration_order, cfg2.calibration_order);
    }

    #[test]
    fn tier_params_lookup() {
        use crate::types::AssetTier;
        let cfg = RuntimeConfig::default();
        let aggressive = cfg.tiers.params(AssetTier::Aggressive);
        assert!(aggressive.base_stop_pct > cfg.tiers.conservative.base_stop_pct);
        assert!(aggressive.max_alloc_pct > cfg.tiers.conservative.max_alloc_pct);
    }
}
