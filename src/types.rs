// =============================================================================
// Shared types used across the Meridian fusion engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Confidence tier assigned to a fused consensus score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
    Maximum,
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Maximum => write!(f, "MAXIMUM"),
        }
    }
}

/// Risk tier of the underlying instrument. Drives reward:risk, Kelly scaling,
/// and stop/target base distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetTier {
    /// Large, stable names. Tight stops, modest targets.
    Conservative,
    /// Mid-risk growth names.
    Growth,
    /// High-volatility speculative names. Wide stops, outsized targets.
    Aggressive,
}

impl std::fmt::Display for AssetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "CONSERVATIVE"),
            Self::Growth => write!(f, "GROWTH"),
            Self::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

/// Volatility-index bucket for the current market environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityProfile {
    Low,
    Normal,
    High,
}

impl VolatilityProfile {
    /// Bucket a volatility index reading (VIX-style, annualised percent).
    pub fn from_index(vix: f64) -> Self {
        if vix < 15.0 {
            Self::Low
        } else if vix <= 25.0 {
            Self::Normal
        } else {
            Self::High
        }
    }
}

impl Default for VolatilityProfile {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for VolatilityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Normal => write!(f, "Normal"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Calendar seasonality window affecting confidence calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seasonality {
    Normal,
    /// FOMC announcement week. Confidence is shaded down.
    FomcWeek,
    /// Broad earnings season. Signal engines tend to run hot.
    EarningsSeason,
}

impl Default for Seasonality {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for Seasonality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::FomcWeek => write!(f, "FomcWeek"),
            Self::EarningsSeason => write!(f, "EarningsSeason"),
        }
    }
}

/// Market environment snapshot consumed by the confidence calibrator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarketContext {
    #[serde(default)]
    pub volatility: VolatilityProfile,
    #[serde(default)]
    pub seasonality: Seasonality,
}

/// Lifecycle state of a tracked prediction.
///
/// Transitions only `Pending -> {Win, Loss, Neutral}`. Terminal states are
/// immutable; the ledger refuses any write that would move an entry out of
/// a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionState {
    Pending,
    Win,
    Loss,
    Neutral,
}

impl PredictionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Default for PredictionState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for PredictionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Win => write!(f, "WIN"),
            Self::Loss => write!(f, "LOSS"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Order in which the calibrator applies regime modifiers and the learned
/// drift-correction factor. The source system never pinned this down, so it
/// is policy, not code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationOrder {
    /// Regime modifiers first, then the drift factor.
    RegimeThenDrift,
    /// Drift factor first, then regime modifiers.
    DriftThenRegime,
}

impl Default for CalibrationOrder {
    fn default() -> Self {
        Self::RegimeThenDrift
    }
}
