// =============================================================================
// Fusion Module
// =============================================================================
//
// The scoring half of the pipeline:
// - Normalisation of raw engine readings into [0, 100]
// - Weighted consensus fusion with abstention handling
// - Confidence calibration (regime modifiers + learned drift factor)

pub mod calibration;
pub mod consensus;
pub mod normalizer;

pub use calibration::{CalibrationState, Calibrator};
pub use consensus::{ConsensusResult, ConsensusScorer};
pub use normalizer::normalize_score;
