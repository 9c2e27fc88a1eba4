// =============================================================================
// Learning Module
// =============================================================================
//
// The self-calibration half of the pipeline:
// - Co-occurrence attribution over terminal predictions
// - Bounded weight optimisation from attribution statistics
// - Drift detection and damped application of new weight tables
// - The cycle orchestrator tying grading + learning together on a schedule

pub mod attribution;
pub mod cycle;
pub mod drift;
pub mod optimizer;

pub use attribution::{AttributionEngine, AttributionRecord};
pub use cycle::{CycleOrchestrator, CycleReport};
pub use drift::{DriftDetector, DriftReport};
pub use optimizer::WeightOptimizer;
