// =============================================================================
// Error taxonomy for the fusion and learning pipeline
// =============================================================================
//
// Callers match on these variants to decide between skip-and-retry
// (`DataUnavailable`), silent exclusion (`MissingSignal`), withheld updates
// (`InsufficientSample`), damping (`DriftExceeded`), and step abort
// (`PersistenceFailure`). The binary edge wraps everything in `anyhow`.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    /// An engine returned nothing usable (zero, timeout, or error). The
    /// engine is excluded from fusion; never fatal to the ticker.
    #[error("engine '{engine_id}' produced no usable signal: {reason}")]
    MissingSignal { engine_id: String, reason: String },

    /// The price provider had no quote. The affected ledger entry stays
    /// PENDING and is retried on the next cycle.
    #[error("price unavailable for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    /// Attribution sample below the configured minimum; the weight update
    /// for this engine is withheld, not zeroed.
    #[error("attribution sample for '{engine_id}' too small ({sample_size} < {minimum})")]
    InsufficientSample {
        engine_id: String,
        sample_size: u32,
        minimum: u32,
    },

    /// The newly optimised weight table moved too far from the applied one.
    /// The update is blended, not blocked.
    #[error("weight drift {distance:.4} exceeded threshold {threshold:.4}")]
    DriftExceeded { distance: f64, threshold: f64 },

    /// A durable write failed. Only the current step aborts; the previously
    /// persisted state remains authoritative.
    #[error("persistence failure during {op}: {reason}")]
    PersistenceFailure { op: String, reason: String },
}

impl FusionError {
    pub fn persistence(op: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            op: op.into(),
            reason: err.to_string(),
        }
    }

    pub fn data_unavailable(ticker: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::DataUnavailable {
            ticker: ticker.into(),
            reason: reason.to_string(),
        }
    }
}
