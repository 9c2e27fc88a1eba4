// =============================================================================
// Signal Engine Registry — static engine interface + known-engine list
// =============================================================================
//
// Each engine is an independent heuristic producing a bounded per-ticker
// score. The engine set is fixed at startup: a static trait plus an explicit
// registered list, no runtime reflection and no string-keyed dispatch beyond
// the id itself.
//
// Score contract: 0 means "no opinion". Timeouts and errors are mapped to
// the same sentinel so downstream fusion treats all three identically.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::FusionError;

/// Every engine id the system knows about. Seeds the default weight table
/// and validates inbound readings.
pub const KNOWN_ENGINE_IDS: &[&str] = &[
    "gamma_exposure",
    "sentiment",
    "insider_activity",
    "macro_regime",
    "narrative",
    "shadow_flow",
    "options_skew",
    "short_interest",
    "earnings_momentum",
    "technical_trend",
    "volume_profile",
    "sector_strength",
    "market_breadth",
    "credit_spread",
    "positioning",
    "seasonality_bias",
    "analyst_revision",
    "retail_flow",
    "dark_pool",
    "vol_structure",
];

/// A single engine reading for one ticker. Ephemeral: readings are fused
/// immediately and never persisted on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub engine_id: String,
    pub ticker: String,
    /// 0-100. Exactly 0 means the engine abstained.
    pub score: f64,
    pub timestamp: String,
}

impl Reading {
    pub fn new(engine_id: impl Into<String>, ticker: impl Into<String>, score: f64) -> Self {
        Self {
            engine_id: engine_id.into(),
            ticker: ticker.into(),
            score,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Output of a single engine evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    /// 0-100; 0 = no opinion.
    pub score: f64,
    /// Free-form engine diagnostics, passed through for auditability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Interface every signal engine implements.
///
/// Engines live outside this crate (gamma exposure, sentiment, insider
/// activity, ...); this trait is the seam they plug into.
#[async_trait]
pub trait SignalEngine: Send + Sync {
    /// Stable identifier, one of [`KNOWN_ENGINE_IDS`] for first-party engines.
    fn id(&self) -> &str;

    /// Evaluate the ticker. Implementations should return score 0 rather
    /// than an error when they simply have nothing to say.
    async fn evaluate(&self, ticker: &str) -> Result<EngineOutput, FusionError>;
}

/// Adapter that fans a ticker out to the registered engines and collects
/// their readings, isolating failures per engine.
pub struct SignalAdapter {
    engines: Vec<Arc<dyn SignalEngine>>,
    /// Per-engine evaluation budget. A timeout is the same as "no opinion".
    timeout: Duration,
}

impl SignalAdapter {
    pub fn new(engines: Vec<Arc<dyn SignalEngine>>, timeout: Duration) -> Self {
        Self { engines, timeout }
    }

    /// Ids of the registered engines, in registration order.
    pub fn engine_ids(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.id().to_string()).collect()
    }

    /// Evaluate every registered engine for `ticker`, producing one reading
    /// per engine.
    ///
    /// One engine failing, erroring, or timing out never affects the
    /// others: its reading is recorded as the abstain sentinel 0.
    pub async fn collect_readings(&self, ticker: &str) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(self.engines.len());

        for engine in &self.engines {
            let id = engine.id().to_string();
            let score = match tokio::time::timeout(self.timeout, engine.evaluate(ticker)).await {
                Ok(Ok(output)) => {
                    debug!(engine_id = %id, ticker, score = output.score, "engine evaluated");
                    output.score
                }
                Ok(Err(e)) => {
                    warn!(engine_id = %id, ticker, error = %e, "engine failed; treating as abstain");
                    0.0
                }
                Err(_) => {
                    warn!(
                        engine_id = %id,
                        ticker,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "engine timed out; treating as abstain"
                    );
                    0.0
                }
            };
            readings.push(Reading::new(id, ticker, score));
        }

        readings
    }

    /// Evaluate every registered engine and shape the result for the
    /// consensus scorer.
    pub async fn collect(&self, ticker: &str) -> HashMap<String, f64> {
        self.collect_readings(ticker)
            .await
            .into_iter()
            .map(|r| (r.engine_id, r.score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine {
        id: &'static str,
        score: f64,
    }

    #[async_trait]
    impl SignalEngine for FixedEngine {
        fn id(&self) -> &str {
            self.id
        }

        async fn evaluate(&self, _ticker: &str) -> Result<EngineOutput, FusionError> {
            Ok(EngineOutput {
                score: self.score,
                details: None,
            })
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl SignalEngine for FailingEngine {
        fn id(&self) -> &str {
            "sentiment"
        }

        async fn evaluate(&self, ticker: &str) -> Result<EngineOutput, FusionError> {
            Err(FusionError::MissingSignal {
                engine_id: "sentiment".to_string(),
                reason: format!("upstream 503 for {ticker}"),
            })
        }
    }

    struct HangingEngine;

    #[async_trait]
    impl SignalEngine for HangingEngine {
        fn id(&self) -> &str {
            "dark_pool"
        }

        async fn evaluate(&self, _ticker: &str) -> Result<EngineOutput, FusionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("adapter must time this engine out first")
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_become_abstain() {
        let adapter = SignalAdapter::new(
            vec![
                Arc::new(FixedEngine {
                    id: "gamma_exposure",
                    score: 80.0,
                }),
                Arc::new(FailingEngine),
                Arc::new(HangingEngine),
            ],
            Duration::from_millis(50),
        );

        let readings = adapter.collect("NVDA").await;
        assert_eq!(readings["gamma_exposure"], 80.0);
        assert_eq!(readings["sentiment"], 0.0);
        assert_eq!(readings["dark_pool"], 0.0);
    }

    #[tokio::test]
    async fn readings_carry_engine_and_ticker() {
        let adapter = SignalAdapter::new(
            vec![Arc::new(FixedEngine {
                id: "gamma_exposure",
                score: 64.0,
            })],
            Duration::from_millis(50),
        );

        assert_eq!(adapter.engine_ids(), vec!["gamma_exposure"]);

        let readings = adapter.collect_readings("NVDA").await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].engine_id, "gamma_exposure");
        assert_eq!(readings[0].ticker, "NVDA");
        assert_eq!(readings[0].score, 64.0);
        assert!(!readings[0].timestamp.is_empty());
    }

    #[test]
    fn known_engine_list_is_stable() {
        assert_eq!(KNOWN_ENGINE_IDS.len(), 20);
        assert!(KNOWN_ENGINE_IDS.contains(&"gamma_exposure"));
        assert!(KNOWN_ENGINE_IDS.contains(&"shadow_flow"));
        // No duplicates.
        let unique: std::collections::HashSet<_> = KNOWN_ENGINE_IDS.iter().collect();
        assert_eq!(unique.len(), KNOWN_ENGINE_IDS.len());
    }
}
