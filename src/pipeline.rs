// =============================================================================
// Fusion Pipeline — the engine's two on-demand operations
// =============================================================================
//
// `score_ticker` fuses a set of readings under the current weight-table
// snapshot; `generate_prediction` turns a consensus into a sized, durable
// prediction. Both are driven per inbound request; the scheduled learning
// cycle lives in `learning::cycle`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::app_state::AppState;
use crate::errors::FusionError;
use crate::fusion::{Calibrator, ConsensusResult, ConsensusScorer};
use crate::ledger::TradePrediction;
use crate::providers::PriceProvider;
use crate::sizing::PositionSizer;
use crate::types::AssetTier;

pub struct FusionPipeline;

impl FusionPipeline {
    /// Fuse raw `engine_id -> score` readings for one ticker.
    ///
    /// Stateless apart from the weight-table snapshot taken at entry; safe
    /// for unlimited concurrent callers.
    pub fn score_ticker(
        state: &AppState,
        ticker: &str,
        readings: &HashMap<String, f64>,
    ) -> ConsensusResult {
        let weights = state.weight_snapshot();
        let bands = state.runtime_config.read().tier_bands;
        ConsensusScorer::score(ticker, readings, &weights, &bands)
    }

    /// Build and record a prediction from a consensus result.
    ///
    /// Fails with `DataUnavailable` when no entry price can be fetched (no
    /// synthetic entries) and `PersistenceFailure` when the ledger journal write
    /// fails; in both cases nothing is recorded.
    pub async fn generate_prediction(
        state: &AppState,
        provider: &Arc<dyn PriceProvider>,
        consensus: &ConsensusResult,
        tier: AssetTier,
    ) -> Result<TradePrediction, FusionError> {
        let entry = provider.get_price(&consensus.ticker).await?.price;

        let ctx = *state.market_context.read();
        let (params, order, win_prob, tiers) = {
            let cfg = state.runtime_config.read();
            (
                cfg.calibration,
                cfg.calibration_order,
                cfg.win_prob,
                cfg.tiers,
            )
        };

        let confidence = Calibrator::apply(
            consensus.final_score,
            ctx,
            tier,
            state.drift_factor(),
            &params,
            order,
        );

        let plan = PositionSizer::plan(confidence, tier, ctx.volatility, &win_prob, &tiers);
        let levels = PositionSizer::levels(entry, &plan);

        let prediction = TradePrediction::new(
            consensus.ticker.clone(),
            tier,
            confidence,
            levels.entry,
            levels.stop_loss,
            levels.take_profit_1,
            levels.take_profit_2,
            levels.take_profit_3,
            plan.allocation_pct,
            consensus.breakdown.clone(),
        );

        state.ledger.insert(prediction.clone())?;
        state.increment_version();

        info!(
            id = %prediction.id,
            ticker = %prediction.ticker,
            tier = %tier,
            raw_score = format!("{:.1}", consensus.final_score),
            confidence = format!("{:.1}", confidence),
            allocation_pct = format!("{:.2}", prediction.allocation_pct),
            "prediction generated"
        );

        Ok(prediction)
    }
}
