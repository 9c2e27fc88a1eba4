// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The health probe is public; every
// other endpoint requires a valid Bearer token via the `AuthBearer`
// extractor. CORS is configured permissively for development.
//
//   GET  /api/v1/health        liveness + state version
//   GET  /api/v1/state         full operational snapshot
//   GET  /api/v1/weights       current weight table
//   POST /api/v1/score         fuse readings for a ticker
//   POST /api/v1/predictions   score -> calibrate -> size -> record
//   POST /api/v1/cycle/run     trigger a learning cycle now
//   PUT  /api/v1/context       set the market context for calibration
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::errors::FusionError;
use crate::learning::CycleOrchestrator;
use crate::pipeline::FusionPipeline;
use crate::providers::PriceProvider;
use crate::types::{AssetTier, MarketContext};

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub provider: Arc<dyn PriceProvider>,
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared context.
pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/weights", get(weights))
        .route("/api/v1/score", post(score))
        .route("/api/v1/predictions", post(predictions))
        .route("/api/v1/cycle/run", post(run_cycle))
        .route("/api/v1/context", put(set_context))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(ctx)
}

/// Map a pipeline error onto an HTTP response.
fn error_response(e: FusionError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        FusionError::DataUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FusionError::PersistenceFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": ctx.state.current_state_version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Snapshot & weights
// =============================================================================

async fn full_state(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.build_snapshot())
}

async fn weights(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.weight_snapshot())
}

// =============================================================================
// Scoring
// =============================================================================

#[derive(Debug, Deserialize)]
struct ScoreRequest {
    ticker: String,
    /// Raw `engine_id -> score` readings from the signal adapter.
    readings: HashMap<String, f64>,
}

async fn score(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<ScoreRequest>,
) -> impl IntoResponse {
    let result = FusionPipeline::score_ticker(&ctx.state, &req.ticker, &req.readings);
    Json(result)
}

// =============================================================================
// Predictions
// =============================================================================

#[derive(Debug, Deserialize)]
struct PredictionRequest {
    ticker: String,
    tier: AssetTier,
    readings: HashMap<String, f64>,
}

async fn predictions(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<PredictionRequest>,
) -> impl IntoResponse {
    let consensus = FusionPipeline::score_ticker(&ctx.state, &req.ticker, &req.readings);

    match FusionPipeline::generate_prediction(&ctx.state, &ctx.provider, &consensus, req.tier).await
    {
        Ok(prediction) => Json(prediction).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Learning cycle
// =============================================================================

async fn run_cycle(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    match ctx.orchestrator.run_learning_cycle().await {
        Ok(Some(report)) => Json(serde_json::json!({
            "skipped": false,
            "report": report,
        }))
        .into_response(),
        Ok(None) => Json(serde_json::json!({
            "skipped": true,
            "reason": "cycle already in progress",
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// =============================================================================
// Market context
// =============================================================================

async fn set_context(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(context): Json<MarketContext>,
) -> impl IntoResponse {
    info!(
        volatility = %context.volatility,
        seasonality = %context.seasonality,
        "market context updated"
    );
    *ctx.state.market_context.write() = context;
    ctx.state.increment_version();
    Json(context)
}
