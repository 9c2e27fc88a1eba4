// =============================================================================
// Meridian Fusion Engine — Main Entry Point
// =============================================================================
//
// Boots the shared state, selects a price provider, serves the REST API,
// and drives the scheduled learning cycle. Without MERIDIAN_QUOTE_URL set
// the engine runs against an empty in-memory quote book: scoring works,
// prediction generation reports DataUnavailable.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod engines;
mod errors;
mod fusion;
mod ledger;
mod learning;
mod pipeline;
mod providers;
mod runtime_config;
mod sizing;
mod store;
mod types;
mod weights;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::engines::KNOWN_ENGINE_IDS;
use crate::learning::cycle::run_cycle_loop;
use crate::learning::CycleOrchestrator;
use crate::providers::{HttpPriceProvider, PriceProvider, StaticPriceProvider};
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Fusion Engine — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        engines = KNOWN_ENGINE_IDS.len(),
        weight_bounds = format!("[{}, {}]", config.weight_floor, config.weight_ceiling),
        cycle_interval_secs = config.cycle_interval_secs,
        data_dir = %config.data_dir,
        "configuration resolved"
    );

    // ── 2. Build shared state (replays the ledger, loads weights) ────────
    let state = Arc::new(AppState::new(config, KNOWN_ENGINE_IDS)?);

    info!(
        ledger_entries = state.ledger.len(),
        weights_version = state.weight_snapshot().version,
        "state restored"
    );

    // ── 3. Price provider ────────────────────────────────────────────────
    let provider: Arc<dyn PriceProvider> = match std::env::var("MERIDIAN_QUOTE_URL") {
        Ok(url) if !url.is_empty() => {
            info!(url = %url, "using HTTP price provider");
            Arc::new(HttpPriceProvider::new(
                url,
                std::env::var("MERIDIAN_QUOTE_API_KEY").ok(),
            ))
        }
        _ => {
            warn!("MERIDIAN_QUOTE_URL not set; using empty in-memory quote book");
            Arc::new(StaticPriceProvider::new())
        }
    };

    // ── 4. Cycle orchestrator ────────────────────────────────────────────
    let orchestrator = Arc::new(CycleOrchestrator::new(state.clone(), provider.clone()));

    // ── 5. Start the API server ──────────────────────────────────────────
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_ctx = ApiContext {
        state: state.clone(),
        orchestrator: orchestrator.clone(),
        provider,
    };

    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_ctx);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 6. Scheduled learning cycle ──────────────────────────────────────
    tokio::spawn(run_cycle_loop(orchestrator));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Meridian Fusion Engine shut down complete.");
    Ok(())
}
