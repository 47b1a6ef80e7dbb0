mod api;
mod config;
mod db;
mod engine;
mod error;
mod identity;
mod orchestrator;
mod resolver;
mod session;
mod stream;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{AppMode, Config};
use crate::engine::{ForecastEngine, HttpForecastEngine};
use crate::error::{AppError, Result};
use crate::identity::HeaderIdentityProvider;
use crate::orchestrator::Orchestrator;
use crate::session::LifecycleManager;

#[tokio::main]
async fn main() {
    // A missing .env is normal; the environment alone is enough.
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Session store ---
    let store = db::open_store(&cfg).await?;
    info!(backend = store.backend(), "Session store ready");

    // --- Forecast engine ---
    let engine = HttpForecastEngine::new(&cfg.engine_url, cfg.engine_api_key.clone())
        .map_err(|e| AppError::Config(format!("engine client: {e}")))?;
    info!(endpoint = engine.endpoint(), "Forecast engine configured");
    if cfg.mode == AppMode::SelfHosted && cfg.engine_api_key.is_none() {
        warn!("ENGINE_API_KEY not set; runs without a per-request accessToken go out unauthenticated");
    }
    let engine: Arc<dyn ForecastEngine> = Arc::new(engine);

    // --- Shared metrics ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(
        LatencyStats::new().map_err(|e| AppError::Config(format!("latency histogram: {e}")))?,
    );

    let orchestrator = Orchestrator::new(
        LifecycleManager::new(Arc::clone(&store)),
        engine,
        Arc::clone(&health),
        Arc::clone(&latency),
        cfg.engine_timeout,
        cfg.cancel_on_disconnect,
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        mode: cfg.mode,
        store,
        orchestrator: Arc::new(orchestrator),
        identity: Arc::new(HeaderIdentityProvider),
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        mode = %cfg.mode,
        timeout_secs = cfg.engine_timeout.as_secs(),
        cancel_on_disconnect = cfg.cancel_on_disconnect,
        "HTTP API listening on {bind_addr}"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
