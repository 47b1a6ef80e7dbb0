use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Method},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{forecast, history};
use crate::config::AppMode;
use crate::db::SessionStore;
use crate::identity::{IdentityProvider, USER_EMAIL_HEADER, USER_ID_HEADER};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct ApiState {
    pub mode: AppMode,
    pub store: Arc<dyn SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub identity: Arc<dyn IdentityProvider>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CACHE_CONTROL,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_EMAIL_HEADER),
        ]);

    Router::new()
        .route(
            "/api/forecast",
            get(forecast::usage).post(forecast::start_forecast),
        )
        .route("/api/user/history", get(history::list_history))
        .route(
            "/api/user/history/:id",
            get(history::get_analysis).delete(history::delete_analysis),
        )
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: String,
    pub store_backend: &'static str,
    pub uptime_secs: u64,
    pub active_streams: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_abandoned: u64,
    pub persistence_failures: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub engine_runs: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    Json(HealthResponse {
        status: "ok",
        mode: state.mode.to_string(),
        store_backend: state.store.backend(),
        uptime_secs: h.uptime_secs(),
        active_streams: h.active_streams(),
        sessions_completed: h.sessions_completed(),
        sessions_failed: h.sessions_failed(),
        sessions_abandoned: h.sessions_abandoned(),
        persistence_failures: h.persistence_failures(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        engine_runs: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}
