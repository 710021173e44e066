//! Liveness of the worker

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `serving` once a generation is active, `passthrough` before that
    pub mode: &'static str,
    pub generation: Option<String>,
    pub version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let generation = state.manager.active_generation();
    let mode = if generation.is_some() { "serving" } else { "passthrough" };
    metrics::counter!("offline_cache_health_checks_total", "mode" => mode).increment(1);

    Json(HealthResponse {
        mode,
        generation,
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/_worker/health", get(health))
}
