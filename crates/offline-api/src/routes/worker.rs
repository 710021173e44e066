//! Worker lifecycle endpoints

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use offline_core::{UpdateOutcome, WorkerStatus, check_for_update};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Status response: manager snapshot plus stored cache names
#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: WorkerStatus,
    pub caches: Vec<String>,
}

/// GET /_worker/status
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.manager.status().await;
    let caches = state.manager.cache_names().await?;

    Ok(Json(StatusResponse { status, caches }))
}

/// POST /_worker/update - check the deployment manifest now
async fn update(State(state): State<AppState>) -> Result<Json<UpdateOutcome>, ApiError> {
    let source = state
        .deployment
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("No deployment manifest configured".to_string()))?;

    info!("Update check requested");

    match check_for_update(&state.manager, source).await {
        Ok(outcome) => {
            let result = match &outcome {
                UpdateOutcome::UpToDate { .. } => "up_to_date",
                UpdateOutcome::Updated { .. } => "updated",
            };
            metrics::counter!("offline_cache_updates_total", "result" => result).increment(1);
            Ok(Json(outcome))
        }
        Err(e) => {
            metrics::counter!("offline_cache_updates_total", "result" => "failed").increment(1);
            Err(e.into())
        }
    }
}

/// Create worker routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/_worker/status", get(status))
        .route("/_worker/update", post(update))
}
