//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Offline and not cached: {0}")]
    Offline(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] offline_proxy::ProxyError),

    #[error("Core error: {0}")]
    Core(#[from] offline_core::CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Offline(url) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "OFFLINE",
                format!("{} is not available offline", url),
            ),
            ApiError::Upstream(e) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string()),
            ApiError::Core(e) => match e {
                offline_core::CoreError::NotInstalled(msg) => {
                    (StatusCode::CONFLICT, "NOT_INSTALLED", msg.clone())
                }
                offline_core::CoreError::InstallFailed { .. } => {
                    (StatusCode::BAD_GATEWAY, "INSTALL_FAILED", e.to_string())
                }
                offline_core::CoreError::Deployment(msg)
                | offline_core::CoreError::InvalidManifest(msg) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "DEPLOYMENT_INVALID", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    e.to_string(),
                ),
            },
        };

        let body = axum::Json(json!({
            "errors": [{
                "code": code,
                "message": message,
                "detail": null
            }]
        }));

        (status, body).into_response()
    }
}
