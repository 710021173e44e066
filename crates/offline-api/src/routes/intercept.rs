//! Request interception
//!
//! Every request outside the worker endpoints lands here and is handed
//! to the cache core as an intercepted fetch.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use offline_core::{FetchOutcome, FetchRequest};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest request body forwarded to the origin (16 MB)
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Header naming the strategy that produced a response
pub const SOURCE_HEADER: &str = "x-offline-cache";

/// Fallback handler: answer any request through the cache core
pub async fn intercept(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let fetch = into_fetch_request(request).await?;
    let outcome = state.manager.handle_fetch(&fetch).await;

    debug!("{} {} -> {}", fetch.method, fetch.url, outcome.label());
    metrics::counter!("offline_cache_fetch_total", "outcome" => outcome.label()).increment(1);

    match outcome {
        FetchOutcome::Respond(response) => Ok(build_response(
            response.status,
            response.headers,
            response.body,
            response.source.as_str(),
        )),
        FetchOutcome::NoResponse => Err(ApiError::Offline(fetch.url)),
        FetchOutcome::Passthrough => {
            let response = state.upstream.fetch(&fetch).await?;
            Ok(build_response(
                response.status,
                response.headers,
                response.body,
                "passthrough",
            ))
        }
    }
}

async fn into_fetch_request(request: Request) -> Result<FetchRequest, ApiError> {
    let (parts, body) = request.into_parts();

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let body = to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;

    Ok(FetchRequest::new(parts.method, url)
        .with_headers(parts.headers)
        .with_body(body))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Bytes, source: &'static str) -> Response {
    let mut response = (status, Body::from(body)).into_response();
    *response.headers_mut() = headers;
    response
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static(source));
    response
}
