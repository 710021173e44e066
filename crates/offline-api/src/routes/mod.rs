//! API routes

mod health;
mod intercept;
pub mod metrics;
mod worker;

use axum::Router;
use std::sync::Arc;

pub use intercept::SOURCE_HEADER;

use crate::state::{AppState, MetricsHandle};

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Generation status and update trigger
        .merge(worker::routes())
        // Everything else is an intercepted fetch
        .fallback(intercept::intercept)
        .with_state(state);

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
