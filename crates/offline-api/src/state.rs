//! Application state

use metrics_exporter_prometheus::PrometheusHandle;
use offline_core::{CacheManager, DeploymentSource};
use offline_proxy::Upstream;
use std::sync::Arc;

/// Handle used to render Prometheus metrics
pub type MetricsHandle = PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
    /// Network used for requests the core does not intercept
    pub upstream: Arc<dyn Upstream>,
    pub deployment: Option<Arc<DeploymentSource>>,
}

impl AppState {
    pub fn new(
        manager: Arc<CacheManager>,
        upstream: Arc<dyn Upstream>,
        deployment: Option<DeploymentSource>,
    ) -> Self {
        Self {
            manager,
            upstream,
            deployment: deployment.map(Arc::new),
        }
    }
}
