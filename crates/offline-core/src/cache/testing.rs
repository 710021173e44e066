//! Scripted network for tests

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use offline_proxy::{FetchRequest, FetchResponse, ProxyError, Upstream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Upstream answering from a fixed table of URLs.
///
/// Unknown URLs answer 404. While offline every fetch fails.
#[derive(Default)]
pub(crate) struct ScriptedUpstream {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, url: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .insert(url.to_string(), (status, Bytes::from(body.to_string())));
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests seen so far, formatted as `METHOD url`
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError> {
        self.calls
            .lock()
            .push(format!("{} {}", request.method, request.url));

        if self.offline.load(Ordering::SeqCst) {
            return Err(ProxyError::Unreachable(request.url.clone()));
        }

        let (status, body) = self
            .routes
            .lock()
            .get(request.url_without_fragment())
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, Bytes::from_static(b"not found")));

        Ok(FetchResponse::new(status, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain")))
    }
}
