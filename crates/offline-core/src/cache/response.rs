//! Responses produced by the fetch handler

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use offline_proxy::FetchResponse;
use offline_storage::CachedResponse;
use serde::Serialize;
use tracing::warn;

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Cached manifest entry for the exact path
    ExactCache,
    /// Cached representative page of a route family
    Substitute,
    /// Live network response
    Network,
    /// Cached copy served after a network failure
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::ExactCache => "exact_cache",
            ResponseSource::Substitute => "substitute",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// A response handed back to the host runtime
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub(crate) fn from_network(response: FetchResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ResponseSource::Network,
        }
    }

    pub(crate) fn from_cached(cached: CachedResponse, source: ResponseSource) -> Self {
        let status = StatusCode::from_u16(cached.status).unwrap_or_else(|_| {
            warn!("Cached response has invalid status {}", cached.status);
            StatusCode::OK
        });

        let mut headers = HeaderMap::with_capacity(cached.headers.len());
        for (name, value) in cached.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!("Skipping invalid cached header {:?}", name),
            }
        }

        Self {
            status,
            headers,
            body: cached.body,
            source,
        }
    }
}

/// Copy a network response into its stored form
pub(crate) fn to_cached(response: &FetchResponse) -> CachedResponse {
    let headers = response
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();

    CachedResponse::new(response.status.as_u16(), headers, response.body.clone())
}

/// Result of handling one intercepted request
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the runtime sends the request to the network itself
    Passthrough,
    /// Answer with this response
    Respond(Response),
    /// Intercepted, but neither the network nor the cache produced an answer
    NoResponse,
}

impl FetchOutcome {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Passthrough => "passthrough",
            FetchOutcome::Respond(response) => response.source.as_str(),
            FetchOutcome::NoResponse => "no_response",
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            _ => None,
        }
    }
}
