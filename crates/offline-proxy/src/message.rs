//! Request and response types exchanged with the origin

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// An outgoing request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Origin-relative URL: path plus optional query
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A bodyless GET of `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// The path component, without query or fragment
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    /// The URL without its fragment, which never reaches the network
    pub fn url_without_fragment(&self) -> &str {
        self.url.split('#').next().unwrap_or_default()
    }

    /// Whether the method is a read that the cache may answer
    pub fn is_cacheable_read(&self) -> bool {
        self.method == Method::GET
    }
}

/// A response received from the origin
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Drop hop-by-hop headers, plus `host` and `content-length` which the
/// client recomputes for the new connection
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower) || lower == "host" || lower == "content-length" {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}
