//! Cache entry types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a cached request: method plus origin-relative URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Stable hex fingerprint, used as the on-disk file name
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A full stored response
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    /// Header name/value pairs in their original order; values are raw bytes
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, Vec<u8>)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }

    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_normalizes_method() {
        let key = RequestKey::new("get", "/song/1");
        assert_eq!(key, RequestKey::get("/song/1"));
        assert_eq!(key.to_string(), "GET /song/1");
    }

    #[test]
    fn test_fingerprint_distinguishes_method_and_url() {
        let a = RequestKey::get("/a");
        assert_eq!(a.fingerprint(), RequestKey::get("/a").fingerprint());
        assert_ne!(a.fingerprint(), RequestKey::get("/b").fingerprint());
        assert_ne!(a.fingerprint(), RequestKey::new("HEAD", "/a").fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = CachedResponse::new(
            200,
            vec![("Content-Type".to_string(), b"text/html".to_vec())],
            Bytes::from_static(b"<html>"),
        );
        assert_eq!(response.header("content-type"), Some(&b"text/html"[..]));
        assert_eq!(response.header("etag"), None);
    }
}
