//! Origin client

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::ProxyError;
use crate::message::{FetchRequest, FetchResponse, strip_hop_by_hop};

/// The network, as seen by the cache core.
///
/// `Ok` means the origin answered, whatever the status. `Err` means the
/// attempt failed before any response arrived.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError>;
}

/// Origin client configuration
#[derive(Clone, Debug)]
pub struct OriginClientConfig {
    /// Base URL of the origin serving the application
    pub url: String,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Upper bound on a single network attempt
    pub timeout: Option<Duration>,
}

/// HTTP client for the application origin
pub struct OriginClient {
    base_url: Url,
    client: Client,
}

impl OriginClient {
    /// Create a new origin client
    pub fn new(config: OriginClientConfig) -> Result<Self, ProxyError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", config.url, e)))?;

        if base_url.cannot_be_a_base() {
            return Err(ProxyError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                config.url
            )));
        }

        let mut builder = Client::builder().redirect(reqwest::redirect::Policy::none());

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build()?;

        info!("Created origin client for {}", base_url);

        Ok(Self { base_url, client })
    }

    /// Resolve an origin-relative URL against the base URL
    pub fn resolve(&self, url: &str) -> Result<Url, ProxyError> {
        if !url.starts_with('/') || url.starts_with("//") {
            return Err(ProxyError::InvalidUrl(format!(
                "expected an absolute path, got {}",
                url
            )));
        }

        self.base_url
            .join(url)
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl Upstream for OriginClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError> {
        let url = self.resolve(request.url_without_fragment())?;

        debug!("Fetching {} {}", request.method, url);

        let response = self
            .client
            .request(request.method.clone(), url)
            .headers(strip_hop_by_hop(&request.headers))
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await?;

        debug!("Origin answered {} {} with {}", request.method, request.url, status);

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
