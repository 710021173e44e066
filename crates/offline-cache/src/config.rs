//! Configuration loading and management

use anyhow::{Context, Result};
use offline_core::RouteFamily;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Route families served from a representative page
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteFamily>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Origin serving the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default)]
    pub skip_tls_verify: bool,
    /// Seconds before a network attempt counts as failed (0 = no limit)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            skip_tls_verify: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "local" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// Deployment manifest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// JSON manifest written by the build
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    /// Seconds between update checks (0 = only at startup and on demand)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Representative pages cached with every generation
    #[serde(default = "default_pages")]
    pub pages: Vec<String>,
    /// Manifest entries fetched concurrently during install
    #[serde(default = "default_install_concurrency")]
    pub install_concurrency: usize,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            check_interval_secs: default_check_interval_secs(),
            pages: default_pages(),
            install_concurrency: default_install_concurrency(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: "pretty".to_string(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4173
}

fn default_upstream_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_local_path() -> String {
    "./data/offline-cache".to_string()
}

fn default_manifest_path() -> String {
    "./build/deployment.json".to_string()
}

fn default_check_interval_secs() -> u64 {
    300
}

fn default_pages() -> Vec<String> {
    vec![
        "/".to_string(),
        // returned for all /song/*
        "/song/1".to_string(),
        // returned for all /demo/*
        "/demo/marble-machine".to_string(),
    ]
}

fn default_install_concurrency() -> usize {
    8
}

fn default_routes() -> Vec<RouteFamily> {
    vec![
        RouteFamily::new("/song/", "/song/1"),
        RouteFamily::new("/demo/", "/demo/marble-machine"),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend.as_str() {
            "local" | "memory" => {}
            other => anyhow::bail!("Unknown storage backend '{}' (expected local or memory)", other),
        }

        if let Some(page) = self.deployment.pages.iter().find(|p| !p.starts_with('/')) {
            anyhow::bail!("Representative page '{}' must be an absolute path", page);
        }

        if self.deployment.install_concurrency == 0 {
            anyhow::bail!("deployment.install_concurrency must be at least 1");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            storage: StorageConfig::default(),
            deployment: DeploymentConfig::default(),
            routes: default_routes(),
            logging: LoggingConfig::default(),
        }
    }
}
