//! Asset manifests
//!
//! The deployment pipeline publishes a [`DeploymentManifest`] naming the
//! generation and the paths it produced. Merged with the representative
//! pages it becomes the [`AssetManifest`] fetched during install.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::CoreError;

/// Ordered set of absolute URL paths cached at install time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    paths: Vec<String>,
    index: HashSet<String>,
}

impl AssetManifest {
    /// Build a manifest, keeping the first occurrence of duplicate paths
    pub fn new<I, S>(paths: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manifest = Self::default();
        for path in paths {
            manifest.push(path.into())?;
        }
        Ok(manifest)
    }

    /// Merge representative pages, build artifacts and static files, in that order
    pub fn assemble(pages: &[String], build: &[String], files: &[String]) -> Result<Self, CoreError> {
        Self::new(pages.iter().chain(build).chain(files).cloned())
    }

    fn push(&mut self, path: String) -> Result<(), CoreError> {
        validate_path(&path)?;
        if self.index.insert(path.clone()) {
            self.paths.push(path);
        } else {
            debug!("Dropping duplicate manifest entry {}", path);
        }
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Check that a manifest entry is a plain absolute path
fn validate_path(path: &str) -> Result<(), CoreError> {
    if !path.starts_with('/') || path.starts_with("//") {
        return Err(CoreError::InvalidManifest(format!(
            "entry must be an absolute path: {:?}",
            path
        )));
    }

    if path.contains(['?', '#']) {
        return Err(CoreError::InvalidManifest(format!(
            "entry must not carry a query or fragment: {:?}",
            path
        )));
    }

    Ok(())
}

/// Manifest published by the build for one deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentManifest {
    /// Generation identifier
    pub version: String,
    /// Build artifact paths
    #[serde(default)]
    pub build: Vec<String>,
    /// Static file paths
    #[serde(default)]
    pub files: Vec<String>,
}

impl DeploymentManifest {
    /// Load a deployment manifest from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| CoreError::Deployment(format!("failed to read {:?}: {}", path, e)))?;

        let manifest: DeploymentManifest = serde_json::from_slice(&content)
            .map_err(|e| CoreError::Deployment(format!("failed to parse {:?}: {}", path, e)))?;

        if manifest.version.trim().is_empty() {
            return Err(CoreError::Deployment(format!(
                "{:?} has an empty version",
                path
            )));
        }

        Ok(manifest)
    }

    /// Merge with the representative pages into the asset manifest
    pub fn asset_manifest(&self, pages: &[String]) -> Result<AssetManifest, CoreError> {
        AssetManifest::assemble(pages, &self.build, &self.files)
    }
}
