//! Cache generations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::manifest::AssetManifest;

/// Name of the cache store holding a generation
pub fn cache_name(generation_id: &str) -> String {
    format!("cache-{}", generation_id)
}

/// Lifecycle state of a generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Uninstalled,
    Installing,
    /// Installed, waiting to be activated
    InstalledWaiting,
    Activating,
    Active,
    /// Replaced by a newer generation; storage reclaimed
    Superseded,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Uninstalled => "uninstalled",
            GenerationState::Installing => "installing",
            GenerationState::InstalledWaiting => "installed_waiting",
            GenerationState::Activating => "activating",
            GenerationState::Active => "active",
            GenerationState::Superseded => "superseded",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One installed snapshot of the cache
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: String,
    pub cache_name: String,
    pub manifest: AssetManifest,
}

impl Generation {
    pub fn new(id: impl Into<String>, manifest: AssetManifest) -> Self {
        let id = id.into();
        Self {
            cache_name: cache_name(&id),
            id,
            manifest,
        }
    }
}
