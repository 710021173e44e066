//! Request classification
//!
//! Decides which response strategy answers an intercepted request,
//! based on the active manifest and a fixed list of route families.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::manifest::AssetManifest;

/// Response strategy selected for a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy<'a> {
    /// Serve the cached entry for the path itself
    ExactCache { path: &'a str },
    /// Serve the cached representative page of a route family
    PrefixSubstitute {
        prefix: &'a str,
        substitute: &'a str,
    },
    /// Try the network, fall back to the cache
    NetworkFirst,
}

impl Strategy<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ExactCache { .. } => "exact_cache",
            Strategy::PrefixSubstitute { .. } => "prefix_substitute",
            Strategy::NetworkFirst => "network_first",
        }
    }
}

/// A family of parameterized routes sharing one cached representative page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFamily {
    /// Path prefix identifying the family, e.g. `/song/`
    pub prefix: String,
    /// Canonical page served for every path in the family, e.g. `/song/1`
    pub substitute: String,
    /// Priority for this family (lower = higher priority)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    100
}

impl RouteFamily {
    pub fn new(prefix: impl Into<String>, substitute: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            substitute: substitute.into(),
            priority: default_priority(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !self.prefix.starts_with('/') {
            return Err(CoreError::InvalidRoute(format!(
                "prefix must start with '/': {:?}",
                self.prefix
            )));
        }
        if !self.substitute.starts_with('/') || self.substitute.contains(['?', '#']) {
            return Err(CoreError::InvalidRoute(format!(
                "substitute must be a plain absolute path: {:?}",
                self.substitute
            )));
        }
        Ok(())
    }
}

/// Route classifier
///
/// Rules are evaluated in a fixed order and the first match wins:
/// exact manifest entries, then route families by priority, then
/// network-first for everything else.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    families: Vec<RouteFamily>,
}

impl RouteTable {
    /// Create a route table, validating every family
    pub fn new(mut families: Vec<RouteFamily>) -> Result<Self, CoreError> {
        for family in &families {
            family.validate()?;
        }

        // Stable sort keeps declaration order among equal priorities
        families.sort_by_key(|f| f.priority);

        Ok(Self { families })
    }

    pub fn families(&self) -> &[RouteFamily] {
        &self.families
    }

    /// Classify a request path against the active manifest
    pub fn classify<'a>(&'a self, manifest: &AssetManifest, path: &'a str) -> Strategy<'a> {
        if manifest.contains(path) {
            return Strategy::ExactCache { path };
        }

        self.families
            .iter()
            .find(|f| path.starts_with(&f.prefix))
            .map(|f| Strategy::PrefixSubstitute {
                prefix: &f.prefix,
                substitute: &f.substitute,
            })
            .unwrap_or(Strategy::NetworkFirst)
    }

    /// Substitutes that the manifest does not cache
    pub fn uncached_substitutes<'a>(&'a self, manifest: &AssetManifest) -> Vec<&'a str> {
        self.families
            .iter()
            .map(|f| f.substitute.as_str())
            .filter(|s| !manifest.contains(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            RouteFamily::new("/song/", "/song/1"),
            RouteFamily::new("/demo/", "/demo/marble-machine"),
        ])
        .unwrap()
    }

    fn manifest() -> AssetManifest {
        AssetManifest::new(["/", "/song/1", "/demo/marble-machine", "/_app/start.js"]).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let table = table();
        let manifest = manifest();

        assert_eq!(
            table.classify(&manifest, "/_app/start.js"),
            Strategy::ExactCache { path: "/_app/start.js" }
        );
        assert_eq!(
            table.classify(&manifest, "/"),
            Strategy::ExactCache { path: "/" }
        );
    }

    #[test]
    fn test_exact_match_wins_over_prefix() {
        let table = table();
        let manifest = manifest();

        // The representative pages are themselves inside their families
        assert_eq!(
            table.classify(&manifest, "/song/1"),
            Strategy::ExactCache { path: "/song/1" }
        );
        assert_eq!(
            table.classify(&manifest, "/demo/marble-machine"),
            Strategy::ExactCache {
                path: "/demo/marble-machine"
            }
        );
    }

    #[test]
    fn test_prefix_substitute() {
        let table = table();
        let manifest = manifest();

        assert_eq!(
            table.classify(&manifest, "/song/42"),
            Strategy::PrefixSubstitute {
                prefix: "/song/",
                substitute: "/song/1"
            }
        );
        assert_eq!(
            table.classify(&manifest, "/demo/anything/nested"),
            Strategy::PrefixSubstitute {
                prefix: "/demo/",
                substitute: "/demo/marble-machine"
            }
        );
    }

    #[test]
    fn test_network_first_default() {
        let table = table();
        let manifest = manifest();

        assert_eq!(table.classify(&manifest, "/about"), Strategy::NetworkFirst);
        // A prefix without its trailing slash is not part of the family
        assert_eq!(table.classify(&manifest, "/song"), Strategy::NetworkFirst);
        assert_eq!(table.classify(&manifest, "/songs/2"), Strategy::NetworkFirst);
    }

    #[test]
    fn test_priority_ordering() {
        let table = RouteTable::new(vec![
            RouteFamily::new("/song/", "/song/1"),
            RouteFamily::new("/song/shared/", "/song/shared/1").with_priority(50),
        ])
        .unwrap();
        let manifest = AssetManifest::default();

        assert_eq!(
            table.classify(&manifest, "/song/shared/7"),
            Strategy::PrefixSubstitute {
                prefix: "/song/shared/",
                substitute: "/song/shared/1"
            }
        );
        assert_eq!(
            table.classify(&manifest, "/song/7"),
            Strategy::PrefixSubstitute {
                prefix: "/song/",
                substitute: "/song/1"
            }
        );
    }

    #[test]
    fn test_invalid_families() {
        assert!(RouteTable::new(vec![RouteFamily::new("song/", "/song/1")]).is_err());
        assert!(RouteTable::new(vec![RouteFamily::new("/song/", "song/1")]).is_err());
        assert!(RouteTable::new(vec![RouteFamily::new("/song/", "/song/1?x")]).is_err());
    }

    #[test]
    fn test_uncached_substitutes() {
        let table = table();
        let manifest = AssetManifest::new(["/", "/song/1"]).unwrap();
        assert_eq!(
            table.uncached_substitutes(&manifest),
            vec!["/demo/marble-machine"]
        );
    }
}
