//! Cache manager implementation

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use http::StatusCode;
use offline_proxy::{FetchRequest, Upstream};
use offline_storage::{CacheStorage, CachedResponse, RequestKey};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};

use super::response::{FetchOutcome, Response, ResponseSource, to_cached};
use crate::error::CoreError;
use crate::generation::{Generation, GenerationState, cache_name};
use crate::manifest::AssetManifest;
use crate::routes::{RouteTable, Strategy};

/// Configuration for the cache manager
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Manifest entries fetched concurrently during install
    pub install_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            install_concurrency: 8,
        }
    }
}

/// Counters for lifecycle events and fetch outcomes
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub installs: u64,
    pub install_failures: u64,
    pub activations: u64,
    pub cleanup_failures: u64,
    pub exact_hits: u64,
    pub substitute_hits: u64,
    pub network_responses: u64,
    pub network_stored: u64,
    pub fallback_hits: u64,
    pub misses: u64,
    pub passthroughs: u64,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub generations: BTreeMap<String, GenerationState>,
    pub stats: WorkerStats,
}

/// Outcome of an activation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub generation: String,
    pub previous: Option<String>,
    /// Stale caches removed
    pub deleted: Vec<String>,
    /// Stale caches whose deletion failed; retried on the next activation
    pub failed: Vec<String>,
}

#[derive(Default)]
struct Generations {
    active: Option<Arc<Generation>>,
    waiting: Option<Arc<Generation>>,
    activated_at: Option<DateTime<Utc>>,
    states: BTreeMap<String, GenerationState>,
}

impl Generations {
    fn is_active(&self, id: &str) -> bool {
        self.active.as_ref().is_some_and(|g| g.id == id)
    }

    /// Set the state of a generation unless it is the active one
    fn set_pending_state(&mut self, id: &str, state: GenerationState) {
        if !self.is_active(id) {
            self.states.insert(id.to_string(), state);
        }
    }

    /// Make an installed generation the one waiting for activation.
    /// A different generation that was already waiting is superseded.
    ///
    /// Reinstalling the active generation swaps in its new manifest.
    fn wait(&mut self, generation: Generation) {
        if self.is_active(&generation.id) {
            if self
                .active
                .as_ref()
                .is_some_and(|active| active.manifest != generation.manifest)
            {
                info!(
                    "Generation {} reinstalled with a new manifest ({} entries)",
                    generation.id,
                    generation.manifest.len()
                );
                self.active = Some(Arc::new(generation));
            }
            return;
        }

        let id = generation.id.clone();
        if let Some(replaced) = self.waiting.replace(Arc::new(generation))
            && replaced.id != id
        {
            self.states
                .insert(replaced.id.clone(), GenerationState::Superseded);
        }
    }
}

/// Cache manager owning the generation lifecycle and the fetch strategies
///
/// Install and activate are serialized by a lifecycle lock, so an
/// activation always waits for an outstanding install. Fetches never take
/// that lock; they work on a snapshot of the active generation.
pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Upstream>,
    routes: RouteTable,
    config: CacheConfig,
    lifecycle: Mutex<()>,
    generations: RwLock<Generations>,
    stats: AsyncRwLock<WorkerStats>,
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        upstream: Arc<dyn Upstream>,
        routes: RouteTable,
        config: CacheConfig,
    ) -> Self {
        info!(
            "Initializing cache manager ({} route families, install concurrency: {})",
            routes.families().len(),
            config.install_concurrency
        );

        Self {
            storage,
            upstream,
            routes,
            config,
            lifecycle: Mutex::new(()),
            generations: RwLock::new(Generations::default()),
            stats: AsyncRwLock::new(WorkerStats::default()),
        }
    }

    // ==================== Status ====================

    /// Identifier of the active generation
    pub fn active_generation(&self) -> Option<String> {
        self.generations.read().active.as_ref().map(|g| g.id.clone())
    }

    /// Lifecycle state of a generation
    pub fn state(&self, generation_id: &str) -> GenerationState {
        self.generations
            .read()
            .states
            .get(generation_id)
            .copied()
            .unwrap_or_default()
    }

    /// Get worker statistics
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Snapshot of generations and counters
    pub async fn status(&self) -> WorkerStatus {
        let stats = self.stats().await;
        let generations = self.generations.read();

        WorkerStatus {
            active: generations.active.as_ref().map(|g| g.id.clone()),
            waiting: generations.waiting.as_ref().map(|g| g.id.clone()),
            activated_at: generations.activated_at,
            generations: generations.states.clone(),
            stats,
        }
    }

    /// Names of all cache stores currently in storage
    pub async fn cache_names(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.storage.keys().await?)
    }

    // ==================== Install ====================

    /// Install a generation: fetch every manifest entry and store it.
    ///
    /// Either every entry ends up in `cache-<generation_id>` and the
    /// generation waits for activation, or the install fails and the
    /// generation stays uninstalled. The active generation keeps serving
    /// throughout.
    pub async fn handle_install(
        &self,
        manifest: AssetManifest,
        generation_id: &str,
    ) -> Result<(), CoreError> {
        let _lifecycle = self.lifecycle.lock().await;

        let generation = Generation::new(generation_id, manifest);
        offline_storage::validate_cache_name(&generation.cache_name)?;

        info!(
            "Installing generation {} ({} manifest entries)",
            generation.id,
            generation.manifest.len()
        );
        self.generations
            .write()
            .set_pending_state(&generation.id, GenerationState::Installing);

        let missing = self.routes.uncached_substitutes(&generation.manifest);
        if !missing.is_empty() {
            warn!(
                "Route substitutes not in manifest for generation {}: {:?}",
                generation.id, missing
            );
        }

        match self.populate(&generation).await {
            Ok(()) => {
                info!("Installed generation {}", generation.id);
                self.record(|s| s.installs += 1).await;

                let mut generations = self.generations.write();
                generations.set_pending_state(&generation.id, GenerationState::InstalledWaiting);
                generations.wait(generation);
                Ok(())
            }
            Err(e) => {
                warn!("Install of generation {} failed: {}", generation.id, e);
                self.record(|s| s.install_failures += 1).await;
                self.generations
                    .write()
                    .set_pending_state(&generation.id, GenerationState::Uninstalled);
                Err(e)
            }
        }
    }

    /// Fetch all entries, then write them to the generation's cache
    async fn populate(&self, generation: &Generation) -> Result<(), CoreError> {
        let paths: Vec<String> = generation.manifest.iter().map(str::to_owned).collect();

        // Nothing is written until every entry has been fetched
        let fetched: Vec<(String, CachedResponse)> = stream::iter(paths)
            .map(|path| async move { self.fetch_asset(&path).await })
            .buffered(self.config.install_concurrency.max(1))
            .try_collect()
            .await?;

        let created = self.storage.open(&generation.cache_name).await?;

        for (path, response) in fetched {
            let key = RequestKey::get(path);
            if let Err(e) = self.storage.put(&generation.cache_name, &key, response).await {
                if created {
                    self.discard(&generation.cache_name).await;
                }
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Fetch one manifest entry; anything but a 2xx answer fails the install
    async fn fetch_asset(&self, path: &str) -> Result<(String, CachedResponse), CoreError> {
        debug!("Fetching manifest entry {}", path);

        let response = self
            .upstream
            .fetch(&FetchRequest::get(path))
            .await
            .map_err(|e| CoreError::InstallFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status.is_success() {
            return Err(CoreError::InstallFailed {
                path: path.to_string(),
                reason: format!("origin answered {}", response.status),
            });
        }

        Ok((path.to_string(), to_cached(&response)))
    }

    /// Best-effort removal of a half-populated cache
    async fn discard(&self, cache: &str) {
        if let Err(e) = self.storage.delete(cache).await {
            warn!("Failed to discard partially installed cache {}: {}", cache, e);
        }
    }

    /// Adopt a generation whose cache is already complete in storage.
    ///
    /// Returns `true` when every manifest entry is present, leaving the
    /// generation installed and waiting without touching the network.
    /// This lets a restarted runtime resume offline.
    pub async fn restore(
        &self,
        manifest: AssetManifest,
        generation_id: &str,
    ) -> Result<bool, CoreError> {
        let _lifecycle = self.lifecycle.lock().await;

        let generation = Generation::new(generation_id, manifest);
        offline_storage::validate_cache_name(&generation.cache_name)?;

        if !self.storage.has(&generation.cache_name).await? {
            return Ok(false);
        }

        let stored = self.storage.entries(&generation.cache_name).await?;
        let complete = generation
            .manifest
            .iter()
            .all(|path| stored.contains(&RequestKey::get(path)));

        if !complete {
            debug!(
                "Cache {} exists but is incomplete, not restoring",
                generation.cache_name
            );
            return Ok(false);
        }

        info!("Restored generation {} from storage", generation.id);

        let mut generations = self.generations.write();
        generations.set_pending_state(&generation.id, GenerationState::InstalledWaiting);
        generations.wait(generation);
        Ok(true)
    }

    // ==================== Activate ====================

    /// Activate an installed generation and delete every other cache.
    ///
    /// Deletions are attempted independently; failures are logged and
    /// reported but never fail the activation.
    pub async fn handle_activate(&self, generation_id: &str) -> Result<ActivationReport, CoreError> {
        let _lifecycle = self.lifecycle.lock().await;

        let current = cache_name(generation_id);

        let previous = {
            let mut generations = self.generations.write();

            let generation = match generations.waiting.take() {
                Some(waiting) if waiting.id == generation_id => waiting,
                other => {
                    generations.waiting = other;
                    match &generations.active {
                        Some(active) if active.id == generation_id => active.clone(),
                        _ => return Err(CoreError::NotInstalled(generation_id.to_string())),
                    }
                }
            };

            info!("Activating generation {}", generation_id);
            generations
                .states
                .insert(generation_id.to_string(), GenerationState::Activating);

            // Any other waiting generation loses its cache to the cleanup below
            if let Some(stale) = generations.waiting.take() {
                info!("Generation {} superseded before activation", stale.id);
                generations
                    .states
                    .insert(stale.id.clone(), GenerationState::Superseded);
            }

            // Promote before cleanup so fetches never see a deleted cache
            let previous = generations.active.replace(generation);
            let previous = previous.filter(|p| p.id != generation_id);
            if let Some(previous) = &previous {
                generations
                    .states
                    .insert(previous.id.clone(), GenerationState::Superseded);
            }
            generations.activated_at = Some(Utc::now());
            previous.map(|p| p.id.clone())
        };

        let mut report = ActivationReport {
            generation: generation_id.to_string(),
            previous,
            ..Default::default()
        };

        match self.storage.keys().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| *n != current) {
                    match self.storage.delete(&name).await {
                        Ok(_) => {
                            debug!("Deleted stale cache {}", name);
                            report.deleted.push(name);
                        }
                        Err(e) => {
                            warn!("Failed to delete stale cache {}: {}", name, e);
                            report.failed.push(name);
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to list caches during activation: {}", e),
        }

        self.generations
            .write()
            .states
            .insert(generation_id.to_string(), GenerationState::Active);

        let failed = report.failed.len() as u64;
        self.record(|s| {
            s.activations += 1;
            s.cleanup_failures += failed;
        })
        .await;

        info!(
            "Activated generation {} ({} stale caches deleted, {} failed)",
            generation_id,
            report.deleted.len(),
            report.failed.len()
        );

        Ok(report)
    }

    // ==================== Fetch ====================

    /// Answer an intercepted request.
    ///
    /// Never fails: every path ends in a response, an explicit absence of
    /// one, or a passthrough for requests that are not intercepted.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if !request.is_cacheable_read() {
            self.record(|s| s.passthroughs += 1).await;
            return FetchOutcome::Passthrough;
        }

        let active = self.generations.read().active.clone();
        let generation = match active {
            Some(generation) => generation,
            None => {
                self.record(|s| s.passthroughs += 1).await;
                return FetchOutcome::Passthrough;
            }
        };

        let strategy = self.routes.classify(&generation.manifest, request.path());
        debug!("{} {} -> {}", request.method, request.url, strategy.as_str());

        match strategy {
            Strategy::ExactCache { path } => {
                if let Some(cached) = self.lookup(&generation, &RequestKey::get(path)).await {
                    self.record(|s| s.exact_hits += 1).await;
                    return FetchOutcome::Respond(Response::from_cached(
                        cached,
                        ResponseSource::ExactCache,
                    ));
                }
                warn!("Manifest entry {} missing from {}", path, generation.cache_name);
            }
            Strategy::PrefixSubstitute { substitute, .. } => {
                if let Some(cached) = self.lookup(&generation, &RequestKey::get(substitute)).await {
                    self.record(|s| s.substitute_hits += 1).await;
                    return FetchOutcome::Respond(Response::from_cached(
                        cached,
                        ResponseSource::Substitute,
                    ));
                }
                warn!(
                    "Substitute {} missing from {}",
                    substitute, generation.cache_name
                );
            }
            Strategy::NetworkFirst => {}
        }

        self.network_first(&generation, request).await
    }

    async fn network_first(&self, generation: &Generation, request: &FetchRequest) -> FetchOutcome {
        let key = RequestKey::new(request.method.as_str(), request.url_without_fragment());

        match self.upstream.fetch(request).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    match self
                        .storage
                        .put(&generation.cache_name, &key, to_cached(&response))
                        .await
                    {
                        Ok(()) => self.record(|s| s.network_stored += 1).await,
                        Err(e) => warn!("Failed to cache {}: {}", key, e),
                    }
                }
                self.record(|s| s.network_responses += 1).await;
                FetchOutcome::Respond(Response::from_network(response))
            }
            Err(e) => {
                debug!("Network failed for {}: {}, trying cache", key, e);
                match self.lookup(generation, &key).await {
                    Some(cached) => {
                        self.record(|s| s.fallback_hits += 1).await;
                        FetchOutcome::Respond(Response::from_cached(cached, ResponseSource::Fallback))
                    }
                    None => {
                        self.record(|s| s.misses += 1).await;
                        FetchOutcome::NoResponse
                    }
                }
            }
        }
    }

    /// Read from the generation's cache, treating storage errors as a miss
    async fn lookup(&self, generation: &Generation, key: &RequestKey) -> Option<CachedResponse> {
        match self.storage.get(&generation.cache_name, key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn record(&self, update: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::ScriptedUpstream;
    use crate::routes::RouteFamily;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::Method;
    use offline_storage::{MemoryStorage, StorageError};

    const PAGES: &[&str] = &["/", "/song/1", "/demo/marble-machine", "/_app/start.js"];

    struct Harness {
        storage: Arc<MemoryStorage>,
        upstream: Arc<ScriptedUpstream>,
        manager: CacheManager,
    }

    fn harness_with(storage: Arc<dyn CacheStorage>, memory: Arc<MemoryStorage>) -> Harness {
        let upstream = Arc::new(ScriptedUpstream::new());
        for path in PAGES {
            upstream.serve(path, StatusCode::OK, &format!("page {}", path));
        }

        let routes = RouteTable::new(vec![
            RouteFamily::new("/song/", "/song/1"),
            RouteFamily::new("/demo/", "/demo/marble-machine"),
        ])
        .unwrap();

        let manager = CacheManager::new(storage, upstream.clone(), routes, CacheConfig::default());

        Harness {
            storage: memory,
            upstream,
            manager,
        }
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        harness_with(storage.clone(), storage)
    }

    fn manifest() -> AssetManifest {
        AssetManifest::new(PAGES.iter().copied()).unwrap()
    }

    async fn activated(generation: &str) -> Harness {
        let h = harness();
        h.manager.handle_install(manifest(), generation).await.unwrap();
        h.manager.handle_activate(generation).await.unwrap();
        h
    }

    fn body(outcome: &FetchOutcome) -> Bytes {
        outcome.response().expect("expected a response").body.clone()
    }

    #[tokio::test]
    async fn test_install_populates_manifest() {
        let h = harness();
        h.manager.handle_install(manifest(), "v1").await.unwrap();

        let mut expected: Vec<RequestKey> = PAGES.iter().map(|p| RequestKey::get(*p)).collect();
        expected.sort();
        assert_eq!(h.storage.entries("cache-v1").await.unwrap(), expected);
        assert_eq!(h.manager.state("v1"), GenerationState::InstalledWaiting);
        assert_eq!(h.manager.active_generation(), None);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let h = harness();
        h.manager.handle_install(manifest(), "v1").await.unwrap();
        h.manager.handle_install(manifest(), "v1").await.unwrap();

        let entries = h.storage.entries("cache-v1").await.unwrap();
        assert_eq!(entries.len(), PAGES.len());
        assert_eq!(h.storage.keys().await.unwrap(), vec!["cache-v1"]);
    }

    #[tokio::test]
    async fn test_install_fails_as_a_whole() {
        let h = harness();
        let mut paths: Vec<&str> = PAGES.to_vec();
        paths.push("/missing.js");
        let manifest = AssetManifest::new(paths).unwrap();

        let result = h.manager.handle_install(manifest, "v1").await;
        assert!(matches!(result, Err(CoreError::InstallFailed { ref path, .. }) if path == "/missing.js"));

        // Nothing was written and the generation cannot be activated
        assert!(h.storage.keys().await.unwrap().is_empty());
        assert_eq!(h.manager.state("v1"), GenerationState::Uninstalled);
        assert!(matches!(
            h.manager.handle_activate("v1").await,
            Err(CoreError::NotInstalled(_))
        ));
        assert_eq!(h.manager.stats().await.install_failures, 1);
    }

    #[tokio::test]
    async fn test_install_fails_when_offline() {
        let h = harness();
        h.upstream.set_offline(true);
        assert!(matches!(
            h.manager.handle_install(manifest(), "v1").await,
            Err(CoreError::InstallFailed { .. })
        ));
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_generation_serving() {
        let h = activated("v1").await;

        h.upstream.set_offline(true);
        assert!(h.manager.handle_install(manifest(), "v2").await.is_err());

        assert_eq!(h.manager.active_generation().as_deref(), Some("v1"));
        let outcome = h.manager.handle_fetch(&FetchRequest::get("/")).await;
        assert_eq!(body(&outcome), Bytes::from_static(b"page /"));
    }

    #[tokio::test]
    async fn test_install_rejects_unusable_generation_id() {
        let h = harness();
        assert!(matches!(
            h.manager.handle_install(manifest(), "../x").await,
            Err(CoreError::Storage(StorageError::InvalidName(_)))
        ));
    }

    #[tokio::test]
    async fn test_activation_without_prior_generation() {
        let h = harness();
        h.manager.handle_install(manifest(), "v1").await.unwrap();

        let report = h.manager.handle_activate("v1").await.unwrap();
        assert!(report.deleted.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.previous, None);
        assert_eq!(h.manager.state("v1"), GenerationState::Active);
        assert_eq!(h.manager.active_generation().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_single_active_generation_across_cycles() {
        let h = harness();
        // Leftover from some earlier deployment
        h.storage.open("cache-ancient").await.unwrap();

        for generation in ["v1", "v2", "v3"] {
            h.manager.handle_install(manifest(), generation).await.unwrap();
            h.manager.handle_activate(generation).await.unwrap();

            assert_eq!(
                h.storage.keys().await.unwrap(),
                vec![cache_name(generation)]
            );
        }

        assert_eq!(h.manager.state("v1"), GenerationState::Superseded);
        assert_eq!(h.manager.state("v2"), GenerationState::Superseded);
        assert_eq!(h.manager.state("v3"), GenerationState::Active);
    }

    #[tokio::test]
    async fn test_new_install_waits_while_old_generation_serves() {
        let h = activated("v1").await;
        h.manager.handle_install(manifest(), "v2").await.unwrap();

        assert_eq!(h.manager.active_generation().as_deref(), Some("v1"));
        assert_eq!(h.manager.state("v2"), GenerationState::InstalledWaiting);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["cache-v1", "cache-v2"]);

        let report = h.manager.handle_activate("v2").await.unwrap();
        assert_eq!(report.previous.as_deref(), Some("v1"));
        assert_eq!(report.deleted, vec!["cache-v1"]);
    }

    #[tokio::test]
    async fn test_newer_install_supersedes_waiting_generation() {
        let h = activated("v1").await;
        h.manager.handle_install(manifest(), "v2").await.unwrap();
        h.manager.handle_install(manifest(), "v3").await.unwrap();

        assert_eq!(h.manager.state("v2"), GenerationState::Superseded);
        assert!(matches!(
            h.manager.handle_activate("v2").await,
            Err(CoreError::NotInstalled(_))
        ));

        let report = h.manager.handle_activate("v3").await.unwrap();
        assert_eq!(report.deleted, vec!["cache-v1", "cache-v2"]);
    }

    #[tokio::test]
    async fn test_reactivating_active_generation_supersedes_waiting() {
        let h = activated("v1").await;
        h.manager.handle_install(manifest(), "v2").await.unwrap();

        // The cleanup deletes cache-v2, so v2 can no longer be activated
        let report = h.manager.handle_activate("v1").await.unwrap();
        assert_eq!(report.deleted, vec!["cache-v2"]);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["cache-v1"]);
        assert_eq!(h.manager.state("v2"), GenerationState::Superseded);
        assert!(matches!(
            h.manager.handle_activate("v2").await,
            Err(CoreError::NotInstalled(_))
        ));

        h.upstream.set_offline(true);
        let outcome = h.manager.handle_fetch(&FetchRequest::get("/")).await;
        assert_eq!(outcome.response().unwrap().source, ResponseSource::ExactCache);
        assert_eq!(h.manager.active_generation().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_reinstalling_active_generation_updates_manifest() {
        let h = activated("v1").await;
        h.upstream.serve("/about", StatusCode::OK, "about page");

        let mut paths: Vec<&str> = PAGES.to_vec();
        paths.push("/about");
        h.manager
            .handle_install(AssetManifest::new(paths).unwrap(), "v1")
            .await
            .unwrap();
        assert_eq!(h.manager.state("v1"), GenerationState::Active);

        h.upstream.set_offline(true);
        let outcome = h.manager.handle_fetch(&FetchRequest::get("/about")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.source, ResponseSource::ExactCache);
        assert_eq!(response.body, Bytes::from_static(b"about page"));
    }

    #[tokio::test]
    async fn test_activate_unknown_generation() {
        let h = harness();
        assert!(matches!(
            h.manager.handle_activate("nope").await,
            Err(CoreError::NotInstalled(_))
        ));
    }

    /// Storage whose deletes always fail
    struct UndeletableStorage(Arc<MemoryStorage>);

    #[async_trait]
    impl CacheStorage for UndeletableStorage {
        async fn open(&self, cache: &str) -> Result<bool, StorageError> {
            self.0.open(cache).await
        }
        async fn has(&self, cache: &str) -> Result<bool, StorageError> {
            self.0.has(cache).await
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.0.keys().await
        }
        async fn delete(&self, _cache: &str) -> Result<bool, StorageError> {
            Err(StorageError::Io(std::io::Error::other("read-only")))
        }
        async fn get(
            &self,
            cache: &str,
            key: &RequestKey,
        ) -> Result<Option<CachedResponse>, StorageError> {
            self.0.get(cache, key).await
        }
        async fn put(
            &self,
            cache: &str,
            key: &RequestKey,
            response: CachedResponse,
        ) -> Result<(), StorageError> {
            self.0.put(cache, key, response).await
        }
        async fn entries(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError> {
            self.0.entries(cache).await
        }
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_block_activation() {
        let memory = Arc::new(MemoryStorage::new());
        memory.open("cache-old-a").await.unwrap();
        memory.open("cache-old-b").await.unwrap();
        let h = harness_with(Arc::new(UndeletableStorage(memory.clone())), memory);

        h.manager.handle_install(manifest(), "v1").await.unwrap();
        let report = h.manager.handle_activate("v1").await.unwrap();

        assert_eq!(report.failed, vec!["cache-old-a", "cache-old-b"]);
        assert_eq!(h.manager.active_generation().as_deref(), Some("v1"));
        assert_eq!(h.manager.stats().await.cleanup_failures, 2);
    }

    #[tokio::test]
    async fn test_exact_cache_serves_without_network() {
        let h = activated("v1").await;
        h.upstream.set_offline(true);
        let calls_before = h.upstream.calls().len();

        let outcome = h.manager.handle_fetch(&FetchRequest::get("/_app/start.js")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.source, ResponseSource::ExactCache);
        assert_eq!(response.body, Bytes::from_static(b"page /_app/start.js"));

        // Query strings do not defeat exact matching
        let outcome = h
            .manager
            .handle_fetch(&FetchRequest::get("/_app/start.js?v=2"))
            .await;
        assert_eq!(outcome.response().unwrap().source, ResponseSource::ExactCache);
        assert_eq!(h.upstream.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_representative_page_resolves_exactly() {
        let h = activated("v1").await;
        let outcome = h.manager.handle_fetch(&FetchRequest::get("/song/1")).await;
        assert_eq!(outcome.response().unwrap().source, ResponseSource::ExactCache);
    }

    #[tokio::test]
    async fn test_prefix_substitution() {
        let h = activated("v1").await;
        h.upstream.set_offline(true);

        let direct = h.manager.handle_fetch(&FetchRequest::get("/song/1")).await;
        let substituted = h.manager.handle_fetch(&FetchRequest::get("/song/42")).await;
        assert_eq!(substituted.response().unwrap().source, ResponseSource::Substitute);
        assert_eq!(body(&substituted), body(&direct));

        for path in ["/demo/other", "/demo/a/b/c", "/demo/"] {
            let outcome = h.manager.handle_fetch(&FetchRequest::get(path)).await;
            assert_eq!(body(&outcome), Bytes::from_static(b"page /demo/marble-machine"));
        }
    }

    #[tokio::test]
    async fn test_missing_exact_entry_falls_back_to_network() {
        let h = activated("v1").await;
        h.storage.delete("cache-v1").await.unwrap();
        h.storage.open("cache-v1").await.unwrap();

        let outcome = h.manager.handle_fetch(&FetchRequest::get("/")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body, Bytes::from_static(b"page /"));
    }

    #[tokio::test]
    async fn test_network_first_round_trip() {
        let h = activated("v1").await;
        h.upstream.serve("/api/songs?page=2", StatusCode::OK, "[1,2,3]");

        let request = FetchRequest::get("/api/songs?page=2");
        let online = h.manager.handle_fetch(&request).await;
        let online = online.response().unwrap().clone();
        assert_eq!(online.source, ResponseSource::Network);

        h.upstream.set_offline(true);
        let offline = h.manager.handle_fetch(&request).await;
        let offline = offline.response().unwrap();

        assert_eq!(offline.source, ResponseSource::Fallback);
        assert_eq!(offline.status, online.status);
        assert_eq!(offline.body, online.body);
        assert_eq!(offline.headers, online.headers);

        let stats = h.manager.stats().await;
        assert_eq!(stats.network_stored, 1);
        assert_eq!(stats.fallback_hits, 1);
    }

    #[tokio::test]
    async fn test_network_first_does_not_cache_errors() {
        let h = activated("v1").await;
        h.upstream.serve("/flaky", StatusCode::INTERNAL_SERVER_ERROR, "boom");
        h.upstream.serve("/moved", StatusCode::FOUND, "");

        for path in ["/flaky", "/moved", "/nowhere"] {
            let outcome = h.manager.handle_fetch(&FetchRequest::get(path)).await;
            let response = outcome.response().unwrap();
            assert_ne!(response.status, StatusCode::OK);
            assert_eq!(response.source, ResponseSource::Network);

            assert!(
                h.storage
                    .get("cache-v1", &RequestKey::get(path))
                    .await
                    .unwrap()
                    .is_none()
            );
        }

        h.upstream.set_offline(true);
        let outcome = h.manager.handle_fetch(&FetchRequest::get("/flaky")).await;
        assert!(matches!(outcome, FetchOutcome::NoResponse));
    }

    #[tokio::test]
    async fn test_network_failure_without_cache_is_no_response() {
        let h = activated("v1").await;
        h.upstream.set_offline(true);

        let outcome = h.manager.handle_fetch(&FetchRequest::get("/never-seen")).await;
        assert!(matches!(outcome, FetchOutcome::NoResponse));
        assert_eq!(h.manager.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_write_requests_bypass_cache() {
        let h = activated("v1").await;
        let before = h.storage.entries("cache-v1").await.unwrap();
        let calls_before = h.upstream.calls().len();

        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
            let request = FetchRequest::new(method, "/song/1").with_body(Bytes::from_static(b"{}"));
            assert!(matches!(
                h.manager.handle_fetch(&request).await,
                FetchOutcome::Passthrough
            ));
        }

        assert_eq!(h.storage.entries("cache-v1").await.unwrap(), before);
        // The core leaves forwarding to the runtime
        assert_eq!(h.upstream.calls().len(), calls_before);
        assert_eq!(h.manager.stats().await.passthroughs, 4);
    }

    #[tokio::test]
    async fn test_no_active_generation_passes_through() {
        let h = harness();
        h.manager.handle_install(manifest(), "v1").await.unwrap();

        assert!(matches!(
            h.manager.handle_fetch(&FetchRequest::get("/")).await,
            FetchOutcome::Passthrough
        ));
    }

    #[tokio::test]
    async fn test_restore_complete_cache_without_network() {
        let h = harness();
        h.manager.handle_install(manifest(), "v1").await.unwrap();

        // A fresh manager over the same storage, with the network down
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_offline(true);
        let restarted = CacheManager::new(
            h.storage.clone(),
            upstream,
            RouteTable::new(vec![RouteFamily::new("/song/", "/song/1")]).unwrap(),
            CacheConfig::default(),
        );

        assert!(restarted.restore(manifest(), "v1").await.unwrap());
        restarted.handle_activate("v1").await.unwrap();

        let outcome = restarted.handle_fetch(&FetchRequest::get("/song/9")).await;
        assert_eq!(body(&outcome), Bytes::from_static(b"page /song/1"));
    }

    #[tokio::test]
    async fn test_restore_rejects_incomplete_cache() {
        let h = harness();
        h.storage.open("cache-v1").await.unwrap();
        assert!(!h.manager.restore(manifest(), "v1").await.unwrap());
        assert!(!h.manager.restore(manifest(), "v2").await.unwrap());
        assert_eq!(h.manager.state("v1"), GenerationState::Uninstalled);
    }

    #[tokio::test]
    async fn test_concurrent_fetches() {
        let h = Arc::new(activated("v1").await);
        for i in 0..16 {
            h.upstream
                .serve(&format!("/api/{}", i), StatusCode::OK, &format!("item {}", i));
        }

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let h = h.clone();
                tokio::spawn(async move {
                    h.manager
                        .handle_fetch(&FetchRequest::get(format!("/api/{}", i)))
                        .await
                        .label()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), "network");
        }
        assert_eq!(
            h.storage.entries("cache-v1").await.unwrap().len(),
            PAGES.len() + 16
        );
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let h = activated("v1").await;
        h.manager.handle_install(manifest(), "v2").await.unwrap();

        let status = h.manager.status().await;
        assert_eq!(status.active.as_deref(), Some("v1"));
        assert_eq!(status.waiting.as_deref(), Some("v2"));
        assert!(status.activated_at.is_some());
        assert_eq!(status.generations.get("v2"), Some(&GenerationState::InstalledWaiting));
        assert_eq!(status.stats.installs, 2);
        assert_eq!(
            h.manager.cache_names().await.unwrap(),
            vec!["cache-v1", "cache-v2"]
        );
    }
}
