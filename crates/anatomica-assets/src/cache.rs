//! Zone-scoped mesh cache with delayed eviction
//!
//! The cache keeps the structures of the zones the wearer is looking at (and
//! their neighbours) resident in the visualization state:
//! - `load_zone` marks a zone active and fetches its meshes at the active LOD,
//!   upgrading lower-LOD entries in place
//! - `preload_zone` fetches at the preload LOD without marking the zone active
//! - `unload_zone` schedules eviction after a grace period; reloading within
//!   the period cancels it
//!
//! Fetches run as detached tasks. Each placeholder is tagged with a request
//! number so a late completion can only land on the entry it was issued for,
//! and a shared liveness flag drops every completion after `shutdown`.

use anatomica_core::{AssetWriter, BodyZone, FetchFailure, LoadedStructure, Lod, Structure, StructureProvider};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Grace period between unloading a zone and evicting its meshes
    pub eviction_delay: Duration,
    /// LOD used for the zone being looked at
    pub active_lod: Lod,
    /// LOD used for neighbouring zones
    pub preload_lod: Lod,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_delay: Duration::from_secs(30),
            active_lod: Lod::High,
            preload_lod: Lod::Low,
        }
    }
}

/// Shared flag telling background tasks whether their owner still exists
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

struct EvictionTicket {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Residency {
    loaded: HashSet<BodyZone>,
    preloaded: HashSet<BodyZone>,
}

impl Residency {
    fn holds(&self, zone: BodyZone) -> bool {
        self.loaded.contains(&zone) || self.preloaded.contains(&zone)
    }
}

struct CacheInner {
    config: CacheConfig,
    patient_id: String,
    provider: Arc<dyn StructureProvider>,
    assets: AssetWriter,
    liveness: Liveness,
    /// Patient structures by code, fetched once
    structures: Mutex<HashMap<String, Structure>>,
    residency: Mutex<Residency>,
    evictions: Mutex<HashMap<String, EvictionTicket>>,
    fetches: Mutex<Vec<JoinHandle<()>>>,
    next_request: AtomicU64,
    next_eviction: AtomicU64,
}

/// Handle to the zone asset cache; clones share one cache
#[derive(Clone)]
pub struct ZoneAssetCache {
    inner: Arc<CacheInner>,
}

impl ZoneAssetCache {
    pub fn new(
        config: CacheConfig,
        patient_id: impl Into<String>,
        provider: Arc<dyn StructureProvider>,
        assets: AssetWriter,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                patient_id: patient_id.into(),
                provider,
                assets,
                liveness: Liveness::new(),
                structures: Mutex::new(HashMap::new()),
                residency: Mutex::new(Residency::default()),
                evictions: Mutex::new(HashMap::new()),
                fetches: Mutex::new(Vec::new()),
                next_request: AtomicU64::new(1),
                next_eviction: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn liveness(&self) -> Liveness {
        self.inner.liveness.clone()
    }

    /// Fetch the patient's structure list. A failure leaves the cache empty,
    /// so every zone simply loads nothing.
    pub async fn initialize(&self) -> Result<usize> {
        let structures = self.inner.provider.structures(&self.inner.patient_id).await?;
        let count = structures.len();
        let mut map = self.inner.structures.lock();
        map.clear();
        map.extend(structures.into_iter().map(|s| (s.code.clone(), s)));
        info!(patient = %self.inner.patient_id, structures = count, "Patient structures loaded");
        Ok(count)
    }

    /// Patient structures that belong to a zone
    pub fn zone_structures(&self, zone: BodyZone) -> Vec<Structure> {
        let structures = self.inner.structures.lock();
        zone.structure_codes()
            .iter()
            .filter_map(|code| structures.get(*code).cloned())
            .collect()
    }

    /// Zones currently loaded or preloaded
    pub fn resident_zones(&self) -> Vec<BodyZone> {
        let residency = self.inner.residency.lock();
        BodyZone::ALL
            .iter()
            .copied()
            .filter(|z| residency.holds(*z))
            .collect()
    }

    pub fn is_zone_loaded(&self, zone: BodyZone) -> bool {
        self.inner.residency.lock().loaded.contains(&zone)
    }

    /// Mark a zone active and fetch its structures at `lod`.
    ///
    /// No-op while the zone is already loaded; unload it first to reload.
    pub fn load_zone(&self, zone: BodyZone, lod: Lod) {
        if !self.inner.liveness.is_alive() {
            return;
        }
        {
            let mut residency = self.inner.residency.lock();
            if !residency.loaded.insert(zone) {
                debug!(zone = %zone, "Zone already loaded");
                return;
            }
            residency.preloaded.remove(&zone);
        }
        let started = self.fetch_zone(zone, lod);
        info!(zone = %zone, lod = %lod, fetches = started, "Zone loaded");
    }

    /// Warm a neighbouring zone at the preload LOD
    pub fn preload_zone(&self, zone: BodyZone) {
        if !self.inner.liveness.is_alive() {
            return;
        }
        {
            let mut residency = self.inner.residency.lock();
            if !residency.loaded.contains(&zone) {
                residency.preloaded.insert(zone);
            }
        }
        let started = self.fetch_zone(zone, self.inner.config.preload_lod);
        debug!(zone = %zone, fetches = started, "Zone preloaded");
    }

    /// Release a zone; its meshes are evicted after the grace period unless
    /// the zone (or another zone owning them) becomes resident again
    pub fn unload_zone(&self, zone: BodyZone) {
        if !self.inner.liveness.is_alive() {
            return;
        }
        {
            let mut residency = self.inner.residency.lock();
            residency.loaded.remove(&zone);
            residency.preloaded.remove(&zone);
        }
        let mut scheduled = 0;
        for code in zone.structure_codes() {
            if self.inner.assets.contains(code) {
                self.schedule_eviction(code);
                scheduled += 1;
            }
        }
        debug!(zone = %zone, scheduled = scheduled, "Zone unloaded, eviction scheduled");
    }

    /// Cached entry for a structure, if present
    pub fn get_organ(&self, code: &str) -> Option<LoadedStructure> {
        self.inner.assets.get(code)
    }

    /// Number of pending eviction timers
    pub fn pending_evictions(&self) -> usize {
        self.inner.evictions.lock().len()
    }

    /// Wait for every in-flight fetch to finish
    pub async fn settle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.fetches.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Stop all background work; late completions are dropped
    pub fn shutdown(&self) {
        self.inner.liveness.invalidate();
        for (_, ticket) in self.inner.evictions.lock().drain() {
            ticket.handle.abort();
        }
        for handle in self.inner.fetches.lock().drain(..) {
            handle.abort();
        }
        info!(patient = %self.inner.patient_id, "Asset cache shut down");
    }

    fn fetch_zone(&self, zone: BodyZone, lod: Lod) -> usize {
        let mut started = 0;
        for structure in self.zone_structures(zone) {
            self.cancel_eviction(&structure.code);
            let request = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
            if !self.inner.assets.begin_fetch(&structure, lod, request) {
                continue;
            }
            let task = tokio::spawn(fetch_mesh(self.inner.clone(), structure, lod, request));
            let mut fetches = self.inner.fetches.lock();
            fetches.retain(|h| !h.is_finished());
            fetches.push(task);
            started += 1;
        }
        started
    }

    fn cancel_eviction(&self, code: &str) {
        if let Some(ticket) = self.inner.evictions.lock().remove(code) {
            ticket.handle.abort();
            debug!(code = %code, "Eviction cancelled");
        }
    }

    fn schedule_eviction(&self, code: &str) {
        let generation = self.inner.next_eviction.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(evict_after_delay(self.inner.clone(), code.to_string(), generation));
        let previous = self
            .inner
            .evictions
            .lock()
            .insert(code.to_string(), EvictionTicket { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }
}

async fn fetch_mesh(inner: Arc<CacheInner>, structure: Structure, lod: Lod, request: u64) {
    let result = inner.provider.mesh_url(&inner.patient_id, &structure.code, lod).await;

    if !inner.liveness.is_alive() {
        debug!(code = %structure.code, "Dropping fetch result after shutdown");
        return;
    }

    match result {
        Ok(url) => {
            if inner.assets.complete_fetch(&structure.code, request, lod, url) {
                debug!(code = %structure.code, lod = %lod, "Mesh loaded");
            } else {
                debug!(code = %structure.code, request = request, "Superseded mesh fetch discarded");
            }
        }
        Err(e) => match inner.assets.fail_fetch(&structure.code, request) {
            FetchFailure::Removed => {
                warn!(code = %structure.code, lod = %lod, error = %e, "Mesh fetch failed, structure skipped");
            }
            FetchFailure::Reverted => {
                warn!(code = %structure.code, lod = %lod, error = %e, "Mesh upgrade failed, keeping previous LOD");
            }
            FetchFailure::Stale => {
                debug!(code = %structure.code, error = %e, "Superseded mesh fetch failed");
            }
        },
    }
}

async fn evict_after_delay(inner: Arc<CacheInner>, code: String, generation: u64) {
    tokio::time::sleep(inner.config.eviction_delay).await;

    {
        let mut evictions = inner.evictions.lock();
        match evictions.get(&code) {
            Some(ticket) if ticket.generation == generation => {
                evictions.remove(&code);
            }
            _ => return,
        }
    }

    if !inner.liveness.is_alive() {
        return;
    }

    let owner_resident = BodyZone::owner_of(&code).is_some_and(|zone| inner.residency.lock().holds(zone));
    if owner_resident {
        debug!(code = %code, "Eviction skipped, zone is resident again");
        return;
    }

    if inner.assets.evict(&code) {
        debug!(code = %code, "Mesh evicted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomica_core::{BodySystem, SharedState};
    use futures_util::future::{BoxFuture, FutureExt};
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        calls: AtomicUsize,
        latency: Duration,
        failing: HashSet<&'static str>,
    }

    impl MockProvider {
        fn new(latency: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                latency,
                failing: HashSet::new(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StructureProvider for MockProvider {
        fn structures<'a>(&'a self, _patient_id: &'a str) -> BoxFuture<'a, Result<Vec<Structure>>> {
            async move {
                Ok(BodyZone::ALL
                    .iter()
                    .flat_map(|z| z.structure_codes())
                    .map(|code| Structure::new(code, code, BodySystem::Skeletal))
                    .collect())
            }
            .boxed()
        }

        fn mesh_url<'a>(
            &'a self,
            patient_id: &'a str,
            structure_code: &'a str,
            lod: Lod,
        ) -> BoxFuture<'a, Result<String>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.latency).await;
                if self.failing.contains(structure_code) {
                    anyhow::bail!("no mesh for {}", structure_code);
                }
                Ok(format!("mock://{}/{}.{}.glb", patient_id, structure_code, lod))
            }
            .boxed()
        }
    }

    async fn cache_with(provider: Arc<MockProvider>) -> (ZoneAssetCache, SharedState) {
        let state = SharedState::new();
        let cache = ZoneAssetCache::new(CacheConfig::default(), "demo", provider, state.asset_writer());
        cache.initialize().await.unwrap();
        (cache, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_zone_fetches_every_structure() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(50)));
        let (cache, state) = cache_with(provider.clone()).await;

        cache.load_zone(BodyZone::Head, Lod::High);
        assert!(cache.get_organ("BRAIN").unwrap().is_loading);

        cache.settle().await;
        let brain = cache.get_organ("BRAIN").unwrap();
        assert!(brain.is_ready());
        assert_eq!(brain.lod, Lod::High);
        assert_eq!(brain.mesh_url.as_deref(), Some("mock://demo/BRAIN.high.glb"));
        assert_eq!(provider.calls(), BodyZone::Head.structure_codes().len());
        assert_eq!(state.snapshot().loaded_structures.len(), BodyZone::Head.structure_codes().len());
        assert!(cache.is_zone_loaded(BodyZone::Head));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_zone_twice_is_noop() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(10)));
        let (cache, state) = cache_with(provider.clone()).await;

        cache.load_zone(BodyZone::Head, Lod::Low);
        cache.settle().await;
        let calls = provider.calls();
        let revision = state.revision();

        cache.load_zone(BodyZone::Head, Lod::High);
        cache.settle().await;

        assert_eq!(provider.calls(), calls);
        assert_eq!(state.revision(), revision);
        assert_eq!(cache.get_organ("BRAIN").unwrap().lod, Lod::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_toggle_does_not_refetch() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(10)));
        let (cache, _state) = cache_with(provider.clone()).await;
        let count = BodyZone::Thorax.structure_codes().len();

        cache.load_zone(BodyZone::Thorax, Lod::High);
        cache.settle().await;
        for _ in 0..5 {
            cache.unload_zone(BodyZone::Thorax);
            tokio::time::sleep(Duration::from_secs(5)).await;
            cache.load_zone(BodyZone::Thorax, Lod::High);
        }
        cache.settle().await;

        assert_eq!(provider.calls(), count);
        assert_eq!(cache.pending_evictions(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(cache.get_organ("HEART").unwrap().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unloaded_zone_evicted_after_delay() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(10)));
        let (cache, _state) = cache_with(provider).await;

        cache.load_zone(BodyZone::Pelvis, Lod::High);
        cache.settle().await;
        cache.unload_zone(BodyZone::Pelvis);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(cache.get_organ("BLADDER").is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get_organ("BLADDER").is_none());
        assert_eq!(cache.pending_evictions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_skips_structure() {
        let mut provider = MockProvider::new(Duration::from_millis(10));
        provider.failing.insert("BRAIN");
        let (cache, _state) = cache_with(Arc::new(provider)).await;

        cache.load_zone(BodyZone::Head, Lod::High);
        cache.settle().await;

        assert!(cache.get_organ("BRAIN").is_none());
        assert!(cache.get_organ("SKULL").unwrap().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_then_upgrade_keeps_low_mesh_visible() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(100)));
        let (cache, _state) = cache_with(provider).await;

        cache.preload_zone(BodyZone::Abdomen);
        cache.settle().await;
        assert_eq!(cache.get_organ("LIVER").unwrap().lod, Lod::Low);
        assert!(!cache.is_zone_loaded(BodyZone::Abdomen));

        cache.load_zone(BodyZone::Abdomen, Lod::High);
        let upgrading = cache.get_organ("LIVER").unwrap();
        assert!(upgrading.is_loading);
        assert_eq!(upgrading.mesh_url.as_deref(), Some("mock://demo/LIVER.low.glb"));

        cache.settle().await;
        assert_eq!(cache.get_organ("LIVER").unwrap().lod, Lod::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completions_after_shutdown_are_dropped() {
        let provider = Arc::new(MockProvider::new(Duration::from_millis(100)));
        let (cache, state) = cache_with(provider).await;

        cache.load_zone(BodyZone::UpperLimb, Lod::High);
        let liveness = cache.liveness();
        cache.shutdown();
        assert!(!liveness.is_alive());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = state.snapshot();
        assert!(snap.loaded_structures.values().all(|s| !s.is_ready()));

        // Operations after shutdown are no-ops
        cache.load_zone(BodyZone::Head, Lod::High);
        assert!(cache.get_organ("BRAIN").is_none());
    }
}
