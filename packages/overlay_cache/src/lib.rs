#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Memoized layer descriptors.
//!
//! [`OverlayCache`] keys layers by region, metric, layer type and the
//! region's data version. Entries expire after a TTL and the least recently
//! used one is evicted once the capacity is exceeded.
//!
//! At most one computation per key runs at a time: a miss spawns the
//! computation on the runtime and registers a shared handle, and concurrent
//! callers for the same key await that handle. Dropping a caller never
//! cancels the computation; its result still lands in the cache.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use climate_map_index::LayerMetric;
use climate_map_layers::{LayerDescriptor, LayerError, LayerType};
use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::time::Instant;

/// Default number of cached layers.
pub const DEFAULT_CAPACITY: usize = 64;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Identifies one cached layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlayKey {
    pub region_id: String,
    pub metric: LayerMetric,
    pub layer_type: LayerType,
    pub data_version: u64,
}

impl OverlayKey {
    #[must_use]
    pub fn new(
        region_id: impl Into<String>,
        metric: LayerMetric,
        layer_type: LayerType,
        data_version: u64,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            metric,
            layer_type,
            data_version,
        }
    }
}

/// Errors surfaced by [`OverlayCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    /// The compute function failed.
    #[error("layer computation failed: {0}")]
    Compute(String),

    /// The layer could not be emitted.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// The spawned computation panicked or was aborted.
    #[error("layer computation task failed: {0}")]
    TaskFailed(String),
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined an in-flight computation.
    pub coalesced: u64,
    pub evictions: u64,
}

type LayerResult = Result<Arc<LayerDescriptor>, OverlayError>;
type PendingLayer = Shared<BoxFuture<'static, LayerResult>>;

struct Entry {
    layer: Arc<LayerDescriptor>,
    inserted_at: Instant,
    last_used_tick: u64,
}

#[derive(Default)]
struct Inner {
    tick: u64,
    entries: BTreeMap<OverlayKey, Entry>,
    pending: BTreeMap<OverlayKey, PendingLayer>,
    /// Newest data version seen per region.
    latest_versions: BTreeMap<String, u64>,
    stats: CacheStats,
}

enum Lookup<F> {
    Hit(Arc<LayerDescriptor>),
    Wait(PendingLayer),
    /// Superseded data version: compute without caching.
    Stale(F),
}

impl Inner {
    /// Records `version` for `region`, purging older entries when it is new.
    /// Returns `true` if `version` is older than one already seen.
    fn observe_version(&mut self, region: &str, version: u64) -> bool {
        match self.latest_versions.get(region).copied() {
            Some(latest) if version < latest => true,
            Some(latest) if version == latest => false,
            _ => {
                self.latest_versions.insert(region.to_string(), version);
                let before = self.entries.len();
                self.entries
                    .retain(|key, _| key.region_id != region || key.data_version >= version);
                let purged = before - self.entries.len();
                if purged > 0 {
                    log::debug!("Purged {purged} layers of {region} older than version {version}");
                }
                false
            }
        }
    }

    fn hit(&mut self, key: &OverlayKey, ttl: Duration) -> Option<Arc<LayerDescriptor>> {
        let expired = self.entries.get(key)?.inserted_at.elapsed() >= ttl;
        if expired {
            log::debug!("Layer {key:?} expired");
            self.entries.remove(key);
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        entry.last_used_tick = tick;
        self.stats.hits += 1;
        Some(Arc::clone(&entry.layer))
    }

    fn finish(&mut self, key: OverlayKey, result: &LayerResult, capacity: usize) {
        self.pending.remove(&key);

        let layer = match result {
            Ok(layer) => layer,
            Err(e) => {
                log::warn!("Layer {key:?} failed, not caching: {e}");
                return;
            }
        };

        let superseded = self
            .latest_versions
            .get(&key.region_id)
            .is_some_and(|latest| key.data_version < *latest);
        if superseded || capacity == 0 {
            return;
        }

        self.tick += 1;
        self.entries.insert(
            key,
            Entry {
                layer: Arc::clone(layer),
                inserted_at: Instant::now(),
                last_used_tick: self.tick,
            },
        );

        while self.entries.len() > capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used_tick)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            log::debug!("Evicting layer {oldest:?}");
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }
}

/// A shared, cloneable cache of layer descriptors.
#[derive(Clone)]
pub struct OverlayCache {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    ttl: Duration,
}

impl std::fmt::Debug for OverlayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for OverlayCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl OverlayCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity,
            ttl,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached layer for `key`, joins an in-flight computation
    /// for it, or spawns `compute` and caches its result.
    ///
    /// A key whose data version is older than one already seen for its
    /// region is computed directly and never cached.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the computation's [`OverlayError`]. Failures are shared by
    /// every caller waiting on the same key and are not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: OverlayKey, compute: F) -> LayerResult
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<LayerDescriptor, OverlayError>> + Send + 'static,
    {
        let lookup = {
            let mut inner = self.lock();
            if inner.observe_version(&key.region_id, key.data_version) {
                Lookup::Stale(compute)
            } else if let Some(layer) = inner.hit(&key, self.ttl) {
                Lookup::Hit(layer)
            } else if let Some(pending) = inner.pending.get(&key).cloned() {
                inner.stats.coalesced += 1;
                Lookup::Wait(pending)
            } else {
                inner.stats.misses += 1;
                let pending = self.spawn(key.clone(), compute);
                inner.pending.insert(key.clone(), pending.clone());
                Lookup::Wait(pending)
            }
        };

        match lookup {
            Lookup::Hit(layer) => Ok(layer),
            Lookup::Wait(pending) => pending.await,
            Lookup::Stale(compute) => {
                log::debug!("Computing superseded layer {key:?} without caching");
                compute().await.map(Arc::new)
            }
        }
    }

    /// Records a region's current data version, purging older layers.
    pub fn observe_version(&self, region_id: &str, data_version: u64) {
        self.lock().observe_version(region_id, data_version);
    }

    /// Drops every cached layer of a region.
    pub fn invalidate_region(&self, region_id: &str) {
        let mut inner = self.lock();
        inner.entries.retain(|key, _| key.region_id != region_id);
        inner.latest_versions.remove(region_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            in_flight: inner.pending.len(),
            ..inner.stats
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F, Fut>(&self, key: OverlayKey, compute: F) -> PendingLayer
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<LayerDescriptor, OverlayError>> + Send + 'static,
    {
        let capacity = self.capacity;
        let guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            key: Some(key.clone()),
        };

        let handle = tokio::spawn(async move {
            let result = compute().await.map(Arc::new);
            guard.finish(&result, capacity);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                log::error!("Layer task for {key:?} failed: {e}");
                Err(OverlayError::TaskFailed(e.to_string()))
            })
        }
        .boxed()
        .shared()
    }
}

/// Owned by a spawned computation. Unregisters the pending entry if the task
/// panics or is cancelled before it finishes, even with no caller waiting.
struct PendingGuard {
    inner: Arc<Mutex<Inner>>,
    key: Option<OverlayKey>,
}

impl PendingGuard {
    fn finish(mut self, result: &LayerResult, capacity: usize) {
        if let Some(key) = self.key.take() {
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finish(key, result, capacity);
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            log::warn!("Layer task for {key:?} ended without a result");
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pending
                .remove(&key);
        }
    }
}
