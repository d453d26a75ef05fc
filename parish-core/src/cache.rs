//! Result-set cache with synchronous, generation-checked invalidation.
//!
//! Entries are keyed by (tenant, collection, pagination window) and tagged
//! with their (tenant, collection) scope. Each scope has a generation counter:
//!
//! - every entry records the generation it was read under;
//! - [`ResultCache::invalidate`] bumps the generation and purges the scope's
//!   entries from the backend before returning;
//! - [`ResultCache::read_through`] captures the generation before fetching and
//!   only stores the result if no invalidation happened meanwhile.
//!
//! A read that races a write can therefore never put pre-write data back
//! into the cache.
//!
//! Generations come from one process-wide counter. Scopes without their own
//! generation share a floor value; once `max_scopes` scopes are tracked the
//! map is cleared and the floor raised to the newest generation, which makes
//! every older entry a miss instead of letting the map grow without bound.
//!
//! # Example
//!
//! ```rust,ignore
//! use parish_core::cache::{ResultCache, MemoryCache};
//!
//! let cache = ResultCache::new(MemoryCache::new(10_000), CacheConfig::default());
//! let page = cache
//!     .read_through(&tenant, Collection::Members(group.clone()), window, || {
//!         store.list_members(&conn, &group, window)
//!     })
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::error::{TenantError, TenantResult};
use crate::model::{Collection, Window};
use crate::tenant::TenantId;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for TenantError {
    fn from(err: CacheError) -> Self {
        TenantError::cache(err.to_string()).with_source(err)
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key of one cached result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: TenantId,
    collection: Collection,
    window: Window,
}

impl CacheKey {
    /// Key for a page of `collection`.
    pub fn new(tenant: &TenantId, collection: Collection, window: Window) -> Self {
        Self {
            tenant: tenant.clone(),
            collection,
            window,
        }
    }

    /// The scope tag shared by every window of this collection.
    pub fn tag(&self) -> String {
        scope_tag(&self.tenant, &self.collection)
    }

    /// Backend key string.
    pub fn as_str(&self) -> String {
        format!("parish:{}:{}:{}", self.tenant, self.collection, self.window)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

fn scope_tag(tenant: &TenantId, collection: &Collection) -> String {
    format!("{}:{}", tenant, collection)
}

/// A stored result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedValue {
    /// Serialized result.
    pub value: serde_json::Value,
    /// Scope generation the value was read under.
    pub generation: u64,
}

/// Storage for cached result sets.
pub trait CacheBackend: Send + Sync + 'static {
    /// Get an entry.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<CachedValue>>> + Send;

    /// Store an entry under `tag`.
    fn set(
        &self,
        key: &str,
        value: CachedValue,
        tag: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Remove every entry stored under `tag`. Returns how many were removed.
    fn invalidate_tag(&self, tag: &str) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Check if empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryEntry {
    value: CachedValue,
    tag: String,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process cache backend with TTL and a size bound.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    tags: RwLock<HashMap<String, HashSet<String>>>,
    max_entries: usize,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn remove_key(&self, entries: &mut HashMap<String, MemoryEntry>, key: &str) {
        if let Some(entry) = entries.remove(key) {
            let mut tags = self.tags.write();
            if let Some(keys) = tags.get_mut(&entry.tag) {
                keys.remove(key);
                if keys.is_empty() {
                    tags.remove(&entry.tag);
                }
            }
        }
    }

    fn evict(&self, entries: &mut HashMap<String, MemoryEntry>) {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove_key(entries, &key);
        }

        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => self.remove_key(entries, &key),
                None => break,
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        let mut entries = self.entries.write();
        self.remove_key(&mut entries, key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        tag: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            self.evict(&mut entries);
        }
        let now = Instant::now();
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                tag: tag.to_string(),
                inserted_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        self.tags
            .write()
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> CacheResult<u64> {
        let mut entries = self.entries.write();
        let keys = self.tags.write().remove(tag).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether reads are served from the cache.
    pub enabled: bool,
    /// Lifetime of an entry.
    pub ttl: Duration,
    /// Scopes whose generation is tracked individually.
    pub max_scopes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60),
            max_scopes: 10_000,
        }
    }
}

/// Per-scope generations over a shared floor.
#[derive(Default)]
struct Generations {
    scopes: HashMap<String, u64>,
    floor: u64,
    latest: u64,
}

impl Generations {
    fn current(&self, tag: &str) -> u64 {
        self.scopes.get(tag).copied().unwrap_or(self.floor)
    }

    fn bump(&mut self, tag: &str, max_scopes: usize) {
        if self.scopes.len() >= max_scopes && !self.scopes.contains_key(tag) {
            debug!(scopes = self.scopes.len(), floor = self.latest, "Resetting cache generations");
            self.floor = self.latest;
            self.scopes.clear();
        }
        self.latest += 1;
        self.scopes.insert(tag.to_string(), self.latest);
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found but rejected for an outdated generation.
    pub stale: u64,
    /// Results not stored because an invalidation raced the read.
    pub discarded: u64,
    pub invalidations: u64,
    pub entries: usize,
}

#[derive(Default)]
struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    discarded: AtomicU64,
    invalidations: AtomicU64,
}

/// Tenant-scoped result cache.
pub struct ResultCache<B: CacheBackend = MemoryCache> {
    backend: B,
    config: CacheConfig,
    generations: Mutex<Generations>,
    stats: AtomicCacheStats,
}

impl<B: CacheBackend> ResultCache<B> {
    /// Create a cache over `backend`.
    pub fn new(backend: B, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            generations: Mutex::new(Generations::default()),
            stats: AtomicCacheStats::default(),
        }
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current generation of a (tenant, collection) scope.
    pub fn generation(&self, tenant: &TenantId, collection: &Collection) -> u64 {
        self.generations.lock().current(&scope_tag(tenant, collection))
    }

    /// Look up a cached page.
    ///
    /// Entries from an older generation are treated as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> TenantResult<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let current = self.generation(&key.tenant, &key.collection);
        match self.backend.get(&key.as_str()).await? {
            Some(cached) if cached.generation == current => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Cache hit");
                let value = serde_json::from_value(cached.value)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Some(_) => {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store a page read under `generation`.
    ///
    /// Returns `false` without storing if the scope was invalidated since.
    pub async fn put<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        generation: u64,
    ) -> TenantResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        if self.generation(&key.tenant, &key.collection) != generation {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.backend
            .set(
                &key.as_str(),
                CachedValue { value, generation },
                &key.tag(),
                Some(self.config.ttl),
            )
            .await?;

        // An invalidation may have landed while storing.
        if self.generation(&key.tenant, &key.collection) != generation {
            self.backend.invalidate_tag(&key.tag()).await?;
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        Ok(true)
    }

    /// Serve a page from the cache or fetch and store it.
    pub async fn read_through<T, F, Fut>(
        &self,
        tenant: &TenantId,
        collection: Collection,
        window: Window,
        fetch: F,
    ) -> TenantResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TenantResult<T>>,
    {
        let key = CacheKey::new(tenant, collection, window);
        match self.get(&key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache read failed; falling back to store"),
        }

        let generation = self.generation(&key.tenant, &key.collection);
        let value = fetch().await?;
        if let Err(e) = self.put(&key, &value, generation).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
        Ok(value)
    }

    /// Invalidate every cached page of a (tenant, collection) scope.
    ///
    /// The generation is bumped before the backend is purged, so stale
    /// entries stop being served even if the purge fails.
    pub async fn invalidate(&self, tenant: &TenantId, collection: &Collection) -> TenantResult<u64> {
        let tag = scope_tag(tenant, collection);
        self.generations
            .lock()
            .bump(&tag, self.config.max_scopes.max(1));
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        let removed = self.backend.invalidate_tag(&tag).await?;
        debug!(tenant_id = %tenant, collection = %collection, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Snapshot cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            entries: self.backend.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceId, ResourceKind};
    use pretty_assertions::assert_eq;

    fn tenant(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    fn members(t: &TenantId) -> Collection {
        Collection::Members(ResourceId::generate(ResourceKind::Group, t))
    }

    fn cache() -> ResultCache {
        ResultCache::new(MemoryCache::new(100), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_read_through_caches() {
        let cache = cache();
        let t = tenant("a");
        let coll = members(&t);

        let first: Vec<u32> = cache
            .read_through(&t, coll.clone(), Window::default(), || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        let second: Vec<u32> = cache
            .read_through(&t, coll.clone(), Window::default(), || async {
                panic!("should be served from cache")
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate_is_visible_immediately() {
        let cache = cache();
        let t = tenant("a");
        let coll = members(&t);

        let _: Vec<u32> = cache
            .read_through(&t, coll.clone(), Window::default(), || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        cache.invalidate(&t, &coll).await.unwrap();

        let after: Vec<u32> = cache
            .read_through(&t, coll.clone(), Window::default(), || async { Ok(vec![2, 3]) })
            .await
            .unwrap();
        assert_eq!(after, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_invalidate_covers_every_window() {
        let cache = cache();
        let t = tenant("a");
        let coll = members(&t);

        for offset in [0, 10, 20] {
            let key = CacheKey::new(&t, coll.clone(), Window::new(Some(offset), Some(10)));
            cache.put(&key, &vec![offset], 0).await.unwrap();
        }
        assert_eq!(cache.backend().len(), 3);

        let removed = cache.invalidate(&t, &coll).await.unwrap();
        assert_eq!(removed, 3);
        assert!(cache.backend().is_empty());
    }

    #[tokio::test]
    async fn test_racing_read_is_not_stored() {
        let cache = cache();
        let t = tenant("a");
        let coll = members(&t);
        let key = CacheKey::new(&t, coll.clone(), Window::default());

        let generation = cache.generation(&t, &coll);
        // A write lands between the read's fetch and its store.
        cache.invalidate(&t, &coll).await.unwrap();
        let stored = cache.put(&key, &vec![1, 2, 3], generation).await.unwrap();

        assert!(!stored);
        assert_eq!(cache.get::<Vec<u32>>(&key).await.unwrap(), None);
        assert_eq!(cache.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let cache = cache();
        let a = tenant("a");
        let b = tenant("b");
        let key_a = CacheKey::new(&a, Collection::Branches, Window::default());
        let key_b = CacheKey::new(&b, Collection::Branches, Window::default());
        cache.put(&key_a, &vec![1], 0).await.unwrap();
        cache.put(&key_b, &vec![2], 0).await.unwrap();

        cache.invalidate(&a, &Collection::Branches).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>(&key_a).await.unwrap(), None);
        assert_eq!(cache.get::<Vec<u32>>(&key_b).await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches() {
        let cache = ResultCache::new(
            MemoryCache::new(10),
            CacheConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let t = tenant("a");
        for expected in [1u32, 2] {
            let got: u32 = cache
                .read_through(&t, Collection::Branches, Window::default(), || async move {
                    Ok(expected)
                })
                .await
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_oldest() {
        let backend = MemoryCache::new(2);
        for i in 0..3u64 {
            backend
                .set(
                    &format!("k{}", i),
                    CachedValue {
                        value: serde_json::json!(i),
                        generation: 0,
                    },
                    "tag",
                    None,
                )
                .await
                .unwrap();
        }
        assert_eq!(backend.len(), 2);
        assert!(backend.get("k0").await.unwrap().is_none());
        assert!(backend.get("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_cache_ttl() {
        let backend = MemoryCache::new(10);
        backend
            .set(
                "k",
                CachedValue {
                    value: serde_json::json!(1),
                    generation: 0,
                },
                "tag",
                Some(Duration::from_millis(10)),
            )
            .await
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generation_map_is_bounded() {
        let cache = ResultCache::new(
            MemoryCache::new(100),
            CacheConfig {
                max_scopes: 3,
                ..Default::default()
            },
        );
        let t = tenant("a");
        let kept = members(&t);
        let warm: Vec<u32> = cache
            .read_through(&t, kept.clone(), Window::default(), || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(warm, vec![1]);

        for _ in 0..10 {
            cache.invalidate(&t, &members(&t)).await.unwrap();
        }
        assert!(cache.generations.lock().scopes.len() <= 3);

        // Entries cached before the reset are misses afterwards.
        let fresh: Vec<u32> = cache
            .read_through(&t, kept, Window::default(), || async { Ok(vec![2]) })
            .await
            .unwrap();
        assert_eq!(fresh, vec![2]);
    }

    #[tokio::test]
    async fn test_read_racing_reset_is_not_stored() {
        let cache = ResultCache::new(
            MemoryCache::new(100),
            CacheConfig {
                max_scopes: 1,
                ..Default::default()
            },
        );
        let t = tenant("a");
        let coll = members(&t);
        let key = CacheKey::new(&t, coll.clone(), Window::default());

        // Read starts, then its scope is invalidated and the map reset by
        // another scope's invalidation.
        let captured = cache.generation(&t, &coll);
        cache.invalidate(&t, &coll).await.unwrap();
        cache.invalidate(&t, &Collection::Branches).await.unwrap();

        assert!(!cache.put(&key, &vec![1u32], captured).await.unwrap());
        assert_eq!(cache.get::<Vec<u32>>(&key).await.unwrap(), None);
    }
}
