use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentboard_core::{CacheBackendKind, CacheSettings};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::key::CacheKey;
use crate::memory::MemoryBackend;
use crate::redis_backend::RedisBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Error => "error",
        }
    }
}

/// Receives every lookup outcome, e.g. to feed metrics.
pub trait CacheObserver: Send + Sync {
    fn record(&self, namespace: &str, outcome: CacheOutcome);
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: String,
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub approx_bytes: u64,
    pub namespaces: BTreeMap<String, usize>,
    pub default_ttl_secs: u64,
    pub ttl_overrides: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Value>,
}

impl CacheStats {
    pub fn hit_rate(hits: u64, misses: u64) -> f64 {
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }
}

/// Read-through JSON cache over a [`CacheBackend`] with per-namespace TTLs.
///
/// Backend failures never surface to callers: lookups degrade to misses and
/// writes are dropped, both counted as errors.
pub struct DocumentCache {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    default_ttl: Duration,
    ttl_overrides: HashMap<String, Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("backend", &self.backend.name())
            .field("enabled", &self.enabled)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl DocumentCache {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: &CacheSettings) -> Self {
        Self {
            backend,
            enabled: settings.enabled,
            default_ttl: settings.default_ttl_duration(),
            ttl_overrides: settings
                .ttl_overrides
                .iter()
                .map(|(ns, secs)| (ns.clone(), Duration::from_secs(*secs)))
                .collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            observer: None,
        }
    }

    pub fn memory(settings: &CacheSettings) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), settings)
    }

    /// Build the configured backend. An unreachable Redis falls back to memory.
    pub async fn from_settings(settings: &CacheSettings) -> Self {
        if !settings.enabled {
            info!("Document cache disabled");
            return Self::memory(settings);
        }
        match settings.backend {
            CacheBackendKind::Memory => {
                info!("Using in-memory document cache");
                Self::memory(settings)
            }
            CacheBackendKind::Redis => {
                match RedisBackend::connect(&settings.redis_url, &settings.key_prefix).await {
                    Ok(backend) => Self::new(Arc::new(backend), settings),
                    Err(e) => {
                        warn!(
                            "Redis cache unavailable ({}); falling back to in-memory cache",
                            e
                        );
                        Self::memory(settings)
                    }
                }
            }
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.ttl_overrides
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    fn record(&self, key: &CacheKey, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Miss => &self.misses,
            CacheOutcome::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(observer) = &self.observer {
            observer.record(key.namespace(), outcome);
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let rendered = key.to_string();
        match self.backend.get(&rendered).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(value) => {
                    debug!("Cache hit for {}", rendered);
                    self.record(key, CacheOutcome::Hit);
                    Some(value)
                }
                Err(e) => {
                    warn!("Dropping undecodable cache entry {}: {}", rendered, e);
                    if let Err(e) = self.backend.delete(&rendered).await {
                        warn!("Cache delete failed for {}: {}", rendered, e);
                    }
                    self.record(key, CacheOutcome::Miss);
                    None
                }
            },
            Ok(None) => {
                self.record(key, CacheOutcome::Miss);
                None
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", rendered, e);
                self.record(key, CacheOutcome::Error);
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) {
        let ttl = self.ttl_for(key.namespace());
        self.set_with_ttl(key, value, ttl).await;
    }

    pub async fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) {
        if !self.enabled {
            return;
        }
        let rendered = key.to_string();
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot serialize cache value for {}: {}", rendered, e);
                return;
            }
        };
        if let Err(e) = self.backend.set(&rendered, payload, ttl).await {
            warn!("Cache write failed for {}: {}", rendered, e);
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return the cached value, or run `fetch`, cache its result and return it.
    ///
    /// Errors from `fetch` are returned as-is and never cached.
    pub async fn get_or_try_insert_with<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }
        let started = Instant::now();
        let value = fetch().await?;
        debug!("Computed {} in {:?}", key, started.elapsed());
        self.set(key, &value).await;
        Ok(value)
    }

    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        match self.backend.delete(&key.to_string()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache invalidate failed for {}: {}", key, e);
                self.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Drop every entry of `namespace`.
    pub async fn invalidate_namespace(&self, namespace: &str) -> usize {
        let prefix = CacheKey::namespace_prefix(namespace);
        match self.backend.invalidate_prefix(&prefix).await {
            Ok(count) => {
                info!("Invalidated {} cache entries for {}", count, namespace);
                count
            }
            Err(e) => {
                warn!("Cache invalidation failed for {}: {}", namespace, e);
                self.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub async fn clear(&self) -> usize {
        match self.backend.clear().await {
            Ok(count) => {
                info!("Cleared entire cache ({} entries)", count);
                count
            }
            Err(e) => {
                warn!("Cache clear failed: {}", e);
                self.errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Cache purge failed: {}", e);
                0
            }
        }
    }

    /// Round-trip check of the backend.
    pub async fn ping(&self) -> agentboard_core::Result<()> {
        self.backend.get("__ping__").await.map(|_| ())
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let backend = match self.backend.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Cache stats unavailable: {}", e);
                Default::default()
            }
        };
        CacheStats {
            backend: self.backend.name().to_string(),
            enabled: self.enabled,
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: CacheStats::hit_rate(hits, misses),
            entries: backend.entries,
            expired_entries: backend.expired_entries,
            active_entries: backend.entries.saturating_sub(backend.expired_entries),
            approx_bytes: backend.approx_bytes,
            namespaces: backend.namespaces,
            default_ttl_secs: self.default_ttl.as_secs(),
            ttl_overrides: self
                .ttl_overrides
                .iter()
                .map(|(ns, ttl)| (ns.clone(), ttl.as_secs()))
                .collect(),
            server: backend.server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn cache() -> DocumentCache {
        DocumentCache::memory(&CacheSettings::default())
    }

    #[tokio::test]
    async fn read_through_caches_results() {
        let cache = cache();
        let key = CacheKey::new("agents", "status");
        let mut calls = 0;

        let first: Result<Value, String> = cache
            .get_or_try_insert_with(&key, || {
                calls += 1;
                async { Ok(json!({"agents": 3})) }
            })
            .await;
        assert_eq!(first.unwrap()["agents"], 3);

        let second: Result<Value, String> = cache
            .get_or_try_insert_with(&key, || async { Ok(json!({"agents": 99})) })
            .await;
        assert_eq!(second.unwrap()["agents"], 3);
        assert_eq!(calls, 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_relative_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = cache();
        let key = CacheKey::new("documents", "list");
        let failed: Result<Value, String> = cache
            .get_or_try_insert_with(&key, || async { Err("boom".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.get::<Value>(&key).await.is_none());
    }

    #[tokio::test]
    async fn ttl_policy_uses_overrides() {
        let cache = cache();
        assert_eq!(cache.ttl_for("agents"), Duration::from_secs(30));
        assert_eq!(cache.ttl_for("agent_details"), Duration::from_secs(60));
        assert_eq!(cache.ttl_for("anything"), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn namespace_invalidation() {
        let cache = cache();
        cache.set(&CacheKey::new("agents", "status"), &json!(1)).await;
        cache
            .set(&CacheKey::new("agents", "details").with_params(&json!({"name": "a"})), &json!(2))
            .await;
        cache.set(&CacheKey::new("system_inbox", "list"), &json!(3)).await;

        assert_eq!(cache.invalidate_namespace("agents").await, 2);
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.namespaces.get("system_inbox"), Some(&1));
        assert_eq!(cache.clear().await, 1);
    }

    #[tokio::test]
    async fn disabled_cache_passes_through() {
        let settings = CacheSettings {
            enabled: false,
            ..CacheSettings::default()
        };
        let cache = DocumentCache::from_settings(&settings).await;
        let key = CacheKey::new("agents", "status");
        cache.set(&key, &json!(1)).await;
        assert!(cache.get::<Value>(&key).await.is_none());
        assert!(!cache.stats().await.enabled);
    }

    struct Counting(parking_lot::Mutex<Vec<(String, CacheOutcome)>>);

    impl CacheObserver for Counting {
        fn record(&self, namespace: &str, outcome: CacheOutcome) {
            self.0.lock().push((namespace.to_string(), outcome));
        }
    }

    #[tokio::test]
    async fn observer_sees_outcomes() {
        let observer = Arc::new(Counting(parking_lot::Mutex::new(Vec::new())));
        let cache = cache().with_observer(observer.clone());
        let key = CacheKey::new("agents", "status");
        assert!(cache.get::<Value>(&key).await.is_none());
        cache.set(&key, &json!(1)).await;
        assert_eq!(cache.get::<Value>(&key).await, Some(json!(1)));

        let seen = observer.0.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("agents".to_string(), CacheOutcome::Miss),
                ("agents".to_string(), CacheOutcome::Hit)
            ]
        );
    }
}
