use std::sync::Arc;
use std::time::Duration;

use agentboard_core::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::backend::{BackendStats, CacheBackend, CacheEntry};
use crate::key::namespace_of;

/// In-process TTL cache. Expired entries are dropped lazily on read and by
/// [`CacheBackend::purge_expired`]; there is no access-based eviction.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.payload.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            debug!("Cache expired for {}", key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(payload, ttl));
        debug!("Cached {} for {:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn clear(&self) -> Result<usize> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let mut stats = BackendStats::default();
        for entry in self.entries.iter() {
            stats.entries += 1;
            if entry.value().is_expired() {
                stats.expired_entries += 1;
            }
            stats.approx_bytes += (entry.key().len() + entry.value().payload.len()) as u64;
            *stats
                .namespaces
                .entry(namespace_of(entry.key()).to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        Ok(removed)
    }
}
