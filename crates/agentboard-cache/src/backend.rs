use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use agentboard_core::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Storage behind [`crate::DocumentCache`]. Keys are rendered [`crate::CacheKey`]s and
/// payloads are JSON text.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

    async fn clear(&self) -> Result<usize>;

    async fn stats(&self) -> Result<BackendStats>;

    /// Drop expired entries; backends with native expiry have nothing to do.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// A cached payload with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: String,
    pub created_at: Instant,
    pub cached_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: String, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: Instant::now(),
            cached_at: SystemTime::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub approx_bytes: u64,
    /// Entry count per key namespace.
    pub namespaces: BTreeMap<String, usize>,
    /// Backend-specific server information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Value>,
}
