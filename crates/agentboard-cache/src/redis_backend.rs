use std::time::Duration;

use agentboard_core::{AgentboardError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;
use tracing::{debug, info};

use crate::backend::{BackendStats, CacheBackend};
use crate::key::namespace_of;

const SCAN_COUNT: usize = 500;

fn backend_error(context: &str, e: redis::RedisError) -> AgentboardError {
    AgentboardError::Cache(format!("{context}: {e}"))
}

/// Escape glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
pub fn escape_glob(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Redis-backed cache. Every key is stored under `{key_prefix}:`.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| backend_error("redis client open", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| backend_error("redis connect", e))?;
        let mut conn = manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("redis ping", e))?;
        info!("Connected to Redis cache at {}", url);
        Ok(Self {
            manager,
            prefix: key_prefix.trim().trim_end_matches(':').to_string(),
        })
    }

    fn scoped(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    fn unscoped<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&format!("{}:", self.prefix)).unwrap_or(key)
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.scoped(prefix)));
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_error("redis scan", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        let mut conn = self.manager.clone();
        let mut removed = 0usize;
        for chunk in keys.chunks(SCAN_COUNT) {
            let n: i64 = conn
                .del(chunk)
                .await
                .map_err(|e| backend_error("redis del", e))?;
            removed += n.max(0) as usize;
        }
        Ok(removed)
    }
}

/// `field:value` lines of an `INFO` section.
fn parse_info(info: &str) -> serde_json::Map<String, serde_json::Value> {
    info.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(k, v)| {
            let value = v
                .parse::<i64>()
                .map(serde_json::Value::from)
                .unwrap_or_else(|_| serde_json::Value::from(v));
            (k.to_string(), value)
        })
        .collect()
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(self.scoped(key))
            .await
            .map_err(|e| backend_error("redis get", e))
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.scoped(key), payload, secs)
            .await
            .map_err(|e| backend_error("redis set_ex", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let n: i64 = conn
            .del(self.scoped(key))
            .await
            .map_err(|e| backend_error("redis del", e))?;
        Ok(n > 0)
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.scan(prefix).await?;
        let removed = self.delete_keys(&keys).await?;
        debug!("Invalidated {} redis keys under {}", removed, prefix);
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize> {
        self.invalidate_prefix("").await
    }

    async fn stats(&self) -> Result<BackendStats> {
        let keys = self.scan("").await?;
        let mut stats = BackendStats {
            entries: keys.len(),
            ..BackendStats::default()
        };
        for key in &keys {
            *stats
                .namespaces
                .entry(namespace_of(self.unscoped(key)).to_string())
                .or_insert(0) += 1;
        }

        let mut conn = self.manager.clone();
        let dbsize: i64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("redis dbsize", e))?;
        let info: String = redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("redis info", e))?;
        let info = parse_info(&info);
        stats.server = Some(json!({
            "dbsize": dbsize,
            "keyspace_hits": info.get("keyspace_hits"),
            "keyspace_misses": info.get("keyspace_misses"),
            "expired_keys": info.get("expired_keys"),
            "evicted_keys": info.get("evicted_keys"),
        }));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_glob_characters() {
        assert_eq!(escape_glob("app:agents:"), "app:agents:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn parses_info_sections() {
        let info = "# Stats\r\nkeyspace_hits:42\r\nkeyspace_misses:8\r\nrole:master\r\n";
        let parsed = parse_info(info);
        assert_eq!(parsed["keyspace_hits"], 42);
        assert_eq!(parsed["keyspace_misses"], 8);
        assert_eq!(parsed["role"], "master");
    }
}
