//! Counter store backends.
//!
//! Every admission decision in the service reads and writes small counters
//! and JSON records through the [`CounterStore`] trait:
//! - Redis for distributed, production use
//! - In-memory for development and single-instance deployments

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Storage operations shared by the rate limiter, quota enforcer and abuse guard.
///
/// Increments are atomic in both backends so concurrent requests against the
/// same key never undercount.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Get the raw value stored under a key
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value with a TTL in seconds
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Atomically add `delta` to the integer stored under `key`, creating it
    /// at zero first, and return the new value
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Atomically increment a counter by one
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.incr_by(key, 1).await
    }

    /// Set a TTL in seconds on an existing key
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key matching a glob pattern (only `*` is supported)
    /// and return how many were removed
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Drop expired entries (no-op for Redis) and return how many were removed
    async fn cleanup(&self) -> Result<u64, StoreError>;
}

/// Redis storage backend
pub struct RedisCounterStore {
    connection_manager: Arc<ConnectionManager>,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the connection with a ping
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError(format!("failed to create Redis client: {}", e)))?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError(format!("failed to create connection manager: {}", e)))?;

        let mut conn = connection_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("failed to ping Redis: {}", e)))?;

        debug!("Connected to Redis counter store");

        Ok(Self {
            connection_manager: Arc::new(connection_manager),
        })
    }

    fn conn(&self) -> ConnectionManager {
        (*self.connection_manager).clone()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();

        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("Redis GET error: {}", e)))?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();

        let _: String = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("Redis SET error: {}", e)))?;

        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn();

        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("Redis INCRBY error: {}", e)))?;

        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();

        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("Redis EXPIRE error: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();

        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError(format!("Redis DEL error: {}", e)))?;

        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError(format!("Redis SCAN error: {}", e)))?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                for key in &keys {
                    del.arg(key);
                }
                let count: i64 = del
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StoreError(format!("Redis DEL error: {}", e)))?;
                removed += count as u64;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        // Redis expires keys on its own
        Ok(0)
    }
}

/// In-memory storage entry with optional expiration
#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl MemoryEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// In-memory storage backend for development and tests
pub struct InMemoryCounterStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        let now = Self::now_ms();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at_ms: Some(Self::now_ms() + ttl_secs * 1000),
            },
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Self::now_ms();

        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let parsed: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError(format!("value under '{}' is not an integer", key)))?;
                Some((parsed, entry.expires_at_ms))
            }
            _ => None,
        };

        match current {
            Some((value, expires_at_ms)) => {
                let next = value + delta;
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: next.to_string(),
                        expires_at_ms,
                    },
                );
                Ok(next)
            }
            None => {
                // Fresh counters carry no TTL until expire() is called,
                // mirroring Redis INCR
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: delta.to_string(),
                        expires_at_ms: None,
                    },
                );
                Ok(delta)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let now = Self::now_ms();

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at_ms = Some(now + ttl_secs * 1000);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - entries.len()) as u64)
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Self::now_ms();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = (before - entries.len()) as u64;

        debug!(removed, "Completed counter store cleanup");
        Ok(removed)
    }
}

/// Store stub whose every operation fails, for exercising fail-open paths
#[cfg(test)]
pub struct FailingStore;

#[cfg(test)]
#[async_trait]
impl CounterStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn incr_by(&self, _key: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
        Err(StoreError("store is down".to_string()))
    }
    async fn cleanup(&self) -> Result<u64, StoreError> {
        Err(StoreError("store is down".to_string()))
    }
}

/// Wildcard matcher for `delete_by_pattern`; `*` matches any run of characters
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let mut p = 0;
    let mut t = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < txt.len() {
        if p < pat.len() && pat[p] != '*' && pat[p] == txt[t] {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}
