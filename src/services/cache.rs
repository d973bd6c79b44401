//! Robot status cache — short-TTL presence store.
//!
//! DESIGN
//! ======
//! One contract, two backends: a redis instance with pipelined writes and a
//! native online set, or an in-process map with `(value, expire_time)`
//! entries and lazy expiry. Backend choice happens once at startup and no
//! backend-specific operation leaks out of this module.
//!
//! Keys: `robot:status:{robot_id}` holds the serialized record with the
//! entry TTL; the `robots:online` set carries twice that TTL so the set
//! outlives any individual member entry.
//!
//! Backend errors never propagate: a failed read counts as a miss, a failed
//! write is logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::now_epoch_secs;

pub const ROBOT_STATUS_PREFIX: &str = "robot:status:";
pub const ONLINE_ROBOTS_KEY: &str = "robots:online";

// =============================================================================
// TYPES
// =============================================================================

/// Cached presence record for one robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotStatus {
    pub robot_id: String,
    pub status: serde_json::Value,
    pub last_seen: f64,
    pub session_id: Option<i64>,
}

/// Cumulative counters reported by `health()`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub healthy: bool,
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    updates: AtomicU64,
    evictions: AtomicU64,
}

// =============================================================================
// IN-PROCESS BACKEND
// =============================================================================

/// Fallback map backend: `key -> (value, expire_time)`, lazy expiry.
struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_owned(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    /// Prefix scan. Expired entries are purged on the way through.
    async fn list_keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires)| *expires > now);
        entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect()
    }

    async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        keys.iter()
            .map(|key| match entries.get(key) {
                Some((value, expires)) if *expires > now => Some(value.clone()),
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            })
            .collect()
    }
}

enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryCache),
}

// =============================================================================
// SERVICE
// =============================================================================

pub struct CacheService {
    backend: Backend,
    default_ttl: Duration,
    counters: CacheCounters,
}

impl CacheService {
    /// Connect to redis when a URL is configured and reachable; fall back to
    /// the in-process map otherwise.
    pub async fn new(redis_url: Option<&str>, default_ttl: Duration) -> Self {
        if let Some(url) = redis_url {
            match Self::connect_redis(url).await {
                Ok(manager) => {
                    info!("redis status cache initialized");
                    return Self { backend: Backend::Redis(manager), default_ttl, counters: CacheCounters::default() };
                }
                Err(e) => {
                    warn!(error = %e, "redis unavailable; falling back to in-process cache");
                }
            }
        }
        Self::in_memory(default_ttl)
    }

    /// In-process backend, used as the fallback and by tests.
    #[must_use]
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self { backend: Backend::Memory(MemoryCache::new()), default_ttl, counters: CacheCounters::default() }
    }

    async fn connect_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        Ok(manager)
    }

    fn status_key(robot_id: &str) -> String {
        format!("{ROBOT_STATUS_PREFIX}{robot_id}")
    }

    /// Write a robot's presence record and refresh the online set.
    pub async fn update(
        &self,
        robot_id: &str,
        status: serde_json::Value,
        session_id: Option<i64>,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let record = RobotStatus { robot_id: robot_id.to_owned(), status, last_seen: now_epoch_secs(), session_id };
        let Ok(payload) = serde_json::to_string(&record) else {
            return;
        };
        let key = Self::status_key(robot_id);

        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let result: Result<(), redis::RedisError> = redis::pipe()
                    .set_ex(&key, &payload, ttl.as_secs().max(1))
                    .ignore()
                    .sadd(ONLINE_ROBOTS_KEY, robot_id)
                    .ignore()
                    .expire(ONLINE_ROBOTS_KEY, i64::try_from(ttl.as_secs().max(1) * 2).unwrap_or(i64::MAX))
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = result {
                    warn!(robot_id, error = %e, "cache update failed");
                    return;
                }
            }
            Backend::Memory(cache) => {
                cache.set(&key, payload, ttl).await;
                let mut online: Vec<String> = cache
                    .get(ONLINE_ROBOTS_KEY)
                    .await
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default();
                if !online.iter().any(|id| id == robot_id) {
                    online.push(robot_id.to_owned());
                }
                if let Ok(raw) = serde_json::to_string(&online) {
                    cache.set(ONLINE_ROBOTS_KEY, raw, ttl * 2).await;
                }
            }
        }

        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        debug!(robot_id, session_id, ttl_secs = ttl.as_secs_f64(), "robot status updated");
    }

    /// Read one robot's presence record. Misses (including backend errors)
    /// increment the miss counter.
    pub async fn get(&self, robot_id: &str) -> Option<RobotStatus> {
        let key = Self::status_key(robot_id);
        let raw = match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.get::<_, Option<String>>(&key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(robot_id, error = %e, "cache get failed");
                        None
                    }
                }
            }
            Backend::Memory(cache) => cache.get(&key).await,
        };

        match raw.and_then(|data| serde_json::from_str::<RobotStatus>(&data).ok()) {
            Some(status) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(status)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Ids currently in the online set.
    pub async fn list_online(&self) -> Vec<String> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.smembers::<_, Vec<String>>(ONLINE_ROBOTS_KEY).await {
                    Ok(members) => members,
                    Err(e) => {
                        warn!(error = %e, "cache smembers failed");
                        Vec::new()
                    }
                }
            }
            Backend::Memory(cache) => cache
                .get(ONLINE_ROBOTS_KEY)
                .await
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default(),
        }
    }

    /// Presence records for the whole online set in one backend round trip.
    pub async fn list_online_statuses(&self) -> Vec<RobotStatus> {
        let robot_ids = self.list_online().await;
        if robot_ids.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> = robot_ids.iter().map(|id| Self::status_key(id)).collect();

        let values: Vec<Option<String>> = match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.mget::<_, Vec<Option<String>>>(&keys).await {
                    Ok(values) => values,
                    Err(e) => {
                        warn!(error = %e, "cache mget failed");
                        return Vec::new();
                    }
                }
            }
            Backend::Memory(cache) => {
                // Prefix sweep doubles as the lazy-expiry pass.
                cache.list_keys(ROBOT_STATUS_PREFIX).await;
                cache.mget(&keys).await
            }
        };

        values
            .into_iter()
            .flatten()
            .filter_map(|data| serde_json::from_str(&data).ok())
            .collect()
    }

    /// Drop a robot's record and its online-set membership.
    pub async fn remove(&self, robot_id: &str) -> bool {
        let key = Self::status_key(robot_id);
        let removed = match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let result: Result<(i64,), redis::RedisError> = redis::pipe()
                    .del(&key)
                    .srem(ONLINE_ROBOTS_KEY, robot_id)
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                match result {
                    Ok((deleted,)) => deleted > 0,
                    Err(e) => {
                        warn!(robot_id, error = %e, "cache remove failed");
                        false
                    }
                }
            }
            Backend::Memory(cache) => {
                let removed = cache.delete(&key).await;
                if let Some(raw) = cache.get(ONLINE_ROBOTS_KEY).await {
                    if let Ok(mut online) = serde_json::from_str::<Vec<String>>(&raw) {
                        online.retain(|id| id != robot_id);
                        if let Ok(raw) = serde_json::to_string(&online) {
                            cache.set(ONLINE_ROBOTS_KEY, raw, self.default_ttl * 2).await;
                        }
                    }
                }
                removed
            }
        };

        if removed {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(robot_id, "robot status removed");
        }
        removed
    }

    /// Remove every online robot whose record points at `session_id`.
    /// Returns how many were invalidated.
    pub async fn invalidate_session(&self, session_id: i64) -> usize {
        let statuses = self.list_online_statuses().await;
        let mut count = 0;
        for status in statuses {
            if status.session_id == Some(session_id) {
                self.remove(&status.robot_id).await;
                count += 1;
            }
        }
        if count > 0 {
            info!(session_id, count, "session cache invalidated");
        }
        count
    }

    /// Backend kind, liveness, and cumulative counters.
    pub async fn health(&self) -> CacheHealth {
        let (backend, healthy) = match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let alive = redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok();
                ("redis", alive)
            }
            Backend::Memory(_) => ("memory", true),
        };

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheHealth {
            backend,
            healthy,
            hits,
            misses,
            updates: self.counters.updates.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
