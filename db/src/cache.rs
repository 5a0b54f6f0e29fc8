// Reyestr
// Copyright (c) 2024 Reyestr Labs
// Licensed and distributed under either of
//   * MIT license (license terms in the root directory or at http://opensource.org/licenses/MIT).
//   * Apache v2 license (license terms in the root directory or at http://www.apache.org/licenses/LICENSE-2.0).
// at your option. This file may not be copied, modified, or distributed except according to those terms.

//! Optional Redis read-through cache for the dashboard read paths.
//!
//! The cache is a sidecar: every error is logged and swallowed, a miss or an
//! unreachable server simply falls through to the store, and writers
//! invalidate matching keys after their transaction commits. Staleness is
//! bounded by one TTL.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use reyestr_lib::TaskStatus;

/// Per-family TTLs, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub tasks: u64,
    pub statistics: u64,
    pub documents: u64,
}

impl Default for CacheTtl {
    fn default() -> Self {
        CacheTtl {
            tasks: 10,
            statistics: 30,
            documents: 60,
        }
    }
}

#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
    pub ttl: CacheTtl,
}

// Canonical keys
// ----------------------------------------------------------------

pub fn task_list_key(status_filter: Option<TaskStatus>, limit: usize) -> String {
    let filter = status_filter.map_or("all", |status| status.as_str());
    format!("tasks:{filter}:{limit}")
}

pub fn tasks_summary_key() -> String {
    "tasks:summary".to_string()
}

pub fn worker_statistics_key(worker_id: Uuid) -> String {
    format!("worker:{worker_id}:statistics")
}

pub fn document_key(system_id: Uuid) -> String {
    format!("document:{system_id}")
}

impl Cache {
    /// A disabled cache; every call is a no-op.
    pub fn disabled() -> Self {
        Cache {
            conn: None,
            ttl: CacheTtl::default(),
        }
    }

    /// Connect to Redis. Errors bubble up so the host can decide whether a
    /// missing cache is fatal.
    pub async fn connect(url: &str, ttl: CacheTtl) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Cache {
            conn: Some(conn),
            ttl,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!("Dropping undecodable cache entry {key}: {error}");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                debug!("Cache read failed for {key}: {error}");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                warn!("Failed to encode cache entry {key}: {error}");
                return;
            }
        };
        if let Err(error) = conn.set_ex::<_, _, ()>(key, raw, ttl_seconds).await {
            debug!("Cache write failed for {key}: {error}");
        }
    }

    pub async fn invalidate(&self, keys: &[String]) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        for key in keys {
            if let Err(error) = conn.del::<_, ()>(key).await {
                debug!("Cache invalidation failed for {key}: {error}");
            }
        }
    }

    /// Invalidate every key under a prefix (the task-list family carries
    /// the caller's filter and limit in the key).
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let pattern = format!("{prefix}*");
        let mut cursor = 0u64;
        loop {
            let reply: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;
            let (next, keys) = match reply {
                Ok(reply) => reply,
                Err(error) => {
                    debug!("Cache scan failed for {pattern}: {error}");
                    return;
                }
            };
            if !keys.is_empty() {
                if let Err(error) = conn.del::<_, ()>(keys).await {
                    debug!("Cache invalidation failed for {pattern}: {error}");
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_keys() {
        assert_eq!(task_list_key(None, 50), "tasks:all:50");
        assert_eq!(
            task_list_key(Some(TaskStatus::Pending), 20),
            "tasks:pending:20"
        );
        assert_eq!(tasks_summary_key(), "tasks:summary");
        let id = Uuid::nil();
        assert_eq!(
            worker_statistics_key(id),
            format!("worker:{id}:statistics")
        );
        assert_eq!(document_key(id), format!("document:{id}"));
    }

    #[tokio::test]
    async fn disabled_cache_is_a_noop() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        assert!(cache.get_json::<String>("tasks:summary").await.is_none());
        cache.put_json("tasks:summary", &"value", 10).await;
        cache.invalidate(&[tasks_summary_key()]).await;
        cache.invalidate_prefix("tasks:").await;
    }
}
