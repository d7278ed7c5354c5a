use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Uniform key/value operations over a cache backend.
///
/// Values are opaque bytes. Every `set` carries its own TTL; an entry whose
/// TTL has passed behaves exactly like an absent key.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read for introspection. Backends that track access metadata leave
    /// it untouched; the default is a plain `get`.
    async fn peek(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern, returning how many went.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// At most `limit` matching keys in key order, and whether more keys
    /// match. Backends override this to stop scanning early.
    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<KeyScan> {
        let mut keys = self.keys(pattern).await?;
        let truncated = keys.len() > limit;
        keys.truncate(limit);
        Ok(KeyScan { keys, truncated })
    }

    async fn ping(&self) -> Result<()>;

    async fn info(&self) -> Result<BackendInfo>;

    /// Best-effort metadata for one key; `None` if the key does not exist.
    async fn key_metadata(&self, key: &str) -> Result<Option<BackendKeyMetadata>>;

    fn kind(&self) -> BackendKind;

    /// Last known reachability. Does not perform I/O.
    fn is_connected(&self) -> bool;

    async fn health(&self) -> BackendHealth {
        let started = Instant::now();
        match self.ping().await {
            Ok(()) => BackendHealth {
                status: HealthStatus::Healthy,
                kind: self.kind(),
                latency_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            },
            Err(e) => BackendHealth {
                status: HealthStatus::Unavailable(e.to_string()),
                kind: self.kind(),
                latency_ms: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScan {
    pub keys: Vec<String>,
    /// More keys matched than were returned.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A remote cache service (Redis).
    Remote,
    /// The process-local store.
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendInfo {
    pub connected_clients: u64,
    pub uptime_secs: u64,
    pub memory_usage_bytes: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

/// Administrative view of one key. Derived, not authoritative; fields a
/// backend cannot supply are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendKeyMetadata {
    pub key: String,
    pub size_bytes: u64,
    /// `None` when the key has no expiry.
    pub ttl_remaining_secs: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning(String),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    pub kind: BackendKind,
    pub latency_ms: Option<f64>,
}

impl BackendHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }
}
