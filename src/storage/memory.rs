use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::storage::pattern::KeyPattern;
use crate::storage::traits::{BackendInfo, BackendKeyMetadata, BackendKind, CacheBackend};

/// Stored value with expiration tracking
#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Process-local fallback store. Expiry is checked lazily: an expired key
/// is removed the next time anything reads it.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            started_at,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn live_keys(&self, pattern: &KeyPattern) -> Vec<String> {
        let now = self.clock.now();
        self.entries
            .read()
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!("Expired key {} removed on read", key);
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        // Out-of-range TTLs never expire.
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = Entry {
            value: value.to_vec(),
            created_at: now,
            expires_at,
            last_accessed: now,
            access_count: 0,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self.entries.write().remove(key);
        Ok(removed.map(|e| !e.is_expired(now)).unwrap_or(false))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let pattern = KeyPattern::new(pattern)?;
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let before = entries.len();
        let mut expired = 0;
        entries.retain(|key, entry| {
            if !pattern.matches(key) {
                return true;
            }
            if entry.is_expired(now) {
                expired += 1;
            }
            false
        });
        Ok(before - entries.len() - expired)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = KeyPattern::new(pattern)?;
        let mut keys = self.live_keys(&pattern);
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn info(&self) -> Result<BackendInfo> {
        let memory: usize = self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| key.len() + entry.value.len())
            .sum();

        Ok(BackendInfo {
            connected_clients: 1,
            uptime_secs: (self.clock.now() - self.started_at).num_seconds().max(0) as u64,
            memory_usage_bytes: memory as u64,
            keyspace_hits: self.hits.load(Ordering::Relaxed),
            keyspace_misses: self.misses.load(Ordering::Relaxed),
        })
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<BackendKeyMetadata>> {
        let now = self.clock.now();
        let entries = self.entries.read();

        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| BackendKeyMetadata {
                key: key.to_string(),
                size_bytes: entry.value.len() as u64,
                ttl_remaining_secs: Some((entry.expires_at - now).num_seconds().max(0) as u64),
                created_at: Some(entry.created_at),
                last_accessed: Some(entry.last_accessed),
                access_count: Some(entry.access_count),
            }))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn is_connected(&self) -> bool {
        true
    }
}
