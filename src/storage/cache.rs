use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::{Article, Category};
use crate::storage::stats::{CacheCounters, CacheStats};
use crate::storage::traits::CacheBackend;

const PAYLOAD_VERSION: u32 = 1;

/// Key layout and TTL policy of the news cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub key_prefix: String,
    pub default_ttl: Duration,
    /// Extra time an entry stays in the backend after it turns stale.
    pub stale_retention: Duration,
    pub category_ttls: HashMap<Category, Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "ai_novine:".to_string(),
            default_ttl: Duration::from_secs(7200),
            stale_retention: Duration::from_secs(86400),
            category_ttls: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            key_prefix: config.cache.key_prefix.clone(),
            default_ttl: config.ttl(),
            stale_retention: config.stale_retention(),
            category_ttls: Category::ALL
                .into_iter()
                .map(|c| (c, config.ttl_for(c)))
                .collect(),
        }
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        self.category_ttls
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn key_for(&self, category: Category) -> String {
        format!("{}news:{}", self.key_prefix, category.slug())
    }

    /// Glob matching every category key.
    pub fn news_pattern(&self) -> String {
        format!("{}news:*", self.key_prefix)
    }

    pub fn category_for_key(&self, key: &str) -> Option<Category> {
        key.strip_prefix(&self.key_prefix)?
            .strip_prefix("news:")?
            .parse()
            .ok()
    }
}

/// What is stored under a category key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    category: Category,
    articles: Vec<Article>,
    cached_at: DateTime<Utc>,
    ttl_secs: u64,
}

/// A decoded cache entry as handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedNews {
    pub category: Category,
    pub articles: Vec<Article>,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub is_stale: bool,
}

impl CachedNews {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.cached_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupOutcome {
    Hit,
    /// Present but past its TTL. Counted as a miss.
    Stale,
    Miss,
    /// Stored bytes could not be decoded; the key was deleted.
    Corrupt,
    /// The backend failed; treated as a miss.
    BackendError,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub news: Option<CachedNews>,
    pub outcome: LookupOutcome,
}

/// Category-keyed news cache over a [`CacheBackend`].
///
/// Reads never fail: backend and decode errors turn into misses. Each
/// `get_news` call counts exactly one hit or one miss.
pub struct NewsCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    counters: Arc<CacheCounters>,
    settings: CacheSettings,
}

impl NewsCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        counters: Arc<CacheCounters>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            backend,
            clock,
            counters,
            settings,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub async fn get_news(&self, category: Category) -> CacheLookup {
        let key = self.settings.key_for(category);

        let lookup = match self.backend.get(&key).await {
            Err(e) => {
                warn!("Cache read for {} failed, treating as miss: {}", category, e);
                CacheLookup {
                    news: None,
                    outcome: LookupOutcome::BackendError,
                }
            }
            Ok(None) => CacheLookup {
                news: None,
                outcome: LookupOutcome::Miss,
            },
            Ok(Some(bytes)) => match self.decode(category, &bytes) {
                Ok(news) => {
                    let outcome = if news.is_stale {
                        LookupOutcome::Stale
                    } else {
                        LookupOutcome::Hit
                    };
                    CacheLookup {
                        news: Some(news),
                        outcome,
                    }
                }
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    match self.backend.delete(&key).await {
                        Ok(_) => self.counters.record_deletes(1),
                        Err(e) => warn!("Could not delete corrupt key {}: {}", key, e),
                    }
                    CacheLookup {
                        news: None,
                        outcome: LookupOutcome::Corrupt,
                    }
                }
            },
        };

        if lookup.outcome == LookupOutcome::Hit {
            self.counters.record_hit();
            debug!("Cache hit for {}", category);
        } else {
            self.counters.record_miss();
            debug!("Cache miss for {} ({:?})", category, lookup.outcome);
        }

        lookup
    }

    /// Write the full article list. Returns `false` when the backend
    /// rejected the write; nothing is raised.
    pub async fn set_news(&self, category: Category, articles: Vec<Article>, ttl: Option<Duration>) -> bool {
        self.store(category, articles, ttl).await.is_some()
    }

    /// Like [`set_news`](Self::set_news) but returns the timestamp written.
    pub(crate) async fn store(
        &self,
        category: Category,
        articles: Vec<Article>,
        ttl: Option<Duration>,
    ) -> Option<DateTime<Utc>> {
        let ttl = ttl.unwrap_or_else(|| self.settings.ttl_for(category));
        let cached_at = self.clock.now();
        let count = articles.len();

        let entry = StoredEntry {
            version: PAYLOAD_VERSION,
            category,
            articles,
            cached_at,
            ttl_secs: ttl.as_secs(),
        };

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode {} for caching: {}", category, e);
                self.counters.record_set_failure();
                return None;
            }
        };

        let key = self.settings.key_for(category);
        match self
            .backend
            .set(&key, &bytes, ttl.saturating_add(self.settings.stale_retention))
            .await
        {
            Ok(()) => {
                self.counters.record_set();
                debug!("Cached {} articles for {} ({} bytes)", count, category, bytes.len());
                Some(cached_at)
            }
            Err(e) => {
                warn!("Cache write for {} failed: {}", category, e);
                self.counters.record_set_failure();
                None
            }
        }
    }

    /// Idempotent: an absent key is not an error.
    pub async fn invalidate(&self, category: Category) -> Result<()> {
        let key = self.settings.key_for(category);
        if self.backend.delete(&key).await? {
            self.counters.record_deletes(1);
            debug!("Invalidated {}", category);
        }
        Ok(())
    }

    pub async fn invalidate_all(&self) -> Result<usize> {
        let removed = self
            .backend
            .delete_pattern(&self.settings.news_pattern())
            .await?;
        self.counters.record_deletes(removed as u64);
        debug!("Invalidated {} category entries", removed);
        Ok(removed)
    }

    /// Delete every backend key matching a glob pattern, category entries or
    /// not. Counts as deletes; hit/miss counters are untouched.
    pub async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        if pattern.trim().is_empty() {
            return Err(Error::Backend("Key pattern must not be empty".to_string()));
        }
        let removed = self.backend.delete_pattern(pattern).await?;
        self.counters.record_deletes(removed as u64);
        debug!("Deleted {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    /// Time of the last successful write. Does not count as a lookup.
    pub async fn get_timestamp(&self, category: Category) -> Option<DateTime<Utc>> {
        self.peek(category).await.map(|news| news.cached_at)
    }

    /// Read an entry without touching hit/miss counters, backend access
    /// metadata or self-healing.
    pub async fn peek(&self, category: Category) -> Option<CachedNews> {
        let key = self.settings.key_for(category);
        match self.backend.peek(&key).await {
            Ok(Some(bytes)) => self.decode(category, &bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!("Cache peek for {} failed: {}", category, e);
                None
            }
        }
    }

    pub async fn cached_categories(&self) -> Result<Vec<Category>> {
        let keys = self.backend.keys(&self.settings.news_pattern()).await?;
        let mut categories: Vec<Category> = keys
            .iter()
            .filter_map(|key| self.settings.category_for_key(key))
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    pub async fn get_stats(&self) -> CacheStats {
        let cached = match self.cached_categories().await {
            Ok(categories) => categories.len(),
            Err(e) => {
                debug!("Could not count cached categories: {}", e);
                0
            }
        };
        self.counters
            .snapshot(self.backend.is_connected(), self.backend.kind(), cached)
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    fn decode(&self, category: Category, bytes: &[u8]) -> Result<CachedNews> {
        let entry: StoredEntry = serde_json::from_slice(bytes)?;

        if entry.version != PAYLOAD_VERSION {
            return Err(Error::InvalidState(format!(
                "payload version {} (expected {})",
                entry.version, PAYLOAD_VERSION
            )));
        }
        if entry.category != category {
            return Err(Error::InvalidState(format!(
                "entry for {} stored under the key of {}",
                entry.category, category
            )));
        }

        let expires_at = chrono::Duration::from_std(Duration::from_secs(entry.ttl_secs))
            .ok()
            .and_then(|ttl| entry.cached_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                Error::InvalidState(format!("TTL of {}s is out of range", entry.ttl_secs))
            })?;
        let is_stale = self.clock.now() >= expires_at;

        Ok(CachedNews {
            category,
            articles: entry.articles,
            cached_at: entry.cached_at,
            ttl_secs: entry.ttl_secs,
            is_stale,
        })
    }
}
