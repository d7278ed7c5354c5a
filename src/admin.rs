use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::refresh::{RefreshStats, TaskHistory, TaskRecord};
use crate::storage::{BackendHealth, BackendInfo, BackendKeyMetadata, CacheStats, NewsCache};

#[derive(Debug, Clone, Serialize)]
pub struct KeyListing {
    pub pattern: String,
    pub keys: Vec<BackendKeyMetadata>,
    /// More keys match than the scan bound allowed to list.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminReport {
    pub generated_at: DateTime<Utc>,
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub health: BackendHealth,
    pub backend_info: Option<BackendInfo>,
    pub keys: KeyListing,
    pub recent_tasks: Vec<TaskRecord>,
    pub refresh_stats: RefreshStats,
}

/// Read-only aggregation of cache, backend and task state.
pub struct AdminReporter {
    cache: Arc<NewsCache>,
    history: Arc<TaskHistory>,
    max_key_scan: usize,
}

impl AdminReporter {
    pub fn new(cache: Arc<NewsCache>, history: Arc<TaskHistory>, max_key_scan: usize) -> Self {
        Self {
            cache,
            history,
            max_key_scan,
        }
    }

    /// Metadata for keys matching `pattern` (default: every key under the
    /// cache prefix). The backend scan itself stops after `max_key_scan`
    /// keys.
    pub async fn keys(&self, pattern: Option<&str>) -> Result<KeyListing> {
        let pattern = pattern
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}*", self.cache.settings().key_prefix));

        let backend = self.cache.backend();
        let scan = backend.scan_keys(&pattern, self.max_key_scan).await?;

        let mut keys = Vec::with_capacity(scan.keys.len());
        for key in &scan.keys {
            // A key can expire between listing and inspection.
            if let Some(meta) = backend.key_metadata(key).await? {
                keys.push(meta);
            }
        }

        debug!(
            "Listed {} keys for {}{}",
            keys.len(),
            pattern,
            if scan.truncated { " (truncated)" } else { "" }
        );
        Ok(KeyListing {
            pattern,
            keys,
            truncated: scan.truncated,
        })
    }

    pub async fn report(&self, recent_limit: usize) -> AdminReport {
        let stats = self.cache.get_stats().await;
        let health = self.cache.backend().health().await;
        let backend_info = match self.cache.backend().info().await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Backend info unavailable: {}", e);
                None
            }
        };

        let keys = match self.keys(None).await {
            Ok(listing) => listing,
            Err(e) => {
                debug!("Key listing unavailable: {}", e);
                KeyListing {
                    pattern: format!("{}*", self.cache.settings().key_prefix),
                    keys: Vec::new(),
                    truncated: false,
                }
            }
        };

        AdminReport {
            generated_at: self.cache.clock().now(),
            hit_rate: stats.hit_rate(),
            stats,
            health,
            backend_info,
            keys,
            recent_tasks: self.history.recent(recent_limit),
            refresh_stats: self.history.stats(),
        }
    }
}
