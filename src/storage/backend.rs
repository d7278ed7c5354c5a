use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::storage::memory::MemoryBackend;
use crate::storage::remote::RedisBackend;
use crate::storage::traits::{
    BackendHealth, BackendInfo, BackendKeyMetadata, BackendKind, CacheBackend, HealthStatus,
    KeyScan,
};

/// Routes every operation to either the remote backend or the in-process
/// fallback store.
///
/// The mode is picked by a probe at startup and changed only by
/// [`BackendAdapter::reprobe`]. While the remote is selected its errors are
/// passed through so callers can apply miss/no-op semantics; the fallback
/// store never fails.
pub struct BackendAdapter {
    remote: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<MemoryBackend>,
    mode: RwLock<BackendKind>,
    connected: AtomicBool,
}

impl BackendAdapter {
    /// Fallback-only adapter.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            remote: None,
            fallback: Arc::new(MemoryBackend::new(clock)),
            mode: RwLock::new(BackendKind::Fallback),
            connected: AtomicBool::new(true),
        }
    }

    /// Adapter over an already built remote backend. Starts in remote mode
    /// without probing; call [`connect`](Self::connect) to probe.
    pub fn with_remote(remote: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote: Some(remote),
            fallback: Arc::new(MemoryBackend::new(clock)),
            mode: RwLock::new(BackendKind::Remote),
            connected: AtomicBool::new(true),
        }
    }

    /// Build from configuration and probe the remote once. Never fails
    /// because the remote is unreachable; only a malformed URL is an error.
    pub async fn connect(config: &BackendConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            info!("No Redis URL configured, using in-process cache");
            return Ok(Self::in_memory(clock));
        };

        let remote = RedisBackend::new(
            url,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.operation_timeout_secs),
        )?;
        let adapter = Self::with_remote(Arc::new(remote), clock);
        adapter.probe_at_startup().await;
        Ok(adapter)
    }

    pub async fn probe_at_startup(&self) {
        let Some(remote) = &self.remote else {
            return;
        };

        match remote.ping().await {
            Ok(()) => {
                info!("Redis connected, using remote cache");
                self.set_mode(BackendKind::Remote);
                self.connected.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Redis unavailable ({}), falling back to in-process cache", e);
                self.set_mode(BackendKind::Fallback);
                self.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Check the remote and switch modes when reachability changed.
    /// Returns the mode in effect afterwards. Never returns an error.
    pub async fn reprobe(&self) -> BackendKind {
        let Some(remote) = &self.remote else {
            return BackendKind::Fallback;
        };

        let reachable = remote.ping().await;
        let current = self.mode();

        match (current, reachable) {
            (BackendKind::Fallback, Ok(())) => {
                info!("Redis reachable again, switching back to remote cache");
                self.set_mode(BackendKind::Remote);
                self.connected.store(true, Ordering::Relaxed);
            }
            (BackendKind::Remote, Err(e)) => {
                warn!("Redis probe failed ({}), switching to in-process cache", e);
                self.set_mode(BackendKind::Fallback);
                self.connected.store(false, Ordering::Relaxed);
            }
            (BackendKind::Fallback, Err(e)) => {
                debug!("Redis still unavailable: {}", e);
            }
            (BackendKind::Remote, Ok(())) => {
                self.connected.store(true, Ordering::Relaxed);
            }
        }

        self.mode()
    }

    pub fn mode(&self) -> BackendKind {
        *self.mode.read()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn fallback(&self) -> &MemoryBackend {
        &self.fallback
    }

    fn set_mode(&self, kind: BackendKind) {
        *self.mode.write() = kind;
    }

    fn active(&self) -> Arc<dyn CacheBackend> {
        match (self.mode(), &self.remote) {
            (BackendKind::Remote, Some(remote)) => Arc::clone(remote),
            _ => self.fallback.clone() as Arc<dyn CacheBackend>,
        }
    }

    /// Track reachability of remote calls.
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if self.mode() == BackendKind::Remote {
            match &result {
                Ok(_) => {
                    if !self.connected.swap(true, Ordering::Relaxed) {
                        info!("Redis connection restored");
                    }
                }
                Err(Error::BackendUnavailable(msg)) => {
                    if self.connected.swap(false, Ordering::Relaxed) {
                        warn!("Redis connection lost: {}", msg);
                    }
                }
                Err(_) => {}
            }
        }
        result
    }
}

#[async_trait]
impl CacheBackend for BackendAdapter {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.observe(self.active().get(key).await)
    }

    async fn peek(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.observe(self.active().peek(key).await)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.observe(self.active().set(key, value, ttl).await)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.observe(self.active().delete(key).await)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        self.observe(self.active().delete_pattern(pattern).await)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.observe(self.active().keys(pattern).await)
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<KeyScan> {
        self.observe(self.active().scan_keys(pattern, limit).await)
    }

    async fn ping(&self) -> Result<()> {
        self.observe(self.active().ping().await)
    }

    async fn info(&self) -> Result<BackendInfo> {
        self.observe(self.active().info().await)
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<BackendKeyMetadata>> {
        self.observe(self.active().key_metadata(key).await)
    }

    fn kind(&self) -> BackendKind {
        self.mode()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn health(&self) -> BackendHealth {
        match self.mode() {
            BackendKind::Fallback => BackendHealth {
                status: HealthStatus::Warning(if self.remote.is_some() {
                    "Redis unreachable, using in-process cache".to_string()
                } else {
                    "Using in-process cache".to_string()
                }),
                kind: BackendKind::Fallback,
                latency_ms: None,
            },
            BackendKind::Remote => {
                let health = match &self.remote {
                    Some(remote) => remote.health().await,
                    None => self.fallback.health().await,
                };
                self.connected.store(health.is_healthy(), Ordering::Relaxed);
                health
            }
        }
    }
}
