use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, InfoDict, RedisResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::traits::{BackendInfo, BackendKeyMetadata, BackendKind, CacheBackend, KeyScan};

/// COUNT hint for each SCAN round trip.
const SCAN_BATCH: usize = 100;

/// Remote backend on top of a Redis server.
///
/// The connection is opened on first use. Every command is bounded by the
/// operation timeout. When an operation fails at the transport level (or
/// times out) the connection is dropped, re-established once and the
/// operation retried once; a second failure is returned to the caller.
pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    connected: AtomicBool,
    redis_url: String,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("redis_url", &self.redis_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisBackend {
    /// Validates the URL without touching the network.
    pub fn new(redis_url: &str, connect_timeout: Duration, operation_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", redis_url, e)))?;

        Ok(Self {
            client,
            conn: Mutex::new(None),
            connect_timeout,
            operation_timeout,
            connected: AtomicBool::new(false),
            redis_url: redis_url.to_string(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Connecting to Redis at {}", self.redis_url);
        let manager = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| {
            self.connected.store(false, Ordering::Relaxed);
            Error::BackendUnavailable(format!(
                "Connecting to {} timed out after {:?}",
                self.redis_url, self.connect_timeout
            ))
        })?
        .map_err(|e| {
            self.connected.store(false, Ordering::Relaxed);
            Error::from(e)
        })?;

        info!("Connected to Redis at {}", self.redis_url);
        *guard = Some(manager.clone());
        Ok(manager)
    }

    async fn reset(&self) {
        self.conn.lock().await.take();
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Iterate SCAN until the cursor wraps, or until more than `limit`
    /// distinct keys were seen.
    async fn scan(&self, pattern: &str, limit: Option<usize>) -> Result<KeyScan> {
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(|mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async::<_, (u64, Vec<String>)>(&mut conn)
                        .await
                })
                .await?;

            keys.extend(batch);
            // SCAN may return a key more than once.
            keys.sort();
            keys.dedup();

            cursor = next;
            let over_limit = limit.map_or(false, |limit| keys.len() > limit);
            if cursor == 0 || over_limit {
                break;
            }
        }

        let truncated = limit.map_or(false, |limit| keys.len() > limit);
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(KeyScan { keys, truncated })
    }

    /// One attempt: connect if needed, then run `op` within the operation
    /// timeout.
    async fn attempt<T, F, Fut>(&self, op: &F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.operation_timeout, op(conn)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::BackendUnavailable(format!(
                "Redis at {} did not answer within {:?}",
                self.redis_url, self.operation_timeout
            ))),
        }
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let op = &op;
        let result = retry_after_reconnect(move || self.attempt(op), move || self.reset()).await;

        match &result {
            Ok(_) => self.connected.store(true, Ordering::Relaxed),
            Err(Error::BackendUnavailable(_)) => self.connected.store(false, Ordering::Relaxed),
            Err(_) => {}
        }
        result
    }
}

/// Run `attempt`; after a transport failure call `reconnect` and try exactly
/// once more. Other errors are returned as they are.
async fn retry_after_reconnect<T, A, AFut, R, RFut>(attempt: A, reconnect: R) -> Result<T>
where
    A: Fn() -> AFut,
    AFut: Future<Output = Result<T>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = ()>,
{
    match attempt().await {
        Err(Error::BackendUnavailable(e)) => {
            warn!("Redis connection lost ({}), reconnecting once", e);
            reconnect().await;
            attempt().await
        }
        other => other,
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run(|mut conn| async move { conn.get::<_, Option<Vec<u8>>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let seconds = ttl.as_secs().max(1);
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: usize = self
            .run(|mut conn| async move { conn.del::<_, usize>(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = &keys;
        self.run(|mut conn| async move { conn.del::<_, usize>(keys).await })
            .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self.scan(pattern, None).await?.keys)
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<KeyScan> {
        self.scan(pattern, Some(limit)).await
    }

    async fn ping(&self) -> Result<()> {
        let reply: String = self
            .run(|mut conn| async move { redis::cmd("PING").query_async::<_, String>(&mut conn).await })
            .await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(Error::Backend(format!("Unexpected PING reply: {}", reply)))
        }
    }

    async fn info(&self) -> Result<BackendInfo> {
        let info: InfoDict = self
            .run(|mut conn| async move { redis::cmd("INFO").query_async::<_, InfoDict>(&mut conn).await })
            .await?;

        Ok(BackendInfo {
            connected_clients: info.get("connected_clients").unwrap_or(0),
            uptime_secs: info.get("uptime_in_seconds").unwrap_or(0),
            memory_usage_bytes: info.get("used_memory").unwrap_or(0),
            keyspace_hits: info.get("keyspace_hits").unwrap_or(0),
            keyspace_misses: info.get("keyspace_misses").unwrap_or(0),
        })
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<BackendKeyMetadata>> {
        // TTL is -2 for a missing key and -1 for a key without expiry.
        let ttl: i64 = self
            .run(|mut conn| async move { conn.ttl::<_, i64>(key).await })
            .await?;
        if ttl == -2 {
            return Ok(None);
        }

        let size: u64 = self
            .run(|mut conn| async move { conn.strlen::<_, u64>(key).await })
            .await?;

        let idle: Option<u64> = self
            .run(|mut conn| async move {
                redis::cmd("OBJECT")
                    .arg("IDLETIME")
                    .arg(key)
                    .query_async::<_, Option<u64>>(&mut conn)
                    .await
            })
            .await
            .unwrap_or(None);

        Ok(Some(BackendKeyMetadata {
            key: key.to_string(),
            size_bytes: size,
            ttl_remaining_secs: u64::try_from(ttl).ok(),
            created_at: None,
            last_accessed: idle.map(|secs| Utc::now() - chrono::Duration::seconds(secs as i64)),
            access_count: None,
        }))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = RedisBackend::new("not-a-redis-url", Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_unavailable() {
        // Port 1 is never a Redis server.
        let backend = RedisBackend::new(
            "redis://127.0.0.1:1/",
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .unwrap();

        let result = backend.ping().await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert!(!backend.is_connected());
        assert_eq!(backend.kind(), BackendKind::Remote);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let backend = RedisBackend::new(
            &format!("redis://{}/", addr),
            Duration::from_millis(300),
            Duration::from_millis(200),
        )
        .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), backend.get("k"))
            .await
            .expect("a stalled server must not block the caller");
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert!(!backend.is_connected());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            backend.set("k", b"v", Duration::from_secs(60)),
        )
        .await
        .expect("writes are bounded too");
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_reconnects_exactly_once() {
        let (attempts, reconnects) = (&AtomicUsize::new(0), &AtomicUsize::new(0));

        let result: Result<()> = retry_after_reconnect(
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::BackendUnavailable("connection reset".into()))
            },
            move || async move {
                reconnects.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_recovers_the_operation() {
        let attempts = &AtomicUsize::new(0);

        let result = retry_after_reconnect(
            move || async move {
                match attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Error::BackendUnavailable("broken pipe".into())),
                    _ => Ok(7),
                }
            },
            || async {},
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_command_errors_are_not_retried() {
        let (attempts, reconnects) = (&AtomicUsize::new(0), &AtomicUsize::new(0));

        let result: Result<()> = retry_after_reconnect(
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Backend("WRONGTYPE".into()))
            },
            move || async move {
                reconnects.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    }
}
