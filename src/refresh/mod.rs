//! Per-category refresh coordination.
//!
//! At most one fetch per category is in flight at any time. A second
//! trigger for the same category joins the running refresh and receives its
//! outcome instead of starting another fetch. Different categories refresh
//! independently.

pub mod history;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::feed::{Article, Category, NewsSource};
use crate::storage::{CachedNews, NewsCache};

pub use history::{RefreshStats, RefreshTrigger, TaskHistory, TaskRecord, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Fetching,
    WritingSuccess,
    WritingFailed,
}

/// Final result of one refresh, shared by everyone waiting on it.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub record: TaskRecord,
    /// The fetched (or cache-served) articles; `None` on failure.
    pub articles: Option<Arc<Vec<Article>>>,
    /// Set when the articles were written to the cache.
    pub cached_at: Option<DateTime<Utc>>,
}

impl RefreshOutcome {
    pub fn succeeded(&self) -> bool {
        self.record.status == TaskStatus::Completed
    }
}

type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle to a started or joined refresh.
pub struct RefreshTicket {
    pub category: Category,
    pub task_id: u64,
    /// `true` when this trigger joined a refresh that was already running.
    pub joined: bool,
    outcome: SharedOutcome,
}

impl fmt::Debug for RefreshTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTicket")
            .field("category", &self.category)
            .field("task_id", &self.task_id)
            .field("joined", &self.joined)
            .finish()
    }
}

impl RefreshTicket {
    pub async fn wait(self) -> RefreshOutcome {
        self.outcome.await
    }
}

struct InFlight {
    task_id: u64,
    outcome: SharedOutcome,
}

struct Slot {
    state: RefreshState,
    in_flight: Option<InFlight>,
    generation: u64,
}

type SlotHandle = Arc<Mutex<Slot>>;

/// Returns a slot to idle when the refresh task ends, panics included.
struct ReleaseSlot {
    slot: SlotHandle,
    generation: u64,
}

impl Drop for ReleaseSlot {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.generation == self.generation {
            slot.state = RefreshState::Idle;
            slot.in_flight = None;
        }
    }
}

pub struct RefreshCoordinator {
    cache: Arc<NewsCache>,
    source: Arc<dyn NewsSource>,
    history: Arc<TaskHistory>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    write_timeout: Duration,
    slots: DashMap<Category, SlotHandle>,
}

impl RefreshCoordinator {
    pub fn new(
        cache: Arc<NewsCache>,
        source: Arc<dyn NewsSource>,
        history: Arc<TaskHistory>,
        fetch_timeout: Duration,
    ) -> Self {
        let clock = Arc::clone(cache.clock());
        Self {
            cache,
            source,
            history,
            clock,
            fetch_timeout,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            slots: DashMap::new(),
        }
    }

    /// Bound on writing fetched articles to the cache. A write that takes
    /// longer is abandoned and the refresh completes uncached.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn cache(&self) -> &Arc<NewsCache> {
        &self.cache
    }

    pub fn history(&self) -> &Arc<TaskHistory> {
        &self.history
    }

    pub fn state(&self, category: Category) -> RefreshState {
        self.slots
            .get(&category)
            .map(|slot| slot.lock().state)
            .unwrap_or(RefreshState::Idle)
    }

    pub fn is_refreshing(&self, category: Category) -> bool {
        self.state(category) != RefreshState::Idle
    }

    fn slot(&self, category: Category) -> SlotHandle {
        self.slots
            .entry(category)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    state: RefreshState::Idle,
                    in_flight: None,
                    generation: 0,
                }))
            })
            .clone()
    }

    /// Start a refresh, or join the one already running for `category`.
    /// Must be called from within a Tokio runtime.
    pub fn trigger(self: &Arc<Self>, category: Category, trigger: RefreshTrigger) -> RefreshTicket {
        let slot = self.slot(category);
        let mut guard = slot.lock();

        if let Some(in_flight) = &guard.in_flight {
            debug!(
                "Refresh of {} already running as task {}, joining",
                category, in_flight.task_id
            );
            return RefreshTicket {
                category,
                task_id: in_flight.task_id,
                joined: true,
                outcome: in_flight.outcome.clone(),
            };
        }

        guard.generation += 1;
        guard.state = RefreshState::Fetching;
        let generation = guard.generation;

        let record = self.history.begin(category, trigger, self.clock.now());
        let task_id = record.id;

        let this = Arc::clone(self);
        let task_record = record.clone();
        let release = ReleaseSlot {
            slot: Arc::clone(&slot),
            generation,
        };
        let handle = tokio::spawn(async move {
            let _release = release;
            match AssertUnwindSafe(this.run(task_record.clone(), generation))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("Refresh task {} for {} panicked", task_record.id, task_record.category);
                    let record = this.fail(task_record, "refresh task panicked".to_string(), None);
                    RefreshOutcome {
                        record,
                        articles: None,
                        cached_at: None,
                    }
                }
            }
        });

        let clock = Arc::clone(&self.clock);
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut record = record;
                    record.status = TaskStatus::Failed;
                    record.end_time = Some(clock.now());
                    record.error_message = Some(format!("refresh task aborted: {}", e));
                    RefreshOutcome {
                        record,
                        articles: None,
                        cached_at: None,
                    }
                }
            }
        }
        .boxed()
        .shared();

        guard.in_flight = Some(InFlight {
            task_id,
            outcome: outcome.clone(),
        });

        RefreshTicket {
            category,
            task_id,
            joined: false,
            outcome,
        }
    }

    async fn run(&self, mut record: TaskRecord, generation: u64) -> RefreshOutcome {
        let category = record.category;
        let started = Instant::now();
        info!("Refreshing {} (task {}, {:?})", category, record.id, record.trigger);

        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.source.fetch_category_news(category),
        )
        .await
        {
            Ok(Ok(articles)) if !articles.is_empty() => Ok(articles),
            Ok(Ok(_)) => Err(Error::FetchFailure(format!(
                "No articles returned for {}",
                category
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!(
                "Fetching {} took longer than {:?}",
                category, self.fetch_timeout
            ))),
        };

        match fetched {
            Ok(articles) => {
                self.set_state(category, generation, RefreshState::WritingSuccess);
                let articles = Arc::new(articles);
                let cached_at = match tokio::time::timeout(
                    self.write_timeout,
                    self.cache.store(category, articles.as_ref().clone(), None),
                )
                .await
                {
                    Ok(cached_at) => cached_at,
                    Err(_) => {
                        warn!("Cache write for {} took longer than {:?}, abandoned", category, self.write_timeout);
                        None
                    }
                };
                if cached_at.is_none() {
                    warn!("Fetched {} articles for {} but could not cache them", articles.len(), category);
                }

                record.status = TaskStatus::Completed;
                record.articles_count = articles.len();
                record.end_time = Some(self.clock.now());
                record.execution_time_secs = Some(started.elapsed().as_secs_f64());
                self.history.finish(&record);

                info!(
                    "{}: {} articles refreshed in {:.1}s",
                    category,
                    articles.len(),
                    started.elapsed().as_secs_f64()
                );

                RefreshOutcome {
                    record,
                    articles: Some(articles),
                    cached_at,
                }
            }
            Err(e) => {
                self.set_state(category, generation, RefreshState::WritingFailed);
                warn!("Refresh of {} failed, keeping cached data: {}", category, e);
                let record = self.fail(record, e.to_string(), Some(started));
                RefreshOutcome {
                    record,
                    articles: None,
                    cached_at: None,
                }
            }
        }
    }

    fn fail(&self, mut record: TaskRecord, message: String, started: Option<Instant>) -> TaskRecord {
        record.status = TaskStatus::Failed;
        record.error_message = Some(message);
        record.end_time = Some(self.clock.now());
        record.execution_time_secs = started.map(|s| s.elapsed().as_secs_f64());
        self.history.finish(&record);
        record
    }

    fn set_state(&self, category: Category, generation: u64, state: RefreshState) {
        if let Some(slot) = self.slots.get(&category) {
            let mut slot = slot.lock();
            if slot.generation == generation {
                slot.state = state;
            }
        }
    }

    /// Serve a fresh cache entry without fetching, otherwise refresh and
    /// wait for the result.
    pub async fn refresh_if_stale(self: &Arc<Self>, category: Category, trigger: RefreshTrigger) -> RefreshOutcome {
        match self.cache.peek(category).await {
            Some(news) if !news.is_stale => {
                let mut record = self.history.begin(category, trigger, self.clock.now());
                record.status = TaskStatus::Completed;
                record.cache_used = true;
                record.articles_count = news.articles.len();
                record.end_time = Some(self.clock.now());
                record.execution_time_secs = Some(0.0);
                self.history.finish(&record);
                debug!("{} is fresh, served from cache", category);

                RefreshOutcome {
                    record,
                    articles: Some(Arc::new(news.articles)),
                    cached_at: Some(news.cached_at),
                }
            }
            _ => self.trigger(category, trigger).wait().await,
        }
    }

    /// Read path for callers that need articles.
    ///
    /// Fresh data is returned as is. Stale data is returned immediately
    /// while a refresh runs in the background. With nothing cached the call
    /// waits for a refresh and reports [`Error::NoDataAvailable`] if that
    /// fails too.
    pub async fn get_or_refresh(self: &Arc<Self>, category: Category) -> Result<CachedNews> {
        self.read_through(category).await.map(|(news, _)| news)
    }

    /// Like [`get_or_refresh`](Self::get_or_refresh), also returning the
    /// ticket of the background refresh started for stale data. Callers
    /// that exit soon after reading can wait on it.
    pub async fn read_through(
        self: &Arc<Self>,
        category: Category,
    ) -> Result<(CachedNews, Option<RefreshTicket>)> {
        let lookup = self.cache.get_news(category).await;

        match lookup.news {
            Some(news) if !news.is_stale => Ok((news, None)),
            Some(news) => {
                let ticket = self.trigger(category, RefreshTrigger::ReadThrough);
                debug!(
                    "Serving stale {} while task {} refreshes it",
                    category, ticket.task_id
                );
                Ok((news, Some(ticket)))
            }
            None => {
                let outcome = self.trigger(category, RefreshTrigger::ReadThrough).wait().await;
                self.outcome_news(category, &outcome)
                    .map(|news| (news, None))
                    .ok_or(Error::NoDataAvailable(category))
            }
        }
    }

    /// The articles of a successful refresh as a fresh cache view.
    pub fn outcome_news(&self, category: Category, outcome: &RefreshOutcome) -> Option<CachedNews> {
        let articles = outcome.articles.as_ref()?;
        Some(CachedNews {
            category,
            articles: articles.as_ref().clone(),
            cached_at: outcome
                .cached_at
                .or(outcome.record.end_time)
                .unwrap_or_else(|| self.clock.now()),
            ttl_secs: self.cache.settings().ttl_for(category).as_secs(),
            is_stale: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{CacheCounters, CacheSettings, MemoryBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
            })
        }
    }

    #[async_trait]
    impl NewsSource for CountingSource {
        async fn fetch_category_news(&self, category: Category) -> Result<Vec<Article>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::FetchFailure("feeds unreachable".into()));
            }
            Ok(vec![Article::new(
                format!("{} #{}", category, call),
                "Tekst vijesti",
                "HRT",
            )])
        }
    }

    fn coordinator(source: Arc<CountingSource>, timeout: Duration) -> (Arc<ManualClock>, Arc<RefreshCoordinator>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(NewsCache::new(
            Arc::new(MemoryBackend::new(clock.clone())),
            clock.clone(),
            Arc::new(CacheCounters::new()),
            CacheSettings::default(),
        ));
        let coordinator = RefreshCoordinator::new(cache, source, Arc::new(TaskHistory::new(20)), timeout);
        (clock, Arc::new(coordinator))
    }

    #[tokio::test]
    async fn test_concurrent_triggers_share_one_fetch() {
        let source = CountingSource::new(Duration::from_millis(100));
        let (_, coordinator) = coordinator(source.clone(), Duration::from_secs(5));

        let first = coordinator.trigger(Category::Sport, RefreshTrigger::Scheduled);
        let second = coordinator.trigger(Category::Sport, RefreshTrigger::Manual);
        assert!(!first.joined);
        assert!(second.joined);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(coordinator.state(Category::Sport), RefreshState::Fetching);

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(a.succeeded());
        assert_eq!(a.record.id, b.record.id);
        assert_eq!(coordinator.state(Category::Sport), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_different_categories_run_independently() {
        let source = CountingSource::new(Duration::from_millis(50));
        let (_, coordinator) = coordinator(source.clone(), Duration::from_secs(5));

        let a = coordinator.trigger(Category::Sport, RefreshTrigger::Manual);
        let b = coordinator.trigger(Category::Regija, RefreshTrigger::Manual);
        assert!(!b.joined);

        let (a, b) = tokio::join!(a.wait(), b.wait());
        assert!(a.succeeded() && b.succeeded());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let source = CountingSource::new(Duration::from_secs(5));
        let (_, coordinator) = coordinator(source, Duration::from_millis(50));

        let outcome = coordinator
            .trigger(Category::Svijet, RefreshTrigger::Manual)
            .wait()
            .await;
        assert_eq!(outcome.record.status, TaskStatus::Failed);
        assert!(outcome.record.error_message.unwrap().contains("longer than"));
        assert_eq!(coordinator.state(Category::Svijet), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_entry() {
        let source = CountingSource::new(Duration::ZERO);
        let (_, coordinator) = coordinator(source.clone(), Duration::from_secs(5));

        let ok = coordinator.trigger(Category::Hrvatska, RefreshTrigger::Manual).wait().await;
        assert!(ok.succeeded());
        assert!(ok.cached_at.is_some());

        source.fail.store(true, Ordering::SeqCst);
        let failed = coordinator.trigger(Category::Hrvatska, RefreshTrigger::Manual).wait().await;
        assert!(!failed.succeeded());

        let news = coordinator.cache().peek(Category::Hrvatska).await.unwrap();
        assert_eq!(news.articles[0].title, "Hrvatska #1");

        let stats = coordinator.history().stats();
        assert_eq!((stats.successful, stats.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_refresh_if_stale_uses_fresh_cache() {
        let source = CountingSource::new(Duration::ZERO);
        let (clock, coordinator) = coordinator(source.clone(), Duration::from_secs(5));

        coordinator.refresh_if_stale(Category::Ekonomija, RefreshTrigger::Warmup).await;
        let outcome = coordinator.refresh_if_stale(Category::Ekonomija, RefreshTrigger::Warmup).await;
        assert!(outcome.record.cache_used);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::hours(3));
        let outcome = coordinator.refresh_if_stale(Category::Ekonomija, RefreshTrigger::Warmup).await;
        assert!(!outcome.record.cache_used);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    /// Backend whose writes never complete.
    struct StalledWrites(MemoryBackend);

    #[async_trait]
    impl crate::storage::CacheBackend for StalledWrites {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.0.delete(key).await
        }
        async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
            self.0.delete_pattern(pattern).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
            self.0.keys(pattern).await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn info(&self) -> Result<crate::storage::BackendInfo> {
            self.0.info().await
        }
        async fn key_metadata(&self, key: &str) -> Result<Option<crate::storage::BackendKeyMetadata>> {
            self.0.key_metadata(key).await
        }
        fn kind(&self) -> crate::storage::BackendKind {
            crate::storage::BackendKind::Remote
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_stalled_cache_write_releases_the_slot() {
        let source = CountingSource::new(Duration::ZERO);
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(NewsCache::new(
            Arc::new(StalledWrites(MemoryBackend::new(clock.clone()))),
            clock,
            Arc::new(CacheCounters::new()),
            CacheSettings::default(),
        ));
        let coordinator = Arc::new(
            RefreshCoordinator::new(cache, source.clone(), Arc::new(TaskHistory::new(20)), Duration::from_secs(5))
                .with_write_timeout(Duration::from_millis(50)),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.trigger(Category::Sport, RefreshTrigger::Manual).wait(),
        )
        .await
        .expect("refresh finished despite the stalled write");
        assert!(outcome.succeeded());
        assert!(outcome.cached_at.is_none());
        assert_eq!(coordinator.state(Category::Sport), RefreshState::Idle);

        // the next trigger starts a new fetch instead of joining a hung one
        let next = coordinator.trigger(Category::Sport, RefreshTrigger::Manual);
        assert!(!next.joined);
        next.wait().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_refresh_without_data() {
        let source = CountingSource::new(Duration::ZERO);
        source.fail.store(true, Ordering::SeqCst);
        let (_, coordinator) = coordinator(source.clone(), Duration::from_secs(5));

        let result = coordinator.get_or_refresh(Category::Regija).await;
        assert!(matches!(result, Err(Error::NoDataAvailable(Category::Regija))));

        source.fail.store(false, Ordering::SeqCst);
        let news = coordinator.get_or_refresh(Category::Regija).await.unwrap();
        assert!(!news.is_stale);
        assert_eq!(news.articles.len(), 1);
    }
}
