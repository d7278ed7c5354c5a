use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::admin::{AdminReport, AdminReporter, KeyListing};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Priority};
use crate::error::{Error, Result};
use crate::feed::{Category, NewsSource, RefreshTarget};
use crate::refresh::{RefreshCoordinator, RefreshState, RefreshTicket, TaskHistory, TaskRecord};
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::storage::{
    BackendAdapter, CacheBackend, CacheCounters, CacheSettings, CacheStats, CachedNews, NewsCache,
};

/// What the presentation layer renders for a category: cached articles
/// (possibly stale) or an explicit "unavailable".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NewsView {
    Available(CachedNews),
    Unavailable { category: Category },
}

impl NewsView {
    pub fn is_available(&self) -> bool {
        matches!(self, NewsView::Available(_))
    }

    pub fn news(&self) -> Option<&CachedNews> {
        match self {
            NewsView::Available(news) => Some(news),
            NewsView::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStatus {
    pub category: Category,
    pub priority: Priority,
    pub cached: bool,
    pub cached_at: Option<DateTime<Utc>>,
    pub article_count: usize,
    pub is_stale: bool,
    pub last_run: Option<TaskRecord>,
    pub next_run: Option<DateTime<Utc>>,
    pub state: RefreshState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub is_running: bool,
    pub categories: Vec<CategoryStatus>,
}

/// Entry point for the web and admin layers. Wires the backend, cache,
/// refresh coordinator, scheduler and reporter together.
pub struct NewsService {
    adapter: Option<Arc<BackendAdapter>>,
    cache: Arc<NewsCache>,
    history: Arc<TaskHistory>,
    coordinator: Arc<RefreshCoordinator>,
    scheduler: Arc<Scheduler>,
    reporter: AdminReporter,
}

impl NewsService {
    /// Connect to the configured backend (falling back to the in-process
    /// store when Redis is unreachable) using wall-clock time.
    pub async fn connect(config: &Config, source: Arc<dyn NewsSource>) -> Result<Self> {
        Self::connect_with_clock(config, source, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        config: &Config,
        source: Arc<dyn NewsSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let adapter = Arc::new(BackendAdapter::connect(&config.backend, Arc::clone(&clock)).await?);
        Self::from_parts(
            Arc::clone(&adapter) as Arc<dyn CacheBackend>,
            Some(adapter),
            source,
            clock,
            config,
        )
    }

    /// Assemble a service over any backend. `adapter` enables re-probing.
    pub fn from_parts(
        backend: Arc<dyn CacheBackend>,
        adapter: Option<Arc<BackendAdapter>>,
        source: Arc<dyn NewsSource>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(NewsCache::new(
            backend,
            clock,
            Arc::new(CacheCounters::new()),
            CacheSettings::from_config(config),
        ));
        let history = Arc::new(match &config.refresh.history_file {
            Some(path) => TaskHistory::persistent(path.clone(), config.cache.history_capacity),
            None => TaskHistory::new(config.cache.history_capacity),
        });
        let coordinator = Arc::new(
            RefreshCoordinator::new(
                Arc::clone(&cache),
                source,
                Arc::clone(&history),
                Duration::from_secs(config.refresh.fetch_timeout_secs),
            )
            .with_write_timeout(Duration::from_secs(config.refresh.write_timeout_secs)),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&coordinator),
            adapter.clone(),
            SchedulerSettings::from_config(config)?,
        ));
        let reporter = AdminReporter::new(
            Arc::clone(&cache),
            Arc::clone(&history),
            config.cache.max_key_scan,
        );

        info!(
            "News service ready (backend: {:?}, ttl: {}s)",
            cache.backend().kind(),
            config.cache.ttl_secs
        );

        Ok(Self {
            adapter,
            cache,
            history,
            coordinator,
            scheduler,
            reporter,
        })
    }

    pub fn cache(&self) -> &Arc<NewsCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn adapter(&self) -> Option<&Arc<BackendAdapter>> {
        self.adapter.as_ref()
    }

    /// Cached view only; never fetches.
    pub async fn get_news(&self, category: Category) -> NewsView {
        match self.cache.get_news(category).await.news {
            Some(news) => NewsView::Available(news),
            None => NewsView::Unavailable { category },
        }
    }

    /// Cached view, refreshing on miss or staleness.
    pub async fn get_or_refresh(&self, category: Category) -> NewsView {
        match self.coordinator.get_or_refresh(category).await {
            Ok(news) => NewsView::Available(news),
            Err(Error::NoDataAvailable(_)) => NewsView::Unavailable { category },
            Err(e) => {
                tracing::warn!("Read of {} failed: {}", category, e);
                NewsView::Unavailable { category }
            }
        }
    }

    /// Like [`get_or_refresh`](Self::get_or_refresh), but a refresh started
    /// for stale data is waited for and its articles returned. Meant for
    /// short-lived callers such as the CLI, which would otherwise exit
    /// before the background refresh lands.
    pub async fn get_or_refresh_and_wait(&self, category: Category) -> NewsView {
        match self.coordinator.read_through(category).await {
            Ok((news, None)) => NewsView::Available(news),
            Ok((stale, Some(ticket))) => {
                let outcome = ticket.wait().await;
                match self.coordinator.outcome_news(category, &outcome) {
                    Some(fresh) => NewsView::Available(fresh),
                    None => {
                        tracing::warn!(
                            "Refresh of {} failed, showing stale news: {}",
                            category,
                            outcome.record.error_message.as_deref().unwrap_or("unknown error")
                        );
                        NewsView::Available(stale)
                    }
                }
            }
            Err(_) => NewsView::Unavailable { category },
        }
    }

    pub fn refresh(&self, target: RefreshTarget) -> Vec<RefreshTicket> {
        self.scheduler.trigger_now(target)
    }

    /// Refresh every category of one priority group.
    pub fn refresh_priority(&self, priority: Priority) -> Vec<RefreshTicket> {
        self.scheduler.trigger_priority(priority)
    }

    /// Returns how many entries were removed.
    pub async fn invalidate(&self, target: RefreshTarget) -> Result<usize> {
        match target {
            RefreshTarget::All => self.cache.invalidate_all().await,
            RefreshTarget::One(category) => {
                let existed = self.cache.peek(category).await.is_some();
                self.cache.invalidate(category).await?;
                Ok(usize::from(existed))
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.get_stats().await
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
    }

    pub async fn admin_keys(&self, pattern: Option<&str>) -> Result<KeyListing> {
        self.reporter.keys(pattern).await
    }

    /// Delete every backend key matching a glob pattern. Returns how many
    /// keys went.
    pub async fn admin_delete_keys(&self, pattern: &str) -> Result<usize> {
        let removed = self.cache.delete_matching(pattern).await?;
        info!("Deleted {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    pub async fn admin_report(&self, recent_limit: usize) -> AdminReport {
        self.reporter.report(recent_limit).await
    }

    pub fn recent_tasks(&self, limit: usize) -> Vec<TaskRecord> {
        self.history.recent(limit)
    }

    pub async fn scheduler_status(&self) -> ServiceStatus {
        let schedule = self.scheduler.status();
        let mut categories = Vec::with_capacity(schedule.categories.len());

        for entry in schedule.categories {
            let cached = self.cache.peek(entry.category).await;
            categories.push(CategoryStatus {
                category: entry.category,
                priority: entry.priority,
                cached: cached.is_some(),
                cached_at: cached.as_ref().map(|n| n.cached_at),
                article_count: cached.as_ref().map(|n| n.articles.len()).unwrap_or(0),
                is_stale: cached.as_ref().map(|n| n.is_stale).unwrap_or(false),
                last_run: self.history.last_for(entry.category),
                next_run: entry.next_run,
                state: entry.state,
            });
        }

        ServiceStatus {
            is_running: schedule.is_running,
            categories,
        }
    }

    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::Article;
    use async_trait::async_trait;

    struct StaticSource;

    #[async_trait]
    impl NewsSource for StaticSource {
        async fn fetch_category_news(&self, category: Category) -> Result<Vec<Article>> {
            Ok(vec![Article::new(format!("{} vijest", category), "Tekst", "HRT")])
        }
    }

    async fn service() -> NewsService {
        NewsService::connect_with_clock(
            &Config::default(),
            Arc::new(StaticSource),
            Arc::new(ManualClock::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_unavailable_then_available() {
        let service = service().await;
        assert_eq!(
            service.get_news(Category::Svijet).await,
            NewsView::Unavailable { category: Category::Svijet }
        );

        let view = service.get_or_refresh(Category::Svijet).await;
        assert!(view.is_available());
        assert_eq!(view.news().unwrap().articles[0].title, "Svijet vijest");

        assert!(service.get_news(Category::Svijet).await.is_available());
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let service = service().await;
        for ticket in service.refresh(RefreshTarget::All) {
            assert!(ticket.wait().await.succeeded());
        }
        assert_eq!(service.stats().await.cached_categories, 5);

        assert_eq!(service.invalidate(RefreshTarget::One(Category::Sport)).await.unwrap(), 1);
        assert_eq!(service.invalidate(RefreshTarget::One(Category::Sport)).await.unwrap(), 0);
        assert_eq!(service.invalidate(RefreshTarget::All).await.unwrap(), 4);

        let status = service.scheduler_status().await;
        assert!(!status.is_running);
        assert!(status.categories.iter().all(|c| !c.cached && c.last_run.is_some()));
    }

    #[tokio::test]
    async fn test_admin_delete_keys_by_pattern() {
        let service = service().await;
        for ticket in service.refresh(RefreshTarget::All) {
            ticket.wait().await;
        }
        let backend = service.cache().backend();
        backend.set("other:session:1", b"x", Duration::from_secs(60)).await.unwrap();

        assert_eq!(service.admin_delete_keys("ai_novine:news:s*").await.unwrap(), 2);
        assert!(!service.get_news(Category::Sport).await.is_available());
        assert!(!service.get_news(Category::Svijet).await.is_available());
        assert!(service.get_news(Category::Regija).await.is_available());
        assert_eq!(service.stats().await.deletes, 2);

        assert_eq!(service.admin_delete_keys("ai_novine:*").await.unwrap(), 3);
        assert!(backend.get("other:session:1").await.unwrap().is_some());
        assert!(service.admin_delete_keys("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_priority_group() {
        let service = service().await;

        let tickets = service.refresh_priority(Priority::High);
        let categories: Vec<Category> = tickets.iter().map(|t| t.category).collect();
        assert_eq!(categories, vec![Category::Hrvatska, Category::Svijet]);
        for ticket in tickets {
            assert!(ticket.wait().await.succeeded());
        }

        let low = service.refresh_priority(Priority::Low);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].category, Category::Regija);

        let status = service.scheduler().status();
        let sport = status.categories.iter().find(|c| c.category == Category::Sport).unwrap();
        assert_eq!(sport.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.refresh.warm_on_start = false;
        config.refresh.history_file = Some(dir.path().join("task_history.json"));

        let clock = Arc::new(ManualClock::default());
        let first = NewsService::connect_with_clock(&config, Arc::new(StaticSource), clock.clone())
            .await
            .unwrap();
        first
            .refresh(RefreshTarget::One(Category::Ekonomija))
            .remove(0)
            .wait()
            .await;
        drop(first);

        let second = NewsService::connect_with_clock(&config, Arc::new(StaticSource), clock)
            .await
            .unwrap();
        let tasks = second.recent_tasks(10);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].category, Category::Ekonomija);
        assert_eq!(second.admin_report(0).await.refresh_stats.successful, 1);

        let status = second.scheduler_status().await;
        let ekonomija = status
            .categories
            .iter()
            .find(|c| c.category == Category::Ekonomija)
            .unwrap();
        assert!(ekonomija.last_run.is_some());
    }

    #[tokio::test]
    async fn test_view_serializes_with_status_tag() {
        let view = NewsView::Unavailable { category: Category::Regija };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["category"], "Regija");
    }
}
