use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Config, Priority};
use crate::error::Result;
use crate::feed::{Category, RefreshTarget};
use crate::refresh::{RefreshCoordinator, RefreshState, RefreshTicket, RefreshTrigger};
use crate::storage::{BackendAdapter, BackendKind};

/// A set of wall-clock times repeated every day at a fixed UTC offset.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySchedule {
    times: Vec<NaiveTime>,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(mut times: Vec<NaiveTime>, offset: FixedOffset) -> Self {
        times.sort();
        times.dedup();
        Self { times, offset }
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_date = now.with_timezone(&self.offset).date_naive();

        (0..=1u64)
            .filter_map(|days| local_date.checked_add_days(Days::new(days)))
            .flat_map(|date| self.times.iter().map(move |time| date.and_time(*time)))
            .filter_map(|local| self.offset.from_local_datetime(&local).single())
            .map(|at| at.with_timezone(&Utc))
            .find(|at| *at > now)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub schedules: BTreeMap<Category, DailySchedule>,
    pub priorities: BTreeMap<Category, Priority>,
    pub warm_on_start: bool,
    /// Cadence of backend re-probing; `None` disables it.
    pub probe_interval: Option<Duration>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let offset = config.utc_offset()?;
        let schedules = Category::ALL
            .into_iter()
            .map(|category| {
                Ok((
                    category,
                    DailySchedule::new(config.schedule_times(category)?, offset),
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            schedules,
            priorities: Category::ALL
                .into_iter()
                .map(|category| (category, config.priority_of(category)))
                .collect(),
            warm_on_start: config.refresh.warm_on_start,
            probe_interval: match config.backend.probe_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySchedule {
    pub category: Category,
    pub priority: Priority,
    pub times: Vec<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub state: RefreshState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub categories: Vec<CategorySchedule>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Drives periodic refreshes: one timer loop per category, an optional
/// warm-up pass on start and backend re-probing.
pub struct Scheduler {
    coordinator: Arc<RefreshCoordinator>,
    adapter: Option<Arc<BackendAdapter>>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        adapter: Option<Arc<BackendAdapter>>,
        settings: SchedulerSettings,
    ) -> Self {
        let clock = Arc::clone(coordinator.cache().clock());
        Self {
            coordinator,
            adapter,
            clock,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the background loops. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Scheduler already running");
            return false;
        }

        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        for (category, schedule) in &self.settings.schedules {
            if schedule.times().is_empty() {
                warn!("No schedule times for {}, it will only refresh on demand", category);
                continue;
            }
            handles.push(tokio::spawn(Self::category_loop(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.clock),
                *category,
                schedule.clone(),
                shutdown.subscribe(),
            )));
        }

        if self.settings.warm_on_start {
            let coordinator = Arc::clone(&self.coordinator);
            handles.push(tokio::spawn(async move {
                let warmups = Category::ALL.into_iter().map(|category| {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator
                            .refresh_if_stale(category, RefreshTrigger::Warmup)
                            .await
                    }
                });
                let outcomes = futures::future::join_all(warmups).await;
                let ok = outcomes.iter().filter(|o| o.succeeded()).count();
                info!("Warm-up finished: {}/{} categories ready", ok, outcomes.len());
            }));
        }

        if let (Some(adapter), Some(interval)) = (&self.adapter, self.settings.probe_interval) {
            if adapter.has_remote() {
                handles.push(tokio::spawn(Self::probe_loop(
                    Arc::clone(adapter),
                    interval,
                    shutdown.subscribe(),
                )));
            }
        }

        info!("Scheduler started with {} background tasks", handles.len());
        *running = Some(Running { shutdown, handles });
        true
    }

    /// Stop the background loops. Returns `false` if not running. Refreshes
    /// already in flight run to completion.
    pub fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            debug!("Scheduler already stopped");
            return false;
        };

        let _ = running.shutdown.send(true);
        for handle in running.handles {
            handle.abort();
        }
        info!("Scheduler stopped");
        true
    }

    pub fn status(&self) -> SchedulerStatus {
        let is_running = self.is_running();
        let now = self.clock.now();

        let categories = self
            .settings
            .schedules
            .iter()
            .map(|(category, schedule)| CategorySchedule {
                category: *category,
                priority: self.priority_of(*category),
                times: schedule.times().iter().map(|t| t.format("%H:%M").to_string()).collect(),
                next_run: if is_running { schedule.next_after(now) } else { None },
                state: self.coordinator.state(*category),
            })
            .collect();

        SchedulerStatus {
            is_running,
            categories,
        }
    }

    /// Manual refresh. A category that is already refreshing is joined,
    /// not fetched twice.
    pub fn trigger_now(&self, target: RefreshTarget) -> Vec<RefreshTicket> {
        target
            .categories()
            .into_iter()
            .map(|category| self.coordinator.trigger(category, RefreshTrigger::Manual))
            .collect()
    }

    pub fn priority_of(&self, category: Category) -> Priority {
        self.settings
            .priorities
            .get(&category)
            .copied()
            .unwrap_or_default()
    }

    /// Manual refresh of every category in one priority group.
    pub fn trigger_priority(&self, priority: Priority) -> Vec<RefreshTicket> {
        let categories: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|c| self.priority_of(*c) == priority)
            .collect();
        info!("Refreshing {} priority categories: {:?}", priority, categories);
        categories
            .into_iter()
            .map(|category| self.coordinator.trigger(category, RefreshTrigger::Manual))
            .collect()
    }

    async fn category_loop(
        coordinator: Arc<RefreshCoordinator>,
        clock: Arc<dyn Clock>,
        category: Category,
        schedule: DailySchedule,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // A slot that already fired is never picked again, even when the
        // wall clock still reads before it.
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            let now = clock.now();
            let from = last_fired.map_or(now, |fired| fired.max(now));
            let Some(next) = schedule.next_after(from) else {
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("Next refresh of {} at {} (in {:?})", category, next, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(next);
                    let outcome = coordinator
                        .trigger(category, RefreshTrigger::Scheduled)
                        .wait()
                        .await;
                    if !outcome.succeeded() {
                        warn!(
                            "Scheduled refresh of {} failed: {}",
                            category,
                            outcome.record.error_message.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Schedule loop for {} stopped", category);
    }

    async fn probe_loop(
        adapter: Arc<BackendAdapter>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if adapter.reprobe().await == BackendKind::Fallback {
                        debug!("Remote cache still unavailable");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            for handle in running.handles {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_next_after_same_day_and_rollover() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let schedule = DailySchedule::new(vec![at(18, 0), at(8, 0)], offset);

        // 06:30 UTC is 07:30 local
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap())
        );

        // exactly on a slot moves to the next one
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 17, 0, 0).unwrap())
        );

        // after the last slot rolls to tomorrow
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Some(Utc.with_ymd_and_hms(2024, 1, 16, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_empty_schedule_has_no_next_run() {
        let schedule = DailySchedule::new(vec![], FixedOffset::east_opt(0).unwrap());
        assert_eq!(schedule.next_after(Utc::now()), None);
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = SchedulerSettings::from_config(&Config::default()).unwrap();
        assert_eq!(settings.schedules.len(), 5);
        assert_eq!(settings.schedules[&Category::Regija].times(), &[at(23, 15)]);
        assert_eq!(settings.probe_interval, Some(Duration::from_secs(60)));
        assert_eq!(settings.priorities[&Category::Hrvatska], Priority::High);
        assert_eq!(settings.priorities[&Category::Regija], Priority::Low);
    }
}
