use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::feed::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

/// What started a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Scheduled,
    Manual,
    Warmup,
    ReadThrough,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    pub category: Category,
    pub trigger: RefreshTrigger,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub articles_count: usize,
    pub execution_time_secs: Option<f64>,
    pub error_message: Option<String>,
    /// Served from cache instead of fetching.
    pub cache_used: bool,
}

impl TaskRecord {
    pub fn is_finished(&self) -> bool {
        self.status != TaskStatus::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryRefreshStats {
    pub successful: u64,
    pub failed: u64,
    pub served_from_cache: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Cumulative refresh counts. Unlike the records themselves these survive
/// ring buffer eviction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub categories: BTreeMap<Category, CategoryRefreshStats>,
}

impl RefreshStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

struct Inner {
    records: VecDeque<TaskRecord>,
    next_id: u64,
    stats: RefreshStats,
}

impl Inner {
    fn count(&mut self, record: &TaskRecord) {
        let stats = &mut self.stats;
        let per_category = stats.categories.entry(record.category).or_default();
        per_category.last_run = record.end_time.or(Some(record.start_time));

        if record.cache_used {
            per_category.served_from_cache += 1;
            return;
        }

        stats.total += 1;
        match record.status {
            TaskStatus::Completed => {
                stats.successful += 1;
                per_category.successful += 1;
                per_category.last_success = per_category.last_run;
            }
            TaskStatus::Failed => {
                stats.failed += 1;
                per_category.failed += 1;
            }
            TaskStatus::Running => {}
        }
    }
}

/// Bounded task history. When full, the oldest record is overwritten.
///
/// With a history file every finished task rewrites the file, so the
/// records outlive the process.
pub struct TaskHistory {
    capacity: usize,
    inner: Mutex<Inner>,
    file: Option<PathBuf>,
}

impl TaskHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                next_id: 1,
                stats: RefreshStats::default(),
            }),
            file: None,
        }
    }

    /// Read records written by [`save`](Self::save). A missing file gives an
    /// empty history. Tasks that were still running when the file was
    /// written are marked failed; the refresh stats are rebuilt from the
    /// loaded records.
    pub fn load(path: &Path, capacity: usize) -> Result<Self> {
        let history = Self::new(capacity);
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(history),
            Err(e) => return Err(e.into()),
        };

        let records: Vec<TaskRecord> = serde_json::from_slice(&content)?;
        {
            let mut inner = history.inner.lock();
            let skip = records.len().saturating_sub(history.capacity);
            for mut record in records.into_iter().skip(skip) {
                if record.status == TaskStatus::Running {
                    record.status = TaskStatus::Failed;
                    record.error_message = Some("interrupted before completion".to_string());
                }
                inner.next_id = inner.next_id.max(record.id + 1);
                inner.count(&record);
                inner.records.push_back(record);
            }
            debug!("Loaded {} task records from {}", inner.records.len(), path.display());
        }
        Ok(history)
    }

    /// Load from `path` when it can be read, otherwise start empty, and keep
    /// saving to it from now on.
    pub fn persistent(path: PathBuf, capacity: usize) -> Self {
        let mut history = match Self::load(&path, capacity) {
            Ok(history) => history,
            Err(e) => {
                warn!("Could not read task history {}, starting empty: {}", path.display(), e);
                Self::new(capacity)
            }
        };
        history.file = Some(path);
        history
    }

    /// Write every record, oldest first, as a JSON array.
    pub fn save(&self, path: &Path) -> Result<()> {
        let records: Vec<TaskRecord> = self.inner.lock().records.iter().cloned().collect();
        let content = serde_json::to_vec_pretty(&records)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a running record and return a copy of it.
    pub fn begin(&self, category: Category, trigger: RefreshTrigger, start_time: DateTime<Utc>) -> TaskRecord {
        let mut inner = self.inner.lock();
        let record = TaskRecord {
            id: inner.next_id,
            category,
            trigger,
            start_time,
            end_time: None,
            status: TaskStatus::Running,
            articles_count: 0,
            execution_time_secs: None,
            error_message: None,
            cache_used: false,
        };
        inner.next_id += 1;

        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record.clone());
        record
    }

    /// Store the final state of a record. The stored copy is replaced if it
    /// has not been evicted yet; the cumulative stats are updated either way.
    pub fn finish(&self, record: &TaskRecord) {
        {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.records.iter_mut().find(|r| r.id == record.id) {
                *slot = record.clone();
            }
            inner.count(record);
        }

        if let Some(path) = &self.file {
            if let Err(e) = self.save(path) {
                warn!("Could not save task history to {}: {}", path.display(), e);
            }
        }
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn last_for(&self, category: Category) -> Option<TaskRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .rev()
            .find(|r| r.category == category)
            .cloned()
    }

    pub fn stats(&self) -> RefreshStats {
        self.inner.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(history: &TaskHistory, mut record: TaskRecord, status: TaskStatus) -> TaskRecord {
        record.status = status;
        record.end_time = Some(record.start_time + chrono::Duration::seconds(3));
        record.execution_time_secs = Some(3.0);
        history.finish(&record);
        record
    }

    #[test]
    fn test_ring_buffer_overwrites_oldest() {
        let history = TaskHistory::new(3);
        let now = Utc::now();

        for _ in 0..5 {
            let record = history.begin(Category::Sport, RefreshTrigger::Scheduled, now);
            finish(&history, record, TaskStatus::Completed);
        }

        let recent = history.recent(10);
        assert_eq!(history.len(), 3);
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 4, 3]);

        // eviction does not touch the cumulative counts
        let stats = history.stats();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.categories[&Category::Sport].successful, 5);
    }

    #[test]
    fn test_finish_updates_record_in_place() {
        let history = TaskHistory::new(10);
        let record = history.begin(Category::Svijet, RefreshTrigger::Manual, Utc::now());
        assert_eq!(history.last_for(Category::Svijet).unwrap().status, TaskStatus::Running);

        let mut failed = record.clone();
        failed.error_message = Some("timeout".to_string());
        finish(&history, failed, TaskStatus::Failed);

        let last = history.last_for(Category::Svijet).unwrap();
        assert_eq!(last.status, TaskStatus::Failed);
        assert_eq!(last.error_message.as_deref(), Some("timeout"));
        assert!(history.last_for(Category::Regija).is_none());

        let stats = history.stats();
        assert_eq!((stats.total, stats.failed), (1, 1));
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("task_history.json");
        let now = Utc::now();

        let history = TaskHistory::persistent(path.clone(), 3);
        for category in [Category::Sport, Category::Svijet, Category::Regija, Category::Sport] {
            let record = history.begin(category, RefreshTrigger::Scheduled, now);
            finish(&history, record, TaskStatus::Completed);
        }
        let mut failed = history.begin(Category::Hrvatska, RefreshTrigger::Manual, now);
        failed.error_message = Some("feeds unreachable".to_string());
        finish(&history, failed, TaskStatus::Failed);
        assert!(path.exists());

        let loaded = TaskHistory::load(&path, 3).unwrap();
        assert_eq!(loaded.recent(10), history.recent(10));
        assert_eq!(
            loaded.recent(10).iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![5, 4, 3]
        );

        // stats only cover what survived in the file
        let stats = loaded.stats();
        assert_eq!((stats.total, stats.successful, stats.failed), (3, 2, 1));

        // ids continue after the loaded ones
        let next = loaded.begin(Category::Ekonomija, RefreshTrigger::Manual, now);
        assert_eq!(next.id, 6);
    }

    #[test]
    fn test_load_marks_interrupted_tasks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_history.json");

        let history = TaskHistory::new(10);
        history.begin(Category::Svijet, RefreshTrigger::Scheduled, Utc::now());
        history.save(&path).unwrap();

        let loaded = TaskHistory::load(&path, 10).unwrap();
        let record = loaded.last_for(Category::Svijet).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error_message.unwrap().contains("interrupted"));
    }

    #[test]
    fn test_missing_or_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        assert!(TaskHistory::load(&missing, 10).unwrap().is_empty());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "[{").unwrap();
        assert!(TaskHistory::load(&broken, 10).is_err());

        let history = TaskHistory::persistent(broken.clone(), 10);
        assert!(history.is_empty());
        assert_eq!(history.file(), Some(broken.as_path()));
    }

    #[test]
    fn test_cache_served_tasks_are_not_refreshes() {
        let history = TaskHistory::new(10);
        let mut record = history.begin(Category::Hrvatska, RefreshTrigger::Warmup, Utc::now());
        record.cache_used = true;
        finish(&history, record, TaskStatus::Completed);

        let stats = history.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.categories[&Category::Hrvatska].served_from_cache, 1);
        assert!(stats.categories[&Category::Hrvatska].last_run.is_some());
    }
}
