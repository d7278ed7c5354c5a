use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feed::Category;

/// Upper bound for any cache TTL or retention window: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    /// Feed groups keyed by category name.
    #[serde(default = "default_sources")]
    pub sources: BTreeMap<String, CategorySources>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How long an expired entry is kept in the backend so it can still be
    /// served as stale.
    #[serde(default = "default_stale_retention_secs")]
    pub stale_retention_secs: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_max_key_scan")]
    pub max_key_scan: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Without a URL only the in-process store is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Longest wait for a single Redis reply.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Upper bound for producing one category, translation included.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Per-feed HTTP timeout.
    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,

    /// Upper bound for writing a fetched category to the cache.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_warm_on_start")]
    pub warm_on_start: bool,

    /// Where finished refresh tasks are kept between runs. `None` keeps the
    /// history in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily `HH:MM` run times for categories without an override.
    #[serde(default = "default_schedule_times")]
    pub times: Vec<String>,

    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_category_schedules")]
    pub categories: BTreeMap<String, CategorySchedule>,
}

/// Refresh priority of a category. Categories of one priority share a TTL
/// class and can be refreshed together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn name(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Priority::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Config(format!("Unknown priority '{}', use high, medium or low", s))
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorySchedule {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_enabled")]
    pub enabled: bool,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_translation_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySources {
    /// Maximum number of articles kept for the category.
    pub limit: usize,
    pub groups: Vec<FeedGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedGroup {
    /// Country label prefixed to article sources, e.g. `[Slovenija]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub language: String,
    pub urls: Vec<String>,
    /// Items picked by balanced selection.
    pub fetch: usize,
    /// Items kept after selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub json_format: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|_| {
            Error::NotFound(format!("Config file {}", path.as_ref().display()))
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file, then layer `.env` and process environment on top.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            return Err(Error::Config("Cache TTL must be greater than 0".to_string()));
        }

        if self.cache.ttl_secs > MAX_TTL_SECS {
            return Err(Error::Config(format!(
                "Cache TTL must not exceed {} seconds",
                MAX_TTL_SECS
            )));
        }

        if self.cache.stale_retention_secs > MAX_TTL_SECS {
            return Err(Error::Config(format!(
                "Stale retention must not exceed {} seconds",
                MAX_TTL_SECS
            )));
        }

        if self.cache.history_capacity == 0 {
            return Err(Error::Config(
                "Task history capacity must be greater than 0".to_string(),
            ));
        }

        if self.refresh.fetch_timeout_secs == 0 {
            return Err(Error::Config(
                "Fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.refresh.write_timeout_secs == 0 || self.backend.operation_timeout_secs == 0 {
            return Err(Error::Config(
                "Cache write and operation timeouts must be greater than 0".to_string(),
            ));
        }

        if let Some(redis_url) = &self.backend.redis_url {
            url::Url::parse(redis_url)
                .map_err(|_| Error::InvalidUrl(redis_url.clone()))?;
        }

        self.utc_offset()?;
        for time in &self.schedule.times {
            parse_time(time)?;
        }

        for (name, schedule) in &self.schedule.categories {
            name.parse::<Category>()?;
            for time in &schedule.times {
                parse_time(time)?;
            }
            if let Some(ttl) = schedule.ttl_secs {
                if ttl == 0 || ttl > MAX_TTL_SECS {
                    return Err(Error::Config(format!(
                        "TTL for {} must be between 1 and {} seconds",
                        name, MAX_TTL_SECS
                    )));
                }
            }
        }

        for (name, sources) in &self.sources {
            name.parse::<Category>()?;
            for group in &sources.groups {
                for url in &group.urls {
                    url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.clone()))?;
                }
            }
        }

        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            if !redis_url.trim().is_empty() {
                self.backend.redis_url = Some(redis_url);
            }
        }

        if let Ok(ttl) = std::env::var("NOVINE_CACHE_TTL") {
            if let Ok(val) = ttl.parse() {
                self.cache.ttl_secs = val;
            }
        }

        if let Ok(prefix) = std::env::var("NOVINE_CACHE_PREFIX") {
            self.cache.key_prefix = prefix;
        }

        if let Ok(level) = std::env::var("NOVINE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                self.translation.api_key = Some(key);
            }
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("novine"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.cache.stale_retention_secs)
    }

    /// TTL for one category: its schedule override if any, else the default.
    pub fn ttl_for(&self, category: Category) -> Duration {
        self.category_schedule(category)
            .and_then(|s| s.ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.ttl())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.schedule.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "UTC offset of {} minutes is out of range",
                self.schedule.utc_offset_minutes
            ))
        })
    }

    /// Daily run times for a category, sorted and deduplicated.
    pub fn schedule_times(&self, category: Category) -> Result<Vec<NaiveTime>> {
        let raw = match self.category_schedule(category) {
            Some(schedule) if !schedule.times.is_empty() => &schedule.times,
            _ => &self.schedule.times,
        };

        let mut times = raw.iter().map(|t| parse_time(t)).collect::<Result<Vec<_>>>()?;
        times.sort();
        times.dedup();
        Ok(times)
    }

    pub fn category_sources(&self) -> Result<HashMap<Category, CategorySources>> {
        self.sources
            .iter()
            .map(|(name, sources)| Ok((name.parse::<Category>()?, sources.clone())))
            .collect()
    }

    /// Categories without a schedule entry count as medium priority.
    pub fn priority_of(&self, category: Category) -> Priority {
        self.category_schedule(category)
            .map(|s| s.priority)
            .unwrap_or_default()
    }

    pub fn categories_with_priority(&self, priority: Priority) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.priority_of(*c) == priority)
            .collect()
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.operation_timeout_secs)
    }

    fn category_schedule(&self, category: Category) -> Option<&CategorySchedule> {
        self.schedule
            .categories
            .iter()
            .find(|(name, _)| name.parse::<Category>().ok() == Some(category))
            .map(|(_, schedule)| schedule)
    }
}

pub fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| Error::Config(format!("Invalid schedule time '{}', expected HH:MM", value)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            backend: BackendConfig::default(),
            refresh: RefreshConfig::default(),
            schedule: ScheduleConfig::default(),
            translation: TranslationConfig::default(),
            sources: default_sources(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            stale_retention_secs: default_stale_retention_secs(),
            key_prefix: default_key_prefix(),
            max_key_scan: default_max_key_scan(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            feed_timeout_secs: default_feed_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            warm_on_start: default_warm_on_start(),
            history_file: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            times: default_schedule_times(),
            utc_offset_minutes: default_utc_offset_minutes(),
            categories: default_category_schedules(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: default_translation_enabled(),
            api_url: default_api_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_translation_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
            json_format: false,
        }
    }
}

fn default_ttl_secs() -> u64 { 7200 }
fn default_stale_retention_secs() -> u64 { 86400 }
fn default_key_prefix() -> String { "ai_novine:".to_string() }
fn default_max_key_scan() -> usize { 200 }
fn default_history_capacity() -> usize { 100 }

fn default_connect_timeout_secs() -> u64 { 5 }
fn default_operation_timeout_secs() -> u64 { 3 }
fn default_probe_interval_secs() -> u64 { 60 }

fn default_fetch_timeout_secs() -> u64 { 180 }
fn default_feed_timeout_secs() -> u64 { 30 }
fn default_write_timeout_secs() -> u64 { 15 }
fn default_warm_on_start() -> bool { true }

fn default_schedule_times() -> Vec<String> {
    vec!["08:00".to_string(), "18:00".to_string()]
}
fn default_utc_offset_minutes() -> i32 { 60 }

fn default_category_schedules() -> BTreeMap<String, CategorySchedule> {
    let entry = |priority: Priority, times: &[&str], ttl_secs: u64| CategorySchedule {
        priority,
        times: times.iter().map(|t| t.to_string()).collect(),
        ttl_secs: Some(ttl_secs),
    };

    BTreeMap::from([
        (
            "Hrvatska".to_string(),
            entry(Priority::High, &["02:00", "06:00", "09:15", "15:15", "18:15", "23:00"], 14400),
        ),
        (
            "Svijet".to_string(),
            entry(Priority::High, &["02:00", "06:15", "09:00", "12:15", "18:00", "21:15"], 14400),
        ),
        ("Ekonomija".to_string(), entry(Priority::Medium, &["09:00", "12:00", "15:00", "18:30"], 21600)),
        ("Sport".to_string(), entry(Priority::Medium, &["09:30", "12:00", "15:30", "21:00"], 21600)),
        ("Regija".to_string(), entry(Priority::Low, &["23:15"], 86400)),
    ])
}

fn default_translation_enabled() -> bool { true }
fn default_api_url() -> String { "https://api.anthropic.com/v1/messages".to_string() }
fn default_model() -> String { "claude-3-haiku-20240307".to_string() }
fn default_translation_timeout_secs() -> u64 { 60 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "logs/novine.log".to_string() }

fn group(language: &str, urls: &[&str], fetch: usize) -> FeedGroup {
    FeedGroup {
        label: None,
        language: language.to_string(),
        urls: urls.iter().map(|u| u.to_string()).collect(),
        fetch,
        keep: None,
    }
}

fn regional(label: &str, language: &str, urls: &[&str]) -> FeedGroup {
    FeedGroup {
        label: Some(label.to_string()),
        keep: Some(2),
        ..group(language, urls, 4)
    }
}

pub fn default_sources() -> BTreeMap<String, CategorySources> {
    let hrvatska = [
        "https://vijesti.hrt.hr/rss",
        "https://www.index.hr/rss/vijesti",
        "https://www.tportal.hr/rss",
        "https://www.24sata.hr/feeds/news.xml",
        "https://www.vecernji.hr/feeds/latest",
    ];
    let svijet = [
        "https://rss.nytimes.com/services/xml/rss/nyt/World.xml",
        "https://feeds.bbci.co.uk/news/world/rss.xml",
        "https://www.theguardian.com/world/rss",
        "https://www.aljazeera.com/xml/rss/all.xml",
        "https://www.france24.com/en/rss",
    ];
    let ekonomija = [
        "https://rss.nytimes.com/services/xml/rss/nyt/Business.xml",
        "https://feeds.bbci.co.uk/news/business/rss.xml",
        "https://www.cnbc.com/id/10001147/device/rss/rss.html",
        "https://www.ft.com/world/economy?format=rss",
        "https://www.economist.com/finance-and-economics/rss.xml",
        "https://www.theguardian.com/business/economics/rss",
        "https://www.forbes.com/business/feed/",
    ];
    let sport_hr = [
        "https://www.index.hr/rss/sport",
        "https://sportske.jutarnji.hr/rss",
        "https://www.24sata.hr/feeds/sport.xml",
        "https://gol.dnevnik.hr/feeds/category/4.xml",
        "https://sportnet.rtl.hr/rss/sve-vijesti/",
    ];
    let sport_world = [
        "https://www.espn.com/espn/rss/news",
        "https://rss.nytimes.com/services/xml/rss/nyt/Sports.xml",
        "https://www.skysports.com/rss/0,20514,11979,00.xml",
        "https://feeds.bbci.co.uk/sport/rss.xml",
    ];

    BTreeMap::from([
        (
            "Hrvatska".to_string(),
            CategorySources { limit: 5, groups: vec![group("hr", &hrvatska, 5)] },
        ),
        (
            "Svijet".to_string(),
            CategorySources { limit: 5, groups: vec![group("en", &svijet, 5)] },
        ),
        (
            "Ekonomija".to_string(),
            CategorySources { limit: 7, groups: vec![group("en", &ekonomija, 7)] },
        ),
        (
            "Sport".to_string(),
            CategorySources {
                limit: 10,
                groups: vec![group("hr", &sport_hr, 5), group("en", &sport_world, 5)],
            },
        ),
        (
            "Regija".to_string(),
            CategorySources {
                limit: 8,
                groups: vec![
                    regional(
                        "Slovenija",
                        "sl",
                        &[
                            "https://www.rtvslo.si/feeds/01.xml",
                            "https://www.24ur.com/rss",
                            "https://www.dnevnik.si/rss",
                            "https://www.delo.si/rss/",
                            "https://www.slovenskenovice.si/feed/",
                        ],
                    ),
                    regional(
                        "Mađarska",
                        "hu",
                        &[
                            "https://www.origo.hu/contentpartner/rss/hircentrum/origo.xml",
                            "https://hvg.hu/rss",
                            "https://index.hu/24ora/rss/",
                            "https://444.hu/feed",
                            "https://magyarnarancs.hu/rss",
                        ],
                    ),
                    regional(
                        "Italija",
                        "it",
                        &[
                            "https://www.repubblica.it/rss/homepage/rss2.0.xml",
                            "https://www.corriere.it/rss/homepage.xml",
                            "https://www.ansa.it/sito/ansait_rss.xml",
                            "https://www.ilfattoquotidiano.it/feed/",
                            "https://www.lastampa.it/rss.xml",
                        ],
                    ),
                    regional(
                        "Austrija",
                        "de",
                        &[
                            "https://www.derstandard.at/rss",
                            "https://www.krone.at/rss",
                            "https://www.orf.at/rss/news",
                            "https://www.tt.com/rss",
                            "https://kurier.at/rss",
                        ],
                    ),
                ],
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_secs, 7200);
        assert_eq!(config.cache.key_prefix, "ai_novine:");
        assert_eq!(config.category_sources().unwrap().len(), 5);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
ttl_secs = 600

[backend]
redis_url = "redis://localhost:6379"

[schedule]
times = ["07:30"]
categories = {{}}
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.cache.history_capacity, 100);
        assert_eq!(config.backend.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(
            config.schedule_times(Category::Sport).unwrap(),
            vec![NaiveTime::from_hms_opt(7, 30, 0).unwrap()]
        );
        assert_eq!(config.ttl_for(Category::Sport), Duration::from_secs(600));
    }

    #[test]
    fn test_category_overrides() {
        let config = Config::default();
        let times = config.schedule_times(Category::Regija).unwrap();
        assert_eq!(times, vec![NaiveTime::from_hms_opt(23, 15, 0).unwrap()]);
        assert_eq!(config.ttl_for(Category::Regija), Duration::from_secs(86400));
        assert_eq!(config.ttl_for(Category::Hrvatska), Duration::from_secs(14400));

        // overrides come back sorted
        let hr = config.schedule_times(Category::Hrvatska).unwrap();
        assert!(hr.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schedule.times = vec!["25:00".to_string()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config
            .schedule
            .categories
            .insert("Vrijeme".to_string(), CategorySchedule::default());
        assert!(matches!(config.validate(), Err(Error::InvalidCategory(_))));

        let mut config = Config::default();
        config.backend.redis_url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_validation_caps_ttls() {
        let mut config = Config::default();
        config.cache.ttl_secs = 10_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.cache.ttl_secs = MAX_TTL_SECS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.cache.stale_retention_secs = MAX_TTL_SECS + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.schedule.categories.get_mut("Sport").unwrap().ttl_secs = Some(u64::MAX);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.backend.operation_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_groups() {
        let config = Config::default();
        assert_eq!(
            config.categories_with_priority(Priority::High),
            vec![Category::Hrvatska, Category::Svijet]
        );
        assert_eq!(
            config.categories_with_priority(Priority::Medium),
            vec![Category::Ekonomija, Category::Sport]
        );
        assert_eq!(config.categories_with_priority(Priority::Low), vec![Category::Regija]);

        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());

        // no schedule entry means medium
        let mut config = Config::default();
        config.schedule.categories.clear();
        assert_eq!(config.priority_of(Category::Regija), Priority::Medium);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.key_prefix = "test:".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.cache.key_prefix, "test:");
        assert_eq!(loaded.sources.len(), config.sources.len());
        assert_eq!(
            loaded.sources["Regija"].groups[0].label.as_deref(),
            Some("Slovenija")
        );
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/nonexistent/novine.toml");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
