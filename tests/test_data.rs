#![allow(dead_code)]

/// Shared fixtures for the integration tests: RSS samples, a scripted news
/// source and a backend that can be switched off and on.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use novine::clock::ManualClock;
use novine::error::{Error, Result};
use novine::feed::{Article, Category, NewsSource};
use novine::storage::{
    BackendInfo, BackendKeyMetadata, BackendKind, CacheBackend, CacheCounters, CacheSettings,
    MemoryBackend, NewsCache,
};
use parking_lot::Mutex;

pub const HRT_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>HRT Vijesti</title>
        <link>https://vijesti.hrt.hr</link>
        <description>Najnovije vijesti</description>
        <item>
            <title>Sabor izglasao novi zakon</title>
            <link>https://vijesti.hrt.hr/sabor-zakon</link>
            <description><![CDATA[<p>Hrvatski sabor je danas <strong>većinom glasova</strong> izglasao novi zakon o prostornom uređenju.</p>]]></description>
        </item>
        <item>
            <title>Jaka bura na Jadranu</title>
            <link>https://vijesti.hrt.hr/bura</link>
            <description>Meteorolozi upozoravaju na orkanske udare bure duž cijele obale.</description>
        </item>
        <item>
            <title>Kratka vijest</title>
            <link>https://vijesti.hrt.hr/kratko</link>
            <description>Ukratko.</description>
        </item>
    </channel>
</rss>"#;

pub const INDEX_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>Index.hr</title>
        <link>https://www.index.hr</link>
        <item>
            <title>Zagreb dobiva novi tramvaj</title>
            <link>https://www.index.hr/tramvaj</link>
            <description>Gradska uprava predstavila je prve niskopodne tramvaje nove generacije.</description>
        </item>
        <item>
            <title>Rekordna turistička sezona</title>
            <link>https://www.index.hr/sezona</link>
            <description>Broj noćenja u kolovozu premašio je sve dosadašnje rekorde.</description>
        </item>
    </channel>
</rss>"#;

pub const BBC_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>BBC News - World</title>
    <id>urn:bbc:world</id>
    <updated>2024-03-16T12:00:00Z</updated>
    <entry>
        <title>Leaders meet for climate summit</title>
        <id>urn:bbc:world:1</id>
        <updated>2024-03-16T11:00:00Z</updated>
        <link href="https://www.bbc.co.uk/news/world-1"/>
        <summary>World leaders gathered in Geneva to discuss emission targets for the next decade.</summary>
    </entry>
    <entry>
        <title>Markets rally after rate decision</title>
        <id>urn:bbc:world:2</id>
        <updated>2024-03-16T10:00:00Z</updated>
        <link href="https://www.bbc.co.uk/news/world-2"/>
        <summary>Stock markets across Europe rose sharply after the central bank held rates.</summary>
    </entry>
</feed>"#;

pub const MALFORMED_RSS: &str = "<rss><channel><title>Broken";

pub fn article(title: &str) -> Article {
    Article::new(title, format!("Tekst vijesti: {}", title), "HRT")
}

pub fn articles(prefix: &str, n: usize) -> Vec<Article> {
    (1..=n).map(|i| article(&format!("{} {}", prefix, i))).collect()
}

pub fn cache_over(backend: Arc<dyn CacheBackend>, clock: Arc<ManualClock>) -> Arc<NewsCache> {
    Arc::new(NewsCache::new(
        backend,
        clock,
        Arc::new(CacheCounters::new()),
        CacheSettings::default(),
    ))
}

pub fn memory_cache() -> (Arc<ManualClock>, Arc<NewsCache>) {
    let clock = Arc::new(ManualClock::default());
    let cache = cache_over(Arc::new(MemoryBackend::new(clock.clone())), clock.clone());
    (clock, cache)
}

/// A news source that replays scripted results per category. When a
/// category's script runs out it keeps answering with numbered articles.
pub struct ScriptedSource {
    scripts: Mutex<HashMap<Category, VecDeque<Result<Vec<Article>>>>>,
    calls: Mutex<HashMap<Category, usize>>,
    total: AtomicUsize,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn push(&self, category: Category, result: Result<Vec<Article>>) {
        self.scripts.lock().entry(category).or_default().push_back(result);
    }

    pub fn fail_next(&self, category: Category) {
        self.push(
            category,
            Err(Error::FetchFailure(format!("{} feeds unreachable", category))),
        );
    }

    pub fn calls(&self, category: Category) -> usize {
        self.calls.lock().get(&category).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NewsSource for ScriptedSource {
    async fn fetch_category_news(&self, category: Category) -> Result<Vec<Article>> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(category).or_insert(0);
            *count += 1;
            *count
        };
        self.total.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&category)
            .and_then(|script| script.pop_front());

        scripted.unwrap_or_else(|| Ok(articles(&format!("{} run {}", category, call), 3)))
    }
}

/// Wraps a [`MemoryBackend`] and fails every call with a transport error
/// while switched off.
pub struct FlakyBackend {
    inner: MemoryBackend,
    up: AtomicBool,
}

impl FlakyBackend {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(clock),
            up: AtomicBool::new(true),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        self.check()?;
        self.inner.delete_pattern(pattern).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn info(&self) -> Result<BackendInfo> {
        self.check()?;
        self.inner.info().await
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<BackendKeyMetadata>> {
        self.check()?;
        self.inner.key_metadata(key).await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}
