use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{CategorySources, Config};
use crate::error::{Error, Result};
use crate::feed::fetcher::FeedFetcher;
use crate::feed::parser::ParsedFeed;
use crate::feed::translate::{needs_translation, translate_articles, LlmTranslator, Translator};
use crate::feed::{Article, Category, NewsSource};

/// [`NewsSource`] that pulls the configured RSS feeds for a category and
/// translates non-Croatian groups.
pub struct RssNewsSource {
    fetcher: FeedFetcher,
    translator: Option<Arc<dyn Translator>>,
    sources: HashMap<Category, CategorySources>,
}

impl RssNewsSource {
    pub fn new(
        fetcher: FeedFetcher,
        translator: Option<Arc<dyn Translator>>,
        sources: HashMap<Category, CategorySources>,
    ) -> Self {
        Self {
            fetcher,
            translator,
            sources,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = FeedFetcher::new()
            .with_timeout(Duration::from_secs(config.refresh.feed_timeout_secs));

        let translator = LlmTranslator::from_config(&config.translation)
            .map(|t| Arc::new(t) as Arc<dyn Translator>);
        if translator.is_none() {
            info!("Translation disabled; foreign-language articles are kept as published");
        }

        Ok(Self::new(fetcher, translator, config.category_sources()?))
    }
}

#[async_trait]
impl NewsSource for RssNewsSource {
    async fn fetch_category_news(&self, category: Category) -> Result<Vec<Article>> {
        let sources = self
            .sources
            .get(&category)
            .ok_or_else(|| Error::FetchFailure(format!("No feeds configured for {}", category)))?;

        let mut articles = Vec::new();

        for group in &sources.groups {
            let feeds = self.fetcher.fetch_multiple_feeds(&group.urls).await;
            let mut picked = balanced_selection(feeds, group.fetch);

            if picked.is_empty() {
                warn!(
                    "No articles from {} group of {}",
                    group.label.as_deref().unwrap_or(&group.language),
                    category
                );
                continue;
            }

            if let Some(keep) = group.keep {
                picked.truncate(keep);
            }

            if needs_translation(&group.language) {
                match &self.translator {
                    Some(translator) => {
                        picked = translate_articles(translator.as_ref(), picked, &group.language).await;
                    }
                    None => debug!(
                        "Keeping {} untranslated {} articles for {}",
                        picked.len(),
                        group.language,
                        category
                    ),
                }
            }

            if let Some(label) = &group.label {
                for article in &mut picked {
                    article.source = format!("[{}] {}", label, article.source);
                }
            }

            articles.extend(picked);
        }

        articles.truncate(sources.limit);

        if articles.is_empty() {
            return Err(Error::FetchFailure(format!(
                "No articles could be fetched for {}",
                category
            )));
        }

        Ok(articles)
    }
}

/// Pick `count` items spread evenly across the feeds that returned anything:
/// at most two per source, at least one, then top up from the largest feed.
pub fn balanced_selection(feeds: Vec<ParsedFeed>, count: usize) -> Vec<Article> {
    let active: Vec<ParsedFeed> = feeds.into_iter().filter(|f| !f.items.is_empty()).collect();
    if active.is_empty() || count == 0 {
        return Vec::new();
    }

    let per_source = (count / active.len()).clamp(1, 2);

    let mut selected: Vec<Article> = active
        .iter()
        .flat_map(|feed| feed.items.iter().take(per_source).map(move |item| to_article(feed, item)))
        .collect();

    if selected.len() < count {
        // First feed wins ties.
        let largest = active
            .iter()
            .enumerate()
            .fold(None::<(usize, &ParsedFeed)>, |best, (i, feed)| match best {
                Some((_, b)) if b.items.len() >= feed.items.len() => best,
                _ => Some((i, feed)),
            })
            .map(|(_, feed)| feed);

        if let Some(feed) = largest {
            let already = per_source.min(feed.items.len());
            let extra = (count - selected.len()).min(feed.items.len() - already);
            selected.extend(
                feed.items[already..already + extra]
                    .iter()
                    .map(|item| to_article(feed, item)),
            );
        }
    }

    selected.truncate(count);
    selected
}

fn to_article(feed: &ParsedFeed, item: &crate::feed::parser::FeedItem) -> Article {
    Article {
        title: item.title.clone(),
        body: item.text.clone(),
        source: feed.source.clone(),
        link: item.link.clone(),
    }
}
