pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod translate;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use sources::RssNewsSource;
pub use translate::{LlmTranslator, Translator};

/// The fixed set of news categories. A category is the unit of caching and
/// of refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Hrvatska,
    Svijet,
    Ekonomija,
    Sport,
    Regija,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Hrvatska,
        Category::Svijet,
        Category::Ekonomija,
        Category::Sport,
        Category::Regija,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Hrvatska => "Hrvatska",
            Category::Svijet => "Svijet",
            Category::Ekonomija => "Ekonomija",
            Category::Sport => "Sport",
            Category::Regija => "Regija",
        }
    }

    /// Lowercase identifier used in cache keys.
    pub fn slug(&self) -> &'static str {
        match self {
            Category::Hrvatska => "hrvatska",
            Category::Svijet => "svijet",
            Category::Ekonomija => "ekonomija",
            Category::Sport => "sport",
            Category::Regija => "regija",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == wanted)
            .ok_or_else(|| Error::InvalidCategory(s.to_string()))
    }
}

/// Either a single category or every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    One(Category),
    All,
}

impl RefreshTarget {
    pub fn categories(&self) -> Vec<Category> {
        match self {
            RefreshTarget::One(category) => vec![*category],
            RefreshTarget::All => Category::ALL.to_vec(),
        }
    }
}

impl FromStr for RefreshTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(RefreshTarget::All)
        } else {
            s.parse().map(RefreshTarget::One)
        }
    }
}

impl fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTarget::One(category) => write!(f, "{}", category),
            RefreshTarget::All => f.write_str("all"),
        }
    }
}

/// A single news item as displayed. Order within a category is display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub body: String,
    pub source: String,
    #[serde(default)]
    pub link: Option<String>,
}

impl Article {
    pub fn new(title: impl Into<String>, body: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            source: source.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Short preview of the body, cut on a character boundary.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.body.chars().count() <= max_chars {
            return self.body.clone();
        }
        let cut: String = self.body.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Produces fresh articles for a category: RSS retrieval, cleaning and
/// translation. Slow and unreliable by nature.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_category_news(&self, category: Category) -> Result<Vec<Article>>;
}
