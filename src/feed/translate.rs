use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TranslationConfig;
use crate::error::{Error, Result};
use crate::feed::Article;

/// Language codes that are never sent for translation.
const TARGET_LANGUAGE: &str = "hr";
const MIXED_LANGUAGE: &str = "mixed";

const TRANSLATED_MARKER: &str = " (prevedeno)";
const FAILED_MARKER: &str = " (translation failed)";

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate title and body from `language` into Croatian. Source and
    /// link are left for the caller to decide.
    async fn translate(&self, article: &Article, language: &str) -> Result<Article>;
}

pub fn needs_translation(language: &str) -> bool {
    !(language.eq_ignore_ascii_case(TARGET_LANGUAGE) || language.eq_ignore_ascii_case(MIXED_LANGUAGE))
}

/// Translate a batch article by article. An article whose translation fails
/// keeps its original text and is marked in its source label.
pub async fn translate_articles(
    translator: &dyn Translator,
    articles: Vec<Article>,
    language: &str,
) -> Vec<Article> {
    if !needs_translation(language) {
        return articles;
    }

    let mut translated = Vec::with_capacity(articles.len());
    for (i, article) in articles.into_iter().enumerate() {
        match translator.translate(&article, language).await {
            Ok(result) => {
                debug!("Translated article {} from {}", i + 1, language);
                translated.push(Article {
                    title: result.title,
                    body: result.body,
                    source: format!("{}{}", article.source, TRANSLATED_MARKER),
                    link: article.link,
                });
            }
            Err(e) => {
                warn!("Failed to translate article {} ({}): {}", i + 1, article.title, e);
                translated.push(Article {
                    source: format!("{}{}", article.source, FAILED_MARKER),
                    ..article
                });
            }
        }
    }
    translated
}

/// Translator backed by an Anthropic-compatible messages endpoint.
#[derive(Debug, Clone)]
pub struct LlmTranslator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl LlmTranslator {
    /// Returns `None` when translation is disabled or no API key is configured.
    pub fn from_config(config: &TranslationConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty())?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;

        Some(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: 1024,
        })
    }

    fn prompt(article: &Article, language: &str) -> String {
        format!(
            "Prevedi sljedeći naslov i tekst vijesti s {} jezika na hrvatski jezik.\n\
             Zadrži sve informacije i stil, samo prevedi sadržaj.\n\n\
             Naslov: {}\n\nTekst: {}\n\n\
             Odgovori u formatu:\nNASLOV: [prevedeni naslov]\nTEKST: [prevedeni tekst]",
            language, article.title, article.body
        )
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, article: &Article, language: &str) -> Result<Article> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: Self::prompt(article, language),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Translation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Translation(format!(
                "HTTP {} from translation service",
                response.status().as_u16()
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Translation(format!("Invalid response: {}", e)))?;

        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        let (title, text) = parse_translation(&text, &article.title, &article.body);

        Ok(Article {
            title,
            body: text,
            source: article.source.clone(),
            link: article.link.clone(),
        })
    }
}

/// Pull the `NASLOV:` and `TEKST:` sections out of a model answer, falling
/// back to the originals for whichever part is missing.
pub fn parse_translation(answer: &str, original_title: &str, original_body: &str) -> (String, String) {
    let title = answer
        .lines()
        .find_map(|line| line.trim().strip_prefix("NASLOV:"))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| original_title.to_string());

    let body = answer
        .find("TEKST:")
        .map(|start| answer[start + "TEKST:".len()..].trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| original_body.to_string());

    (title, body)
}
