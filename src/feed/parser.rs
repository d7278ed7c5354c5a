use std::io::BufRead;
use std::sync::OnceLock;

use feed_rs::parser as feed_parser;
use html2text::render::text_renderer::TrivialDecorator;
use regex::Regex;

use crate::error::{Error, Result};

/// Bodies shorter than this (after cleaning) are replaced by a placeholder.
const MIN_BODY_CHARS: usize = 20;
const BODY_UNAVAILABLE: &str = "Sadržaj nije dostupan.";
const DESCRIPTION_UNAVAILABLE: &str = "Opis nije dostupan";
const UNKNOWN_SOURCE: &str = "Nepoznat izvor";

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Feed title, used as the source label of every item.
    pub source: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub text: String,
    pub link: Option<String>,
}

pub struct FeedParser;

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed<R: BufRead>(&self, reader: R) -> Result<ParsedFeed> {
        let feed = feed_parser::parse(reader)
            .map_err(|e| Error::FeedParse(format!("Failed to parse feed: {}", e)))?;

        let source = feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let title = entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Naslov nije dostupan".to_string());

                let raw = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body));

                let text = match raw {
                    Some(html) => {
                        let cleaned = clean_html(&html);
                        if cleaned.chars().count() < MIN_BODY_CHARS {
                            BODY_UNAVAILABLE.to_string()
                        } else {
                            cleaned
                        }
                    }
                    None => DESCRIPTION_UNAVAILABLE.to_string(),
                };

                let link = entry.links.first().map(|l| l.href.clone());

                FeedItem {
                    title: collapse_whitespace(&title),
                    text,
                    link,
                }
            })
            .collect();

        Ok(ParsedFeed { source, items })
    }

    pub fn validate_feed_url(&self, url: &str) -> Result<()> {
        let parsed_url = url::Url::parse(url)
            .map_err(|e| Error::InvalidUrl(format!("Invalid URL: {}", e)))?;

        match parsed_url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(Error::InvalidUrl(format!("Unsupported scheme: {}", scheme))),
        }
    }
}

/// Strip markup from an HTML fragment and collapse whitespace.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let text = html2text::from_read_with_decorator(html.as_bytes(), 10_000, TrivialDecorator::new());
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(text, " ").trim().to_string()
}
