// src/ingest/content.rs
//! Full-text enrichment: fetch article pages and pull readable text out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::FullTextSettings;
use crate::ingest::bounded::{BoundedFetcher, FetchOutcome};
use crate::ingest::{clean_html, truncate_chars};

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Readable text of the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("SilverTreeNewsletterBot/1.0")
            .timeout(timeout)
            .build()
            .context("building content HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await?
            .error_for_status()?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.starts_with("text/") && !content_type.contains("html") {
            bail!("unsupported content type {content_type}");
        }
        let body = resp.text().await?;
        Ok(extract_text(&body))
    }
}

static BOILERPLATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "noscript", "header", "footer", "nav"]
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}>")).ok())
        .collect()
});

static MAIN_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["article", "main"]
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>")).ok())
        .collect()
});

/// Boilerplate blocks removed, `<article>` then `<main>` preferred, tags
/// stripped, entities decoded, whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let mut cleaned = html.to_string();
    for re in BOILERPLATE.iter() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    let body = MAIN_BLOCKS
        .iter()
        .find_map(|re| re.captures(&cleaned).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
        .unwrap_or(cleaned);
    clean_html(&body)
}

/// Fetch each distinct URL once. Text shorter than `min_chars` counts as a
/// failure; longer text is cut to `max_chars`.
pub async fn fetch_full_texts(
    fetcher: Arc<dyn ContentFetcher>,
    urls: Vec<String>,
    cfg: &FullTextSettings,
) -> FetchOutcome<String, String> {
    let bounded = BoundedFetcher::new(cfg.requests_per_minute, cfg.max_concurrency);
    let (min_chars, max_chars) = (cfg.min_chars, cfg.max_chars);
    bounded
        .run(urls, move |url: String| {
            let fetcher = Arc::clone(&fetcher);
            async move {
                let text = fetcher.fetch(&url).await?;
                if text.chars().count() < min_chars {
                    bail!("extracted text too short");
                }
                Ok(truncate_chars(&text, max_chars))
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn prefers_article_and_drops_scripts() {
        let html = r#"<html><head><style>p{}</style></head><body>
            <nav>Home | About</nav>
            <article><h1>Deal</h1><script>var x = 1;</script><p>Acme &amp; Beta merge.</p></article>
            <footer>(c) 2026</footer></body></html>"#;
        assert_eq!(extract_text(html), "Deal Acme & Beta merge.");
    }

    #[test]
    fn falls_back_to_whole_page() {
        assert_eq!(extract_text("<div>Just <b>text</b></div>"), "Just text");
    }

    struct Pages(HashMap<String, String>);

    #[async_trait]
    impl ContentFetcher for Pages {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.0.get(url).cloned().context("404")
        }
    }

    #[tokio::test]
    async fn short_pages_fail_long_pages_truncate() {
        let pages = Pages(HashMap::from([
            ("https://a/long".to_string(), "x".repeat(500)),
            ("https://a/short".to_string(), "tiny".to_string()),
        ]));
        let cfg = FullTextSettings {
            requests_per_minute: 0,
            min_chars: 10,
            max_chars: 100,
            ..FullTextSettings::default()
        };
        let out = fetch_full_texts(
            Arc::new(pages),
            vec!["https://a/long".into(), "https://a/short".into(), "https://a/missing".into()],
            &cfg,
        )
        .await;
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results["https://a/long"].len(), 100);
        assert_eq!(out.errors.len(), 2);
    }
}
