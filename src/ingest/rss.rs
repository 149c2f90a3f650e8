// src/ingest/rss.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::config::FeedConfig;
use crate::ingest::types::NewsProvider;
use crate::ingest::{clean_html, item_id, parse_datetime, truncate_chars};
use crate::model::RawNewsItem;

const SUMMARY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

pub struct RssFeedProvider {
    name: String,
    max_items: usize,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedProvider {
    pub fn from_fixture_str(name: &str, xml: &str, max_items: usize) -> Self {
        Self {
            name: name.to_string(),
            max_items,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_feed(feed: &FeedConfig, max_items: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("silvertree-newsletter/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building RSS HTTP client")?;
        Ok(Self {
            name: feed.name.clone(),
            max_items,
            mode: Mode::Http {
                url: feed.url.clone(),
                client,
            },
        })
    }

    /// Entries without a link are dropped; missing titles fall back to the URL.
    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawNewsItem>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing rss xml for {}", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(self.max_items));
        for it in rss.channel.item.into_iter().take(self.max_items) {
            let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
                continue;
            };
            let title = it
                .title
                .map(|t| clean_html(&t))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| url.clone());
            let summary = it
                .description
                .map(|d| truncate_chars(&clean_html(&d), SUMMARY_CHARS))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "No summary available.".to_string());

            out.push(RawNewsItem {
                id: item_id(&url),
                title,
                summary,
                source: self.name.clone(),
                source_url: url,
                published_date: it.pub_date.as_deref().and_then(parse_datetime),
                full_text: None,
                full_text_source: None,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("collect_parse_ms").record(ms);
        counter!("collect_items_total", "source" => "rss").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl NewsProvider for RssFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawNewsItem>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url.as_str())
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?
                    .error_for_status()
                    .with_context(|| format!("GET {url}"))?;
                let body = resp.text().await.context("rss http .text()")?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
