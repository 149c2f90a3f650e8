// src/ingest/search.rs
//! Web search collection: provider trait, Perplexity client, and the collector
//! that wraps every query with the shared rate limiter, per-call retry and the
//! lookback filter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchSettings;
use crate::ingest::bounded::BoundedFetcher;
use crate::ingest::queries::SearchQuery;
use crate::ingest::{domain_of, filter_recent, item_id, parse_datetime};
use crate::model::RawNewsItem;
use crate::retry::{check_status, HttpError, RetryPolicy};
use crate::throttle::RateLimiter;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
    pub source: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
}

impl SearchResult {
    pub fn into_raw(self) -> RawNewsItem {
        let domain = domain_of(&self.url);
        let source = self
            .source
            .filter(|s| !s.trim().is_empty())
            .or_else(|| (!domain.is_empty()).then(|| domain.clone()))
            .unwrap_or_else(|| "perplexity".to_string());
        RawNewsItem {
            id: item_id(&self.url),
            title: self.title,
            summary: self
                .snippet
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Summary unavailable.".to_string()),
            source,
            source_url: self.url,
            published_date: self.published_date,
            full_text: None,
            full_text_source: None,
        }
    }
}

/// One attempt at one query. Retries and pacing belong to `SearchCollector`.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, HttpError>;
    fn name(&self) -> &str;
}

// ------------------------------------------------------------
// Perplexity
// ------------------------------------------------------------

pub struct PerplexityClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_items: usize,
}

impl PerplexityClient {
    pub fn new(cfg: &SearchSettings, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("silvertree-newsletter/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building search HTTP client")?;
        Ok(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            max_items: cfg.max_items_per_query,
        })
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    search_recency_filter: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search_domain_filter: Vec<String>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    search_results: Vec<Value>,
    citations: Vec<Value>,
    choices: Vec<Value>,
}

#[async_trait]
impl SearchProvider for PerplexityClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, HttpError> {
        let req = SearchRequest {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: "Provide recent news with citations for each claim.",
                },
                Msg {
                    role: "user",
                    content: &query.text,
                },
            ],
            temperature: 0.2,
            search_recency_filter: query.recency,
            search_domain_filter: query.domain_filter.clone(),
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        let body: SearchResponse = check_status(resp)?.json().await?;
        Ok(extract_results(body, self.max_items))
    }

    fn name(&self) -> &str {
        "perplexity"
    }
}

/// Structured `search_results` when present, else bare citation URLs carrying
/// the answer text as their summary.
fn extract_results(body: SearchResponse, max_items: usize) -> Vec<SearchResult> {
    let str_field = |v: &Value, keys: &[&str]| {
        keys.iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    if !body.search_results.is_empty() {
        return body
            .search_results
            .iter()
            .take(max_items)
            .filter_map(|r| {
                let url = str_field(r, &["url", "link"])?;
                Some(SearchResult {
                    title: str_field(r, &["title", "name"]).unwrap_or_else(|| url.clone()),
                    snippet: str_field(r, &["snippet", "description"]),
                    source: str_field(r, &["source"]),
                    published_date: str_field(r, &["published_date", "published_at", "date"])
                        .and_then(|d| parse_datetime(&d)),
                    url,
                })
            })
            .collect();
    }

    let answer = body
        .choices
        .first()
        .and_then(|c| c.pointer("/message/content"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    body.citations
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .take(max_items)
        .map(|url| {
            let domain = domain_of(url);
            SearchResult {
                title: if domain.is_empty() { url.to_string() } else { domain.clone() },
                url: url.to_string(),
                snippet: answer.clone(),
                source: (!domain.is_empty()).then_some(domain),
                published_date: None,
            }
        })
        .collect()
}

// ------------------------------------------------------------
// Collector
// ------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub items: Vec<RawNewsItem>,
    pub errors: Vec<String>,
    pub queries: usize,
}

pub struct SearchCollector {
    provider: Arc<dyn SearchProvider>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    max_concurrency: usize,
    lookback_days: i64,
    keep_undated: bool,
}

impl SearchCollector {
    pub fn new(provider: Arc<dyn SearchProvider>, cfg: &SearchSettings) -> Self {
        Self {
            provider,
            limiter: RateLimiter::new(cfg.requests_per_minute),
            retry: RetryPolicy::new(cfg.max_retries),
            max_concurrency: cfg.max_concurrency,
            lookback_days: cfg.lookback_days,
            keep_undated: cfg.keep_undated,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run all queries concurrently; items come back in query order.
    pub async fn collect(&self, queries: Vec<SearchQuery>, now: DateTime<Utc>) -> SearchOutcome {
        let total = queries.len();
        let queries = Arc::new(queries);
        // Pacing happens per attempt inside the retry loop, so the fan-out itself is unthrottled.
        let fetcher = BoundedFetcher::new(0, self.max_concurrency);

        let provider = Arc::clone(&self.provider);
        let limiter = self.limiter.clone();
        let retry = self.retry;
        let qs = Arc::clone(&queries);
        let outcome = fetcher
            .run((0..total).collect::<Vec<usize>>(), move |idx| {
                let provider = Arc::clone(&provider);
                let limiter = limiter.clone();
                let qs = Arc::clone(&qs);
                async move {
                    let q = &qs[idx];
                    let hits = retry
                        .run("search", || async {
                            limiter.wait().await;
                            provider.search(q).await
                        })
                        .await
                        .map_err(|e| anyhow::anyhow!("{}: {e}", q.id))?;
                    Ok::<_, anyhow::Error>(hits)
                }
            })
            .await;

        let mut out = SearchOutcome {
            queries: total,
            ..SearchOutcome::default()
        };
        let mut results = outcome.results;
        for idx in 0..total {
            if let Some(hits) = results.remove(&idx) {
                let raw: Vec<RawNewsItem> = hits.into_iter().map(SearchResult::into_raw).collect();
                out.items
                    .extend(filter_recent(raw, self.lookback_days, self.keep_undated, now));
            }
        }
        for e in outcome.errors {
            counter!("collect_provider_errors_total").increment(1);
            out.errors.push(format!("Search failed for query {e}"));
        }
        counter!("collect_items_total", "source" => "search").increment(out.items.len() as u64);
        tracing::info!(
            target: "ingest",
            provider = self.provider.name(),
            queries = total,
            items = out.items.len(),
            errors = out.errors.len(),
            "search collection finished"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_results_win_over_citations() {
        let body: SearchResponse = serde_json::from_value(json!({
            "search_results": [
                {"url": "https://a.com/1", "title": "A one", "date": "2026-03-09"},
                {"title": "no url"},
                {"link": "https://b.com/2", "snippet": "bee"}
            ],
            "citations": ["https://ignored.com"]
        }))
        .unwrap();
        let r = extract_results(body, 8);
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].title, "A one");
        assert!(r[0].published_date.is_some());
        assert_eq!(r[1].title, "https://b.com/2");
        assert_eq!(r[1].snippet.as_deref(), Some("bee"));
    }

    #[test]
    fn citations_fallback_uses_answer_text() {
        let body: SearchResponse = serde_json::from_value(json!({
            "citations": ["https://www.x.com/a", 3, " "],
            "choices": [{"message": {"content": "Answer."}}]
        }))
        .unwrap();
        let r = extract_results(body, 8);
        assert_eq!(r.len(), 1);
        let raw = r.into_iter().next().unwrap().into_raw();
        assert_eq!(raw.source, "www.x.com");
        assert_eq!(raw.summary, "Answer.");
    }
}
