// tests/ingest.rs
mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use silvertree_newsletter::config::{FullTextSettings, SearchSettings};
use silvertree_newsletter::ingest::content::fetch_full_texts;
use silvertree_newsletter::ingest::queries::{QueryKind, SearchQuery};
use silvertree_newsletter::ingest::search::{SearchCollector, SearchProvider, SearchResult};
use silvertree_newsletter::ingest::types::NewsProvider;
use silvertree_newsletter::ingest::{collect_feeds, filter_recent};
use silvertree_newsletter::retry::{HttpError, RetryPolicy};

use common::*;

/// Answers by query text: `auth` -> 401, `busy` -> one 429 then results.
#[derive(Default)]
struct ScriptedSearch {
    attempts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, HttpError> {
        let n = {
            let mut a = self.attempts.lock();
            let e = a.entry(query.text.clone()).or_default();
            *e += 1;
            *e
        };
        match query.text.as_str() {
            "auth" => Err(HttpError::Auth(401)),
            "busy" if n == 1 => Err(HttpError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            }),
            text => Ok(vec![
                SearchResult {
                    title: format!("{text} fresh"),
                    url: format!("https://news.example.com/{text}/fresh"),
                    snippet: Some("Fresh hit".into()),
                    source: None,
                    published_date: Some(now() - chrono::Duration::days(1)),
                },
                SearchResult {
                    title: format!("{text} undated"),
                    url: format!("https://news.example.com/{text}/undated"),
                    snippet: None,
                    source: Some("Wire".into()),
                    published_date: None,
                },
                SearchResult {
                    title: format!("{text} stale"),
                    url: format!("https://news.example.com/{text}/stale"),
                    snippet: None,
                    source: None,
                    published_date: Some(now() - chrono::Duration::days(30)),
                },
            ]),
        }
    }

    fn name(&self) -> &str {
        "scripted-search"
    }
}

fn query(text: &str) -> SearchQuery {
    SearchQuery::new(text.to_string(), QueryKind::Portfolio, Some("Acme".into()), 7)
}

#[tokio::test(start_paused = true)]
async fn search_retries_rate_limits_but_not_auth_and_filters_lookback() {
    let provider = Arc::new(ScriptedSearch::default());
    let cfg = SearchSettings {
        requests_per_minute: 0,
        max_concurrency: 2,
        lookback_days: 7,
        keep_undated: false,
        ..SearchSettings::default()
    };
    let collector = SearchCollector::new(provider.clone(), &cfg)
        .with_retry(RetryPolicy::new(3).with_base_delay(Duration::from_millis(100)));

    let out = collector
        .collect(vec![query("acme"), query("auth"), query("busy")], now())
        .await;

    assert_eq!(out.queries, 3);
    let titles: Vec<&str> = out.items.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["acme fresh", "busy fresh"]);
    assert_eq!(out.items[0].source, "news.example.com");
    assert_eq!(out.errors.len(), 1);
    assert!(out.errors[0].contains(&query("auth").id));

    let attempts = provider.attempts.lock();
    assert_eq!(attempts["auth"], 1);
    assert_eq!(attempts["busy"], 2);
}

#[tokio::test]
async fn feeds_collect_in_order_and_failures_become_errors() {
    let providers: Vec<Box<dyn NewsProvider>> = vec![
        Box::new(StaticFeed {
            name: "first".into(),
            items: weekly_items(),
        }),
        Box::new(BrokenFeed),
        Box::new(StaticFeed {
            name: "second".into(),
            items: vec![raw("Hooli ships search", "https://hooli.example.com/1", "Hooli", 0)],
        }),
    ];
    let (items, errors) = collect_feeds(&providers).await;
    assert_eq!(items.len(), 6);
    assert_eq!(items.last().unwrap().source, "Hooli");
    assert_eq!(errors.len(), 1);

    let recent = filter_recent(items, 7, true, now());
    assert_eq!(recent.len(), 5);
}

#[tokio::test]
async fn full_text_fetch_enforces_minimum_length_and_truncates() {
    let mut pages = pages();
    pages.insert("https://short.example.com/a".into(), "tiny".into());
    let cfg = FullTextSettings {
        requests_per_minute: 0,
        max_concurrency: 2,
        min_chars: 10,
        max_chars: 20,
        ..FullTextSettings::default()
    };
    let urls = vec![
        "https://markets.example.org/initech".to_string(),
        "https://short.example.com/a".to_string(),
        "https://missing.example.com/b".to_string(),
    ];
    let out = fetch_full_texts(Arc::new(StaticPages(pages)), urls, &cfg).await;
    assert_eq!(out.results.len(), 1);
    assert_eq!(out.results["https://markets.example.org/initech"].chars().count(), 20);
    assert_eq!(out.errors.len(), 2);
}
