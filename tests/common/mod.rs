// tests/common/mod.rs
// Shared doubles for the integration tests. Not every test file uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use silvertree_newsletter::config::Settings;
use silvertree_newsletter::ingest::content::ContentFetcher;
use silvertree_newsletter::ingest::item_id;
use silvertree_newsletter::ingest::types::NewsProvider;
use silvertree_newsletter::llm::{prompt_field, prompt_stage, LlmClient};
use silvertree_newsletter::model::RawNewsItem;
use silvertree_newsletter::notify::NewsletterSender;
use silvertree_newsletter::portfolio::PortfolioDirectory;
use silvertree_newsletter::workflow::{Collaborators, FixedClock};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

/// Deterministic LLM keyed on the prompt's `Task:` line and `Title:` field.
///
/// Title markers: `[skip]` not relevant, `[deal]` major deal, `[carve]` high
/// carve-out potential with a named target, `[fail]` transport error.
#[derive(Default)]
pub struct ScriptedLlm {
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, stage: &str) -> usize {
        self.calls.lock().get(stage).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

fn triage_reply(title: &str) -> Value {
    if title.contains("[skip]") {
        return json!({"is_relevant": false, "category": "not_relevant", "confidence": 90});
    }
    let (category, deal_type) = if title.contains("[deal]") || title.contains("[carve]") {
        ("major_deal", "ma_acquisition")
    } else {
        ("competitor", "product_launch")
    };
    json!({
        "is_relevant": true,
        "category": category,
        "deal_type": deal_type,
        "relevance_level": "high",
        "confidence": 80,
        "related_portfolio_company": null,
        "related_competitors": ["Globex"],
        "triage_reason": "scripted",
    })
}

fn analysis_reply(title: &str) -> Value {
    let mut v = json!({
        "why_it_matters": format!("Scripted view on {title}"),
        "strategic_implications": "Consolidation continues.",
        "impact_on_silvertree": "Watch closely.",
        "competitive_threat_level": "medium",
        "carve_out_potential": "n/a",
        "signal_score": 80,
        "evidence": ["scripted evidence"],
    });
    if title.contains("[carve]") {
        v["carve_out_potential"] = json!("high");
        v["carve_out_rationale"] = json!("Non-core payments unit");
        v["carve_out_target_units"] = json!(["Payments unit"]);
        v["key_entities"] = json!({"Initech": "target"});
    }
    v
}

/// Keeps the first id listed under `Items:`.
fn dedupe_reply(prompt: &str) -> Value {
    let keep = prompt
        .lines()
        .skip_while(|l| !l.starts_with("Items:"))
        .nth(1)
        .and_then(|l| serde_json::from_str::<Value>(l).ok())
        .and_then(|v| v.get(0).and_then(|i| i.get("id")).cloned())
        .unwrap_or(Value::Null);
    json!({"keep_id": keep, "reason": "scripted"})
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let stage = prompt_stage(prompt).unwrap_or("unknown").to_string();
        *self.calls.lock().entry(stage.clone()).or_default() += 1;
        let title = prompt_field(prompt, "Title").unwrap_or_default();
        if title.contains("[fail]") {
            bail!("scripted transport error");
        }
        let reply = match stage.as_str() {
            "triage" => triage_reply(title),
            "analysis" => analysis_reply(title),
            "dedupe" => dedupe_reply(prompt),
            "compose" => return Ok("• Scripted weekly summary.".to_string()),
            "carve_out_research" => json!({
                "deal_summary": format!("Research on {}", prompt_field(prompt, "Target").unwrap_or("?")),
                "potential_assets": ["Payments unit"],
                "separation_complexity": "medium",
                "estimated_separation_timeline_months": "6-9",
                "risks": ["Shared IT"],
                "confidence": "medium",
            }),
            _ => json!({}),
        };
        // Wrapped in prose and a fence like real completions.
        Ok(format!("Here you go:\n```json\n{reply}\n```"))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

pub fn raw(title: &str, url: &str, source: &str, days_ago: i64) -> RawNewsItem {
    RawNewsItem {
        id: item_id(url),
        title: title.to_string(),
        summary: format!("Summary of {title}"),
        source: source.to_string(),
        source_url: url.to_string(),
        published_date: Some(now() - Duration::days(days_ago)),
        full_text: None,
        full_text_source: None,
    }
}

pub struct StaticFeed {
    pub name: String,
    pub items: Vec<RawNewsItem>,
}

#[async_trait]
impl NewsProvider for StaticFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawNewsItem>> {
        Ok(self.items.clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

pub struct BrokenFeed;

#[async_trait]
impl NewsProvider for BrokenFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawNewsItem>> {
        bail!("connection reset")
    }
    fn name(&self) -> &str {
        "broken"
    }
}

/// Four items: a tracking-param duplicate pair, a carve-out candidate and
/// one irrelevant story; one more is outside the lookback window.
pub fn weekly_items() -> Vec<RawNewsItem> {
    vec![
        raw(
            "Globex acquires Beta Analytics [deal]",
            "https://news.example.com/globex-beta?utm_source=newsletter",
            "Example News",
            1,
        ),
        raw(
            "Globex acquires Beta Analytics [deal]",
            "https://news.example.com/globex-beta",
            "Example News",
            1,
        ),
        raw(
            "Initech weighs sale of payments unit [carve]",
            "https://markets.example.org/initech",
            "Markets Daily",
            2,
        ),
        raw("Local weather turns mild [skip]", "https://weather.example.net/a", "Weather", 0),
        raw("Stale story from last month", "https://old.example.com/x", "Archive", 40),
    ]
}

/// Page bodies keyed by URL; unknown URLs fail.
pub struct StaticPages(pub HashMap<String, String>);

#[async_trait]
impl ContentFetcher for StaticPages {
    async fn fetch(&self, url: &str) -> Result<String> {
        match self.0.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("404 for {url}"),
        }
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, Vec<String>)>>,
    pub fail: bool,
}

#[async_trait]
impl NewsletterSender for RecordingSender {
    async fn send_html(&self, subject: &str, html: &str, _from: &str, to: &[String]) -> Result<String> {
        if self.fail {
            bail!("smtp 550 mailbox unavailable");
        }
        assert!(html.starts_with("<!DOCTYPE html>"));
        self.sent.lock().push((subject.to_string(), to.to_vec()));
        Ok("<scripted@test>".to_string())
    }
}

/// Unthrottled settings writing into `root`.
pub fn test_settings(root: &Path) -> Settings {
    let mut s = Settings::default();
    s.llm.requests_per_minute = 0;
    s.llm.triage_workers = 3;
    s.llm.analysis_workers = 2;
    s.search.enabled = false;
    s.search.requests_per_minute = 0;
    s.search.lookback_days = 7;
    s.full_text.enabled = true;
    s.full_text.requests_per_minute = 0;
    s.full_text.min_chars = 10;
    s.carve_out_research.enabled = true;
    s.carve_out_research.requests_per_minute = 0;
    s.email.send = false;
    s.paths.output_dir = root.join("out");
    s.paths.checkpoint_dir = root.join("checkpoints");
    s
}

pub fn pages() -> HashMap<String, String> {
    HashMap::from([(
        "https://markets.example.org/initech".to_string(),
        "Initech board reviews options for its payments unit including a sale.".to_string(),
    )])
}

pub fn collaborators(settings: Settings, llm: Arc<ScriptedLlm>, items: Vec<RawNewsItem>) -> Collaborators {
    Collaborators::new(settings, PortfolioDirectory::default(), llm)
        .with_feeds(vec![Box::new(StaticFeed {
            name: "fixture".into(),
            items,
        })])
        .with_content_fetcher(Arc::new(StaticPages(pages())))
        .with_clock(Arc::new(FixedClock(now())))
}

pub fn ids(items: &[RawNewsItem]) -> HashSet<String> {
    items.iter().map(|r| r.id.clone()).collect()
}
