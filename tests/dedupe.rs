// tests/dedupe.rs
mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use silvertree_newsletter::agents::dedupe::DedupeAgent;
use silvertree_newsletter::config::DedupeSettings;
use silvertree_newsletter::llm::LlmClient;
use silvertree_newsletter::model::{DealType, ItemCategory, RawNewsItem, RelevanceLevel, TriagedItem};

use common::*;

fn triaged(raw: RawNewsItem) -> TriagedItem {
    TriagedItem {
        raw_item: raw,
        is_relevant: true,
        category: ItemCategory::MajorDeal,
        deal_type: DealType::MaAcquisition,
        relevance_level: RelevanceLevel::High,
        confidence: 80,
        related_portfolio_company: None,
        related_competitors: vec![],
        related_sector: None,
        triage_reason: String::new(),
    }
}

/// Aggregator copy first, first-party copy second, same story.
fn pair() -> Vec<TriagedItem> {
    vec![
        triaged(raw(
            "Globex acquires Beta Analytics",
            "https://news.example.com/globex?utm_campaign=weekly",
            "perplexity",
            1,
        )),
        triaged(raw(
            "Globex acquires Beta Analytics",
            "https://news.example.com/globex#comments",
            "Example News",
            1,
        )),
        triaged(raw("Hooli ships new search", "https://hooli.example.com/launch", "Hooli", 2)),
    ]
}

struct NamesStranger;

#[async_trait]
impl LlmClient for NamesStranger {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        Ok(r#"{"keep_id": "not-in-group"}"#.to_string())
    }
    fn provider_name(&self) -> &'static str {
        "stranger"
    }
}

#[tokio::test]
async fn model_choice_is_kept_when_it_names_a_member() {
    let llm = ScriptedLlm::new();
    let agent = Arc::new(DedupeAgent::new(llm.clone(), 0, DedupeSettings::default()));
    let items = pair();
    let out = agent.dedupe(&items).await;

    assert_eq!(out.kept.len(), 2);
    // Scripted model keeps the first listed member, the aggregator copy.
    assert_eq!(out.kept[0].id(), items[0].id());
    assert_eq!(out.groups[0].canonical_id, items[0].id());
    assert_eq!(llm.calls("dedupe"), 1);
}

#[tokio::test]
async fn unknown_keep_id_falls_back_to_first_party_source() {
    let agent = Arc::new(DedupeAgent::new(Arc::new(NamesStranger), 0, DedupeSettings::default()));
    let items = pair();
    let out = agent.dedupe(&items).await;
    assert_eq!(out.kept[0].id(), items[1].id());
    assert_eq!(out.kept[1].id(), items[2].id());
    assert_eq!(out.stats.removed, 1);
}

#[tokio::test]
async fn llm_can_be_switched_off() {
    let llm = ScriptedLlm::new();
    let settings = DedupeSettings {
        use_llm: false,
        ..DedupeSettings::default()
    };
    let agent = Arc::new(DedupeAgent::new(llm.clone(), 0, settings));
    let out = agent.dedupe(&pair()).await;
    assert_eq!(out.kept[0].raw_item.source, "Example News");
    assert_eq!(llm.total_calls(), 0);
}
