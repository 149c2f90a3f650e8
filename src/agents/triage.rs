// src/agents/triage.rs
//! Fast first-pass categorization of every collected item.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::{ask_json, StageAgent};
use crate::ingest::truncate_chars;
use crate::llm::coerce;
use crate::llm::json::JsonObject;
use crate::llm::DynLlm;
use crate::model::{DealType, ItemCategory, RawNewsItem, RelevanceLevel, TriagedItem, WireName};
use crate::throttle::RateLimiter;

pub const TRIAGE_FAILED: &str = "Triage failed - marked as not relevant";
const PROMPT_SUMMARY_CHARS: usize = 500;

pub struct TriageAgent {
    llm: DynLlm,
    limiter: RateLimiter,
    workers: usize,
    portfolio_context: String,
}

impl TriageAgent {
    pub fn new(llm: DynLlm, requests_per_minute: i64, workers: usize, portfolio_context: String) -> Self {
        Self {
            llm,
            limiter: RateLimiter::new(requests_per_minute),
            workers,
            portfolio_context,
        }
    }

    fn prompt(&self, item: &RawNewsItem, context: Option<&str>) -> String {
        let date = item
            .published_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut p = format!(
            "Task: triage\n\
             Title: {}\n\
             Source: {}\n\
             Date: {date}\n\
             URL: {}\n\
             Summary: {}\n\n\
             You screen news for SilverTree Equity. Decide whether the item matters to the \
             portfolio below and classify it.\n\n{}\n",
            item.title,
            item.source,
            item.source_url,
            truncate_chars(&item.summary, PROMPT_SUMMARY_CHARS),
            self.portfolio_context,
        );
        if let Some(ctx) = context {
            p.push_str(&format!("\nItem context:\n{ctx}\n"));
        }
        p.push_str(&format!(
            "\nReply with one JSON object: is_relevant (bool), category ({}), deal_type ({}), \
             relevance_level ({}), confidence (0-100), related_portfolio_company, \
             related_competitors (list), related_sector, triage_reason.",
            wire_names::<ItemCategory>(),
            wire_names::<DealType>(),
            wire_names::<RelevanceLevel>(),
        ));
        p
    }
}

pub(crate) fn wire_names<T: WireName>() -> String {
    T::ALL.iter().map(|v| v.wire_name()).collect::<Vec<_>>().join(" | ")
}

/// Decode a triage reply; every field falls back independently.
pub fn build_triaged(item: &RawNewsItem, obj: &JsonObject) -> TriagedItem {
    TriagedItem {
        raw_item: item.clone(),
        is_relevant: coerce::boolean(obj.get("is_relevant"), false),
        category: coerce::enum_or(obj.get("category"), ItemCategory::NotRelevant),
        deal_type: coerce::enum_or(obj.get("deal_type"), DealType::NotADeal),
        relevance_level: coerce::enum_or(obj.get("relevance_level"), RelevanceLevel::Low),
        confidence: coerce::score(obj.get("confidence"), 50),
        related_portfolio_company: coerce::text(obj.get("related_portfolio_company")),
        related_competitors: coerce::list(obj.get("related_competitors")),
        related_sector: coerce::text(obj.get("related_sector")),
        triage_reason: coerce::text(obj.get("triage_reason")).unwrap_or_default(),
    }
}

#[async_trait]
impl StageAgent for TriageAgent {
    type Input = RawNewsItem;
    type Output = TriagedItem;

    fn stage(&self) -> &'static str {
        "triage"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn attempt(&self, item: &RawNewsItem, context: Option<&str>) -> Result<TriagedItem> {
        let obj = ask_json(self.llm.as_ref(), &self.limiter, &self.prompt(item, context)).await?;
        Ok(build_triaged(item, &obj))
    }

    fn fallback(&self, item: &RawNewsItem) -> TriagedItem {
        TriagedItem {
            raw_item: item.clone(),
            is_relevant: false,
            category: ItemCategory::NotRelevant,
            deal_type: DealType::NotADeal,
            relevance_level: RelevanceLevel::Low,
            confidence: 0,
            related_portfolio_company: None,
            related_competitors: Vec::new(),
            related_sector: None,
            triage_reason: TRIAGE_FAILED.to_string(),
        }
    }
}

/// Counts reported in `triage_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageStats {
    pub total: usize,
    pub relevant: usize,
    pub by_category: BTreeMap<String, usize>,
    pub triage_failed: usize,
}

impl TriageStats {
    pub fn from_items(items: &[TriagedItem]) -> Self {
        let mut stats = TriageStats {
            total: items.len(),
            ..TriageStats::default()
        };
        for it in items {
            if it.is_relevant {
                stats.relevant += 1;
            }
            *stats
                .by_category
                .entry(it.category.wire_name().to_string())
                .or_default() += 1;
            if it.triage_reason == TRIAGE_FAILED {
                stats.triage_failed += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::json::extract_json;

    fn raw(title: &str) -> RawNewsItem {
        RawNewsItem {
            id: "id-1".into(),
            title: title.into(),
            summary: "x".repeat(900),
            source: "feed".into(),
            source_url: "https://a.com/1".into(),
            published_date: None,
            full_text: None,
            full_text_source: None,
        }
    }

    #[test]
    fn messy_reply_coerces_field_by_field() {
        let reply = "Sure!\n```json\n{\"is_relevant\": \"yes\", \"category\": \" Major_Deal \", \
                     \"deal_type\": \"hostile takeover\", \"confidence\": 140, \
                     \"related_competitors\": \"Beta, Gamma, Beta\", \"related_sector\": \"  \"}\n```";
        let t = build_triaged(&raw("Acme buys Beta"), &extract_json(reply));
        assert!(t.is_relevant);
        assert_eq!(t.category, ItemCategory::MajorDeal);
        assert_eq!(t.deal_type, DealType::NotADeal);
        assert_eq!(t.relevance_level, RelevanceLevel::Low);
        assert_eq!(t.confidence, 100);
        assert_eq!(t.related_competitors, vec!["Beta", "Gamma"]);
        assert_eq!(t.related_sector, None);
        assert_eq!(t.triage_reason, "");
    }

    #[test]
    fn prompt_carries_stage_header_and_truncated_summary() {
        let agent = TriageAgent::new(std::sync::Arc::new(crate::llm::MockLlm), 0, 1, "ctx".into());
        let p = agent.prompt(&raw("Acme buys Beta"), Some("extra"));
        assert_eq!(crate::llm::prompt_stage(&p), Some("triage"));
        assert_eq!(crate::llm::prompt_field(&p, "Title"), Some("Acme buys Beta"));
        assert_eq!(crate::llm::prompt_field(&p, "Summary").map(str::len), Some(500));
        assert!(p.contains("Item context:\nextra"));
    }

    #[tokio::test]
    async fn disabled_llm_falls_back() {
        let agent = TriageAgent::new(std::sync::Arc::new(crate::llm::DisabledClient), 0, 1, String::new());
        let t = agent.process_one(&raw("t"), None).await;
        assert!(!t.is_relevant);
        assert_eq!(t.confidence, 0);
        assert_eq!(TriageStats::from_items(&[t]).triage_failed, 1);
    }
}
