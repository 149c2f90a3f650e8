// src/agents/analysis.rs
//! Deep analysis of relevant items and carve-out extraction.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::agents::triage::wire_names;
use crate::agents::{ask_json, StageAgent};
use crate::ingest::truncate_chars;
use crate::llm::coerce;
use crate::llm::json::JsonObject;
use crate::llm::DynLlm;
use crate::model::{
    AnalyzedItem, CarveOutOpportunity, CarveOutPotential, Priority, ThreatLevel, TriagedItem,
};
use crate::throttle::RateLimiter;

pub const ANALYSIS_FAILED: &str = "Analysis failed - manual review recommended.";
const PROMPT_FULL_TEXT_CHARS: usize = 4000;

pub struct AnalysisAgent {
    llm: DynLlm,
    limiter: RateLimiter,
    workers: usize,
    portfolio_context: String,
}

impl AnalysisAgent {
    pub fn new(llm: DynLlm, requests_per_minute: i64, workers: usize, portfolio_context: String) -> Self {
        Self {
            llm,
            limiter: RateLimiter::new(requests_per_minute),
            workers,
            portfolio_context,
        }
    }

    fn prompt(&self, item: &TriagedItem, context: Option<&str>) -> String {
        let raw = &item.raw_item;
        let date = raw
            .published_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let full_text = raw
            .full_text
            .as_deref()
            .map(|t| truncate_chars(t, PROMPT_FULL_TEXT_CHARS))
            .unwrap_or_else(|| "Not available.".to_string());
        let competitors = if item.related_competitors.is_empty() {
            "None".to_string()
        } else {
            item.related_competitors.join(", ")
        };
        let mut p = format!(
            "Task: analysis\n\
             Title: {}\n\
             Source: {}\n\
             Date: {date}\n\
             URL: {}\n\
             Category: {}\n\
             Deal type: {}\n\
             Portfolio company: {}\n\
             Competitors: {competitors}\n\
             Triage reason: {}\n\
             Summary: {}\n\n\
             Full text:\n{full_text}\n\n\
             Assess what this means for SilverTree Equity and flag carve-out potential.\n\n{}\n",
            raw.title,
            raw.source,
            raw.source_url,
            item.category,
            item.deal_type,
            item.related_portfolio_company.as_deref().unwrap_or("None"),
            item.triage_reason,
            raw.summary,
            self.portfolio_context,
        );
        if let Some(ctx) = context {
            p.push_str(&format!("\nItem context:\n{ctx}\n"));
        }
        p.push_str(&format!(
            "\nReply with one JSON object: why_it_matters, strategic_implications, \
             impact_on_silvertree, competitive_threat_level ({}), affected_portfolio_companies (list), \
             carve_out_potential ({}), carve_out_rationale, carve_out_target_units (list), \
             key_entities (name -> role), signal_score (0-100), evidence (list).",
            wire_names::<ThreatLevel>(),
            wire_names::<CarveOutPotential>(),
        ));
        p
    }
}

pub fn build_analyzed(item: &TriagedItem, obj: &JsonObject) -> AnalyzedItem {
    AnalyzedItem {
        triaged_item: item.clone(),
        why_it_matters: coerce::text(obj.get("why_it_matters"))
            .unwrap_or_else(|| "Analysis unavailable.".to_string()),
        strategic_implications: coerce::text(obj.get("strategic_implications")).unwrap_or_default(),
        impact_on_silvertree: coerce::text(obj.get("impact_on_silvertree")).unwrap_or_default(),
        competitive_threat_level: coerce::threat_level(obj.get("competitive_threat_level")),
        affected_portfolio_companies: coerce::list(obj.get("affected_portfolio_companies")),
        carve_out_potential: coerce::carve_out(obj.get("carve_out_potential")),
        carve_out_rationale: coerce::text(obj.get("carve_out_rationale")),
        carve_out_target_units: coerce::list(obj.get("carve_out_target_units")),
        key_entities: coerce::string_map(obj.get("key_entities")),
        signal_score: coerce::score(obj.get("signal_score"), 50),
        evidence: coerce::list(obj.get("evidence")),
    }
}

#[async_trait]
impl StageAgent for AnalysisAgent {
    type Input = TriagedItem;
    type Output = AnalyzedItem;

    fn stage(&self) -> &'static str {
        "analysis"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn attempt(&self, item: &TriagedItem, context: Option<&str>) -> Result<AnalyzedItem> {
        let obj = ask_json(self.llm.as_ref(), &self.limiter, &self.prompt(item, context)).await?;
        Ok(build_analyzed(item, &obj))
    }

    fn fallback(&self, item: &TriagedItem) -> AnalyzedItem {
        AnalyzedItem {
            triaged_item: item.clone(),
            why_it_matters: ANALYSIS_FAILED.to_string(),
            strategic_implications: String::new(),
            impact_on_silvertree: String::new(),
            competitive_threat_level: None,
            affected_portfolio_companies: Vec::new(),
            carve_out_potential: CarveOutPotential::NotApplicable,
            carve_out_rationale: None,
            carve_out_target_units: Vec::new(),
            key_entities: Default::default(),
            signal_score: 0,
            evidence: Vec::new(),
        }
    }
}

/// Opportunities for items with high/medium potential and named target units,
/// in input order.
pub fn extract_carve_outs(items: &[AnalyzedItem]) -> Vec<CarveOutOpportunity> {
    items
        .iter()
        .filter(|a| a.carve_out_potential.is_actionable())
        .filter_map(extract_carve_out)
        .collect()
}

pub fn extract_carve_out(item: &AnalyzedItem) -> Option<CarveOutOpportunity> {
    if item.carve_out_target_units.is_empty() {
        return None;
    }
    let title = &item.raw().title;
    let target = item
        .key_entities
        .iter()
        .find(|(_, role)| role.trim().eq_ignore_ascii_case("target"))
        .map(|(name, _)| name.clone())
        .or_else(|| guess_target_from_title(title))
        .or_else(|| title.split_whitespace().next().map(str::to_string))?;
    Some(CarveOutOpportunity {
        source_item: item.clone(),
        source_items: vec![item.clone()],
        target_company: target,
        potential_units: item.carve_out_target_units.clone(),
        strategic_fit_rationale: item.carve_out_rationale.clone().unwrap_or_default(),
        recommended_action: "Monitor for potential acquisition opportunity".to_string(),
        priority: if item.carve_out_potential == CarveOutPotential::High {
            Priority::High
        } else {
            Priority::Medium
        },
    })
}

static TARGET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "acquires", "acquired", "to acquire", "acquisition of", "merges with", "buying", "buys", "to buy",
    ]
    .iter()
    .filter_map(|verb| Regex::new(&format!(r"(?i)\b{verb}\s+(.+)")).ok())
    .collect()
});

static TARGET_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:for|from|in|at)\s+").expect("target tail regex"));

/// "Acme acquires Beta Analytics for $2B" -> "Beta Analytics".
pub fn guess_target_from_title(title: &str) -> Option<String> {
    TARGET_PATTERNS.iter().find_map(|re| {
        let rest = re.captures(title)?.get(1)?.as_str();
        let head = TARGET_TAIL.split(rest).next().unwrap_or(rest);
        let target = head.trim_matches(|c: char| c == ' ' || c == '-' || c == ':');
        (!target.is_empty()).then(|| target.to_string())
    })
}
