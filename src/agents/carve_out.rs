// src/agents/carve_out.rs
//! Carve-out research dossier: one sequential, paced LLM call per
//! opportunity, rendered to Markdown.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::{ask_json, run_batch, ProgressFn, StageAgent};
use crate::ingest::truncate_chars;
use crate::llm::json::JsonObject;
use crate::llm::{coerce, DynLlm};
use crate::model::{CarveOutOpportunity, Priority};
use crate::throttle::RateLimiter;

const MAX_SOURCES: usize = 20;
const MAX_FULL_TEXT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEntry {
    pub deal_summary: String,
    pub deal_overview: Option<String>,
    pub potential_assets: Vec<String>,
    /// low | medium | high | unknown
    pub separation_complexity: String,
    pub separation_drivers: Vec<String>,
    pub estimated_timeline_months: String,
    pub strategic_fit: Option<String>,
    pub what_silvertree_would_do: Option<String>,
    pub risks: Vec<String>,
    pub diligence_questions: Vec<String>,
    pub next_steps: Vec<String>,
    /// low | medium | high
    pub confidence: String,
    /// Set when the LLM produced nothing usable for this opportunity.
    pub unavailable: bool,
}

fn one_of(v: Option<&serde_json::Value>, allowed: &[&str], default: &str) -> String {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| allowed.contains(&s.as_str()))
        .unwrap_or_else(|| default.to_string())
}

pub fn build_entry(co: &CarveOutOpportunity, obj: &JsonObject) -> ResearchEntry {
    let assets = coerce::list(obj.get("potential_assets"));
    ResearchEntry {
        deal_summary: coerce::text(obj.get("deal_summary"))
            .unwrap_or_else(|| co.source_item.why_it_matters.clone()),
        deal_overview: coerce::text(obj.get("deal_overview")),
        potential_assets: if assets.is_empty() { co.potential_units.clone() } else { assets },
        separation_complexity: one_of(
            obj.get("separation_complexity"),
            &["low", "medium", "high", "unknown"],
            "unknown",
        ),
        separation_drivers: coerce::list(obj.get("separation_drivers")),
        estimated_timeline_months: coerce::text(obj.get("estimated_separation_timeline_months"))
            .unwrap_or_else(|| "unknown".to_string()),
        strategic_fit: coerce::text(obj.get("strategic_fit"))
            .or_else(|| Some(co.strategic_fit_rationale.clone()).filter(|s| !s.is_empty())),
        what_silvertree_would_do: coerce::text(obj.get("what_silvertree_would_do")),
        risks: coerce::list(obj.get("risks")),
        diligence_questions: coerce::list(obj.get("diligence_questions")),
        next_steps: coerce::list(obj.get("next_steps")),
        confidence: one_of(obj.get("confidence"), &["low", "medium", "high"], "medium"),
        unavailable: false,
    }
}

pub struct CarveOutResearchAgent {
    llm: DynLlm,
    limiter: RateLimiter,
}

impl CarveOutResearchAgent {
    pub fn new(llm: DynLlm, requests_per_minute: i64) -> Self {
        Self {
            llm,
            limiter: RateLimiter::new(requests_per_minute),
        }
    }

    fn prompt(co: &CarveOutOpportunity, context: Option<&str>) -> String {
        let src = &co.source_item;
        let candidate = json!({
            "target_company": co.target_company,
            "priority": if co.priority == Priority::High { "high" } else { "medium" },
            "potential_units": co.potential_units,
            "strategic_fit_rationale": co.strategic_fit_rationale,
            "recommended_action": co.recommended_action,
            "deal_type": src.triaged_item.deal_type.to_string(),
            "category": src.category().to_string(),
            "portfolio_company": src.triaged_item.related_portfolio_company,
            "why_it_matters": src.why_it_matters,
            "impact_on_silvertree": src.impact_on_silvertree,
            "signal_score": src.signal_score,
            "evidence": src.evidence,
            "key_entities": src.key_entities,
        });
        let sources: Vec<_> = co
            .source_items
            .iter()
            .take(MAX_SOURCES)
            .map(|a| {
                let raw = a.raw();
                json!({
                    "title": raw.title,
                    "source": raw.source,
                    "url": raw.source_url,
                    "published_date": raw.published_date.map(|d| d.to_rfc3339()),
                    "summary": raw.summary,
                    "full_text": raw
                        .full_text
                        .as_deref()
                        .map(|t| truncate_chars(t, MAX_FULL_TEXT_CHARS))
                        .unwrap_or_else(|| "Not available.".to_string()),
                })
            })
            .collect();
        let mut p = format!(
            "Task: carve_out_research\n\
             Target: {}\n\
             Prepare a carve-out research dossier using only the sources below. Say \"unknown\" \
             where the sources are silent.\n\n\
             Candidate:\n{candidate:#}\n\nSources:\n{:#}\n",
            co.target_company,
            serde_json::Value::Array(sources),
        );
        if let Some(ctx) = context {
            p.push_str(&format!("\nPlaybook context:\n{ctx}\n"));
        }
        p.push_str(
            "\nReply with one JSON object: deal_summary, deal_overview, potential_assets (list), \
             separation_complexity (low|medium|high|unknown), separation_drivers (list), \
             estimated_separation_timeline_months, strategic_fit, what_silvertree_would_do, \
             risks (list), diligence_questions (list), next_steps (list), confidence (low|medium|high).",
        );
        p
    }

    /// Markdown dossier for `carve_outs`; empty input gives an empty string.
    pub async fn generate_report(
        self: &Arc<Self>,
        carve_outs: &[CarveOutOpportunity],
        on_progress: Option<ProgressFn>,
        now: DateTime<Utc>,
    ) -> String {
        if carve_outs.is_empty() {
            return String::new();
        }
        let entries = run_batch(Arc::clone(self), carve_outs, on_progress, None).await;
        render_markdown(&entries, carve_outs, now)
    }
}

#[async_trait]
impl StageAgent for CarveOutResearchAgent {
    type Input = CarveOutOpportunity;
    type Output = ResearchEntry;

    fn stage(&self) -> &'static str {
        "carve_out_research"
    }

    fn workers(&self) -> usize {
        1
    }

    async fn attempt(&self, co: &CarveOutOpportunity, context: Option<&str>) -> Result<ResearchEntry> {
        let obj = ask_json(self.llm.as_ref(), &self.limiter, &Self::prompt(co, context)).await?;
        Ok(build_entry(co, &obj))
    }

    fn fallback(&self, co: &CarveOutOpportunity) -> ResearchEntry {
        ResearchEntry {
            deal_summary: co.source_item.why_it_matters.clone(),
            deal_overview: None,
            potential_assets: co.potential_units.clone(),
            separation_complexity: "unknown".into(),
            separation_drivers: Vec::new(),
            estimated_timeline_months: "unknown".into(),
            strategic_fit: Some(co.strategic_fit_rationale.clone()).filter(|s| !s.is_empty()),
            what_silvertree_would_do: None,
            risks: Vec::new(),
            diligence_questions: Vec::new(),
            next_steps: Vec::new(),
            confidence: "low".into(),
            unavailable: true,
        }
    }
}

fn bullets(lines: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(format!("### {heading}"));
    lines.extend(items.iter().map(|i| format!("- {i}")));
}

pub fn render_markdown(
    entries: &[ResearchEntry],
    carve_outs: &[CarveOutOpportunity],
    now: DateTime<Utc>,
) -> String {
    let mut lines = vec![
        "# Carve-Out Research Dossier".to_string(),
        String::new(),
        format!("Generated: {}", now.format("%Y-%m-%d %H:%M UTC")),
        format!("Total opportunities: {}", entries.len()),
    ];
    for (entry, co) in entries.iter().zip(carve_outs) {
        let raw = co.source_item.raw();
        let priority = if co.priority == Priority::High { "high" } else { "medium" };
        lines.push(String::new());
        lines.push(format!("## {} ({priority} priority)", co.target_company));
        lines.push(format!("- Deal headline: {}", raw.title));
        if !raw.source_url.is_empty() {
            lines.push(format!("- Primary source: {}", raw.source_url));
        }
        if !co.potential_units.is_empty() {
            lines.push(format!("- Potential units: {}", co.potential_units.join(", ")));
        }
        if entry.unavailable {
            lines.push(String::new());
            lines.push("_Research unavailable; summary taken from the analysis._".to_string());
        }
        lines.push(String::new());
        lines.push("### Deal Summary".to_string());
        lines.push(entry.deal_summary.clone());
        if let Some(o) = &entry.deal_overview {
            lines.push(String::new());
            lines.push("### Deal Overview".to_string());
            lines.push(o.clone());
        }
        if entry.potential_assets.is_empty() {
            bullets(&mut lines, "Potential Carve-Out Assets", &["unknown".to_string()]);
        } else {
            bullets(&mut lines, "Potential Carve-Out Assets", &entry.potential_assets);
        }
        lines.push(String::new());
        lines.push("### Separation Complexity".to_string());
        lines.push(format!("- Rating: {}", entry.separation_complexity));
        if !entry.separation_drivers.is_empty() {
            lines.push(format!("- Drivers: {}", entry.separation_drivers.join(", ")));
        }
        lines.push(format!("- Estimated timeline (months): {}", entry.estimated_timeline_months));
        if let Some(fit) = &entry.strategic_fit {
            lines.push(String::new());
            lines.push("### Strategic Fit".to_string());
            lines.push(fit.clone());
        }
        if let Some(w) = &entry.what_silvertree_would_do {
            lines.push(String::new());
            lines.push("### What SilverTree Would Do".to_string());
            lines.push(w.clone());
        }
        bullets(&mut lines, "Risks and Constraints", &entry.risks);
        bullets(&mut lines, "Diligence Questions", &entry.diligence_questions);
        bullets(&mut lines, "Next Steps", &entry.next_steps);
        let sources: Vec<String> = co
            .source_items
            .iter()
            .map(|a| format!("{} ({})", a.raw().title, a.raw().source_url))
            .collect();
        bullets(&mut lines, "Sources", &sources);
        lines.push(String::new());
        lines.push(format!("Confidence: {}", entry.confidence));
    }
    lines.join("\n").trim().to_string()
}
