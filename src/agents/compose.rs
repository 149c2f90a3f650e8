// src/agents/compose.rs
//! Newsletter composition: sections, provenance, carve-out merging and the
//! executive summary.
//!
//! Section content is deterministic. Only the executive summary goes through
//! the LLM, with a template summary as the fallback.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::agents::dedupe::canonical_url;
use crate::agents::StageAgent;
use crate::ingest::domain_of;
use crate::llm::json::extract_json;
use crate::llm::{coerce, DynLlm};
use crate::model::{
    AnalyzedItem, CarveOutOpportunity, DuplicateGroup, ItemCategory, Newsletter, NewsletterGroup,
    NewsletterItem, NewsletterSection, Priority, SourceLink,
};
use crate::portfolio::PortfolioDirectory;
use crate::throttle::RateLimiter;

pub const PORTFOLIO_TITLE: &str = "Portfolio Company Signals";
pub const COMPETITIVE_TITLE: &str = "Competitive Cluster Signals";
pub const DEALS_TITLE: &str = "Major Deals & Market Activity";
pub const CARVE_OUT_TITLE: &str = "Carve-Out Opportunities";
const SUMMARY_ITEMS: usize = 10;
const TEMPLATE_BULLETS: usize = 5;

#[derive(Debug, Clone)]
pub struct ComposeInput {
    pub items: Vec<AnalyzedItem>,
    pub carve_outs: Vec<CarveOutOpportunity>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub total_processed: usize,
    pub lookback_days: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    pub newsletter: Newsletter,
    /// Carve-outs after merging opportunities that share a target.
    pub carve_outs: Vec<CarveOutOpportunity>,
}

pub struct ComposeAgent {
    llm: DynLlm,
    limiter: RateLimiter,
    directory: Arc<PortfolioDirectory>,
}

impl ComposeAgent {
    pub fn new(llm: DynLlm, requests_per_minute: i64, directory: Arc<PortfolioDirectory>) -> Self {
        Self {
            llm,
            limiter: RateLimiter::new(requests_per_minute),
            directory,
        }
    }

    pub async fn compose(&self, input: &ComposeInput) -> ComposeOutcome {
        let carve_outs = merge_carve_outs(&input.carve_outs);
        let summary_input = ComposeInput {
            carve_outs: carve_outs.clone(),
            ..input.clone()
        };
        let executive_summary = self.process_one(&summary_input, None).await;

        let by_category = |cats: &[ItemCategory]| -> Vec<NewsletterItem> {
            input
                .items
                .iter()
                .filter(|a| cats.contains(&a.category()))
                .map(|a| self.newsletter_item(a, &input.duplicate_groups))
                .collect()
        };
        let portfolio = grouped_section(
            PORTFOLIO_TITLE,
            by_category(&[ItemCategory::Portfolio]),
            |it| it.portfolio_company.clone(),
        );
        let competitive = grouped_section(
            COMPETITIVE_TITLE,
            by_category(&[ItemCategory::Competitor, ItemCategory::Industry]),
            |it| it.cluster.clone(),
        );
        let deals = grouped_section(
            DEALS_TITLE,
            by_category(&[ItemCategory::MajorDeal]),
            |it| it.cluster.clone(),
        );
        let carve_out = (!carve_outs.is_empty()).then(|| carve_out_section(&carve_outs));

        let now = input.now;
        let newsletter = Newsletter {
            subject: format!("SilverTree Weekly M&A Signals - {}", now.format("%B %d, %Y")),
            generated_at: now,
            period_start: now - ChronoDuration::days(input.lookback_days.max(0)),
            period_end: now,
            executive_summary,
            portfolio,
            competitive,
            deals,
            carve_out,
            total_items_processed: input.total_processed,
            total_relevant_items: input.items.len(),
        };
        tracing::info!(
            target: "compose",
            items = newsletter.total_relevant_items,
            carve_outs = carve_outs.len(),
            "newsletter composed"
        );
        ComposeOutcome {
            newsletter,
            carve_outs,
        }
    }

    fn newsletter_item(&self, item: &AnalyzedItem, groups: &[DuplicateGroup]) -> NewsletterItem {
        let raw = item.raw();
        let (sources, source_item_ids) = provenance(item, groups);
        let impact = if item.impact_on_silvertree.is_empty() {
            item.triaged_item.triage_reason.clone()
        } else {
            item.impact_on_silvertree.clone()
        };
        NewsletterItem {
            headline: raw.title.clone(),
            summary: item.why_it_matters.clone(),
            impact_on_silvertree: impact,
            category: item.category(),
            deal_type: item.triaged_item.deal_type,
            portfolio_company: self.directory.resolve_portfolio_company(&item.triaged_item),
            cluster: self.directory.resolve_cluster(&item.triaged_item),
            signal_score: item.signal_score,
            primary_date: raw.published_date,
            sources,
            source_item_ids,
        }
    }

    fn summary_prompt(input: &ComposeInput) -> String {
        let mut ranked: Vec<&AnalyzedItem> = input.items.iter().collect();
        ranked.sort_by(|a, b| b.signal_score.cmp(&a.signal_score));
        let news: Vec<String> = ranked
            .iter()
            .take(SUMMARY_ITEMS)
            .map(|a| format!("- [{}] {}: {}", a.category(), a.raw().title, a.why_it_matters))
            .collect();
        let carve: Vec<String> = input
            .carve_outs
            .iter()
            .map(|c| {
                format!(
                    "- {}: {} ({} priority)",
                    c.target_company,
                    c.potential_units.join(", "),
                    priority_label(c.priority)
                )
            })
            .collect();
        format!(
            "Task: compose\n\
             Write 3-5 one-sentence bullets (starting with \"• \") summarizing this week's key \
             signals for SilverTree Equity partners. Name companies and deals; use only the facts below.\n\n\
             News:\n{}\n\n\
             Carve-outs:\n{}",
            if news.is_empty() { "No significant news this week.".to_string() } else { news.join("\n") },
            if carve.is_empty() {
                "No carve-out opportunities identified.".to_string()
            } else {
                carve.join("\n")
            },
        )
    }
}

#[async_trait]
impl StageAgent for ComposeAgent {
    type Input = ComposeInput;
    type Output = String;

    fn stage(&self) -> &'static str {
        "compose"
    }

    fn workers(&self) -> usize {
        1
    }

    /// Plain-text bullets are taken as-is; a JSON reply must carry `executive_summary`.
    async fn attempt(&self, input: &ComposeInput, _context: Option<&str>) -> Result<String> {
        if !self.llm.is_available() {
            anyhow::bail!("LLM unavailable ({})", self.llm.provider_name());
        }
        self.limiter.wait().await;
        let reply = self.llm.invoke(&Self::summary_prompt(input)).await?;
        let trimmed = reply.trim();
        let text = if trimmed.starts_with('{') || trimmed.starts_with("```") {
            coerce::text(extract_json(trimmed).get("executive_summary"))
        } else {
            coerce::text(Some(&serde_json::Value::String(trimmed.to_string())))
        };
        Ok(text.unwrap_or_else(|| template_summary(input)))
    }

    fn fallback(&self, input: &ComposeInput) -> String {
        template_summary(input)
    }
}

/// Top items by score as bullets, plus a carve-out line.
pub fn template_summary(input: &ComposeInput) -> String {
    if input.items.is_empty() && input.carve_outs.is_empty() {
        return "• No significant news this week.".to_string();
    }
    let mut ranked: Vec<&AnalyzedItem> = input.items.iter().collect();
    ranked.sort_by(|a, b| b.signal_score.cmp(&a.signal_score));
    let mut lines: Vec<String> = ranked
        .iter()
        .take(TEMPLATE_BULLETS)
        .map(|a| format!("• {}: {}", a.raw().title, a.why_it_matters))
        .collect();
    if !input.carve_outs.is_empty() {
        let targets: Vec<&str> = input.carve_outs.iter().map(|c| c.target_company.as_str()).collect();
        lines.push(format!(
            "• {} potential carve-out opportunities: {}",
            input.carve_outs.len(),
            targets.join(", ")
        ));
    }
    lines.join("\n")
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::High => "high",
        Priority::Medium => "medium",
    }
}

/// Links and ids for an item, widened to every article merged into it by dedupe.
fn provenance(item: &AnalyzedItem, groups: &[DuplicateGroup]) -> (Vec<SourceLink>, Vec<String>) {
    let own = item.raw().link();
    match groups.iter().find(|g| g.canonical_id == item.id()) {
        Some(g) => {
            let mut links = vec![own];
            links.extend(g.sources.iter().cloned());
            let mut ids = vec![item.id().to_string()];
            ids.extend(g.member_ids.iter().filter(|id| *id != item.id()).cloned());
            (dedupe_links(links), ids)
        }
        None => (dedupe_links(vec![own]), vec![item.id().to_string()]),
    }
}

/// One link per canonical URL; labels fall back to the domain. Several
/// articles from the same outlet all stay listed.
pub fn dedupe_links(links: Vec<SourceLink>) -> Vec<SourceLink> {
    let mut seen_urls = HashSet::new();
    let mut out = Vec::new();
    for link in links {
        let url = link.url.trim().to_string();
        if !url.is_empty() && !seen_urls.insert(canonical_url(&url)) {
            continue;
        }
        let label = link
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| Some(domain_of(&url)).filter(|d| !d.is_empty()))
            .unwrap_or_else(|| "source".to_string());
        out.push(SourceLink {
            title: link.title,
            url,
            source: Some(label),
        });
    }
    out
}

/// Groups in first-appearance order; items without a key land in "Other".
fn grouped_section(
    title: &str,
    items: Vec<NewsletterItem>,
    key: impl Fn(&NewsletterItem) -> Option<String>,
) -> NewsletterSection {
    let mut groups: Vec<NewsletterGroup> = Vec::new();
    for it in items {
        let name = key(&it)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "Other".to_string());
        match groups.iter_mut().find(|g| g.name == name) {
            Some(g) => g.items.push(it),
            None => groups.push(NewsletterGroup { name, items: vec![it] }),
        }
    }
    NewsletterSection {
        title: title.to_string(),
        groups,
        summary: None,
    }
}

fn carve_out_section(carve_outs: &[CarveOutOpportunity]) -> NewsletterSection {
    let items = carve_outs
        .iter()
        .map(|co| {
            let primary = &co.source_item;
            let first = co.source_items.first().unwrap_or(primary);
            let raw = first.raw();
            let impact = if primary.impact_on_silvertree.is_empty() {
                primary.triaged_item.triage_reason.clone()
            } else {
                primary.impact_on_silvertree.clone()
            };
            NewsletterItem {
                headline: raw.title.clone(),
                summary: if co.strategic_fit_rationale.is_empty() {
                    primary.why_it_matters.clone()
                } else {
                    co.strategic_fit_rationale.clone()
                },
                impact_on_silvertree: impact,
                category: primary.category(),
                deal_type: primary.triaged_item.deal_type,
                portfolio_company: primary.triaged_item.related_portfolio_company.clone(),
                cluster: None,
                signal_score: primary.signal_score,
                primary_date: raw.published_date,
                sources: dedupe_links(co.source_items.iter().map(|a| a.raw().link()).collect()),
                source_item_ids: co.source_ids(),
            }
        })
        .collect();
    let mut section = grouped_section(CARVE_OUT_TITLE, items, |it| it.portfolio_company.clone());
    section.summary = Some(format!(
        "{} potential carve-out opportunities identified.",
        carve_outs.len()
    ));
    section
}

static COMPANY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(inc|ltd|llc|plc|corp|corporation|group|holdings|company|co)\b")
        .expect("company suffix regex")
});

/// Lowercase alphanumerics with legal suffixes removed.
pub fn normalize_company_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    COMPANY_SUFFIX
        .replace_all(&lowered, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::High => 2,
        Priority::Medium => 1,
    }
}

/// Merge opportunities naming the same target. The strongest one (priority,
/// then score) leads; sources and units are unioned; priority is the highest.
pub fn merge_carve_outs(carve_outs: &[CarveOutOpportunity]) -> Vec<CarveOutOpportunity> {
    let mut keyed: Vec<(String, Vec<&CarveOutOpportunity>)> = Vec::new();
    for co in carve_outs {
        let mut key = normalize_company_name(&co.target_company);
        if key.is_empty() {
            key = normalize_company_name(&co.source_item.raw().title);
        }
        if key.is_empty() {
            key = co.target_company.clone();
        }
        match keyed.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(co),
            None => keyed.push((key, vec![co])),
        }
    }

    keyed
        .into_iter()
        .map(|(_, group)| {
            let mut primary = group[0];
            for co in &group[1..] {
                if (priority_rank(co.priority), co.source_item.signal_score)
                    > (priority_rank(primary.priority), primary.source_item.signal_score)
                {
                    primary = co;
                }
            }
            let mut seen = HashSet::new();
            let mut source_items = Vec::new();
            for co in &group {
                let members = if co.source_items.is_empty() {
                    std::slice::from_ref(&co.source_item)
                } else {
                    co.source_items.as_slice()
                };
                for it in members {
                    if seen.insert(it.id().to_string()) {
                        source_items.push(it.clone());
                    }
                }
            }
            let mut unit_keys = HashSet::new();
            let units: Vec<String> = group
                .iter()
                .flat_map(|co| co.potential_units.iter())
                .filter(|u| unit_keys.insert(u.to_lowercase()))
                .cloned()
                .collect();
            CarveOutOpportunity {
                source_item: primary.source_item.clone(),
                source_items,
                target_company: primary.target_company.clone(),
                potential_units: units,
                strategic_fit_rationale: primary.strategic_fit_rationale.clone(),
                recommended_action: primary.recommended_action.clone(),
                priority: group.iter().map(|c| c.priority).max().unwrap_or(Priority::Medium),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CarveOutPotential, DealType, RawNewsItem, RelevanceLevel, TriagedItem};

    fn analyzed(id: &str, title: &str, category: ItemCategory, score: u8) -> AnalyzedItem {
        AnalyzedItem {
            triaged_item: TriagedItem {
                raw_item: RawNewsItem {
                    id: id.into(),
                    title: title.into(),
                    summary: String::new(),
                    source: format!("src-{id}"),
                    source_url: format!("https://{id}.com/a"),
                    published_date: None,
                    full_text: None,
                    full_text_source: None,
                },
                is_relevant: true,
                category,
                deal_type: DealType::NotADeal,
                relevance_level: RelevanceLevel::High,
                confidence: 70,
                related_portfolio_company: None,
                related_competitors: vec![],
                related_sector: None,
                triage_reason: "reason".into(),
            },
            why_it_matters: format!("why {id}"),
            strategic_implications: String::new(),
            impact_on_silvertree: String::new(),
            competitive_threat_level: None,
            affected_portfolio_companies: vec![],
            carve_out_potential: CarveOutPotential::High,
            carve_out_rationale: None,
            carve_out_target_units: vec![],
            key_entities: Default::default(),
            signal_score: score,
            evidence: vec![],
        }
    }

    fn carve(item: AnalyzedItem, target: &str, units: &[&str], priority: Priority) -> CarveOutOpportunity {
        CarveOutOpportunity {
            source_items: vec![item.clone()],
            source_item: item,
            target_company: target.into(),
            potential_units: units.iter().map(|s| s.to_string()).collect(),
            strategic_fit_rationale: String::new(),
            recommended_action: "Monitor".into(),
            priority,
        }
    }

    #[test]
    fn company_names_normalize() {
        assert_eq!(normalize_company_name("Beta Holdings, Inc."), "beta");
        assert_eq!(normalize_company_name("Coca-Cola Co"), "coca cola");
    }

    #[test]
    fn carve_outs_merge_by_target() {
        let a = carve(analyzed("a", "t", ItemCategory::MajorDeal, 40), "Beta Inc", &["Ops"], Priority::Medium);
        let b = carve(analyzed("b", "t", ItemCategory::MajorDeal, 70), "beta", &["ops", "Labs"], Priority::Medium);
        let c = carve(analyzed("c", "t", ItemCategory::MajorDeal, 10), "Gamma", &["X"], Priority::High);
        let merged = merge_carve_outs(&[a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_item.id(), "b");
        assert_eq!(merged[0].source_ids(), vec!["b", "a"]);
        assert_eq!(merged[0].potential_units, vec!["Ops", "Labs"]);
        assert_eq!(merged[1].priority, Priority::High);
    }

    #[test]
    fn links_dedupe_by_canonical_url_only() {
        let link = |url: &str, source: Option<&str>| SourceLink {
            title: "t".into(),
            url: url.into(),
            source: source.map(str::to_string),
        };
        let out = dedupe_links(vec![
            link("https://a.com/1", Some("A")),
            link("https://a.com/1?utm_source=mail", Some("Other")),
            link("https://a.com/2", Some("a")),
            link("https://b.com/1", None),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].url, "https://a.com/2");
        assert_eq!(out[2].source.as_deref(), Some("b.com"));
    }

    #[test]
    fn merged_item_keeps_every_link_from_one_outlet() {
        let mut item = analyzed("a", "Acme buys Beta", ItemCategory::MajorDeal, 80);
        item.triaged_item.raw_item.source = "Reuters".into();
        item.triaged_item.raw_item.source_url = "https://reuters.com/a".into();
        let link = |id: &str| SourceLink {
            title: "Acme buys Beta".into(),
            url: format!("https://reuters.com/{id}"),
            source: Some("Reuters".into()),
        };
        let group = DuplicateGroup {
            canonical_id: "a".into(),
            member_ids: vec!["a".into(), "b".into(), "c".into()],
            sources: vec![link("a"), link("b"), link("c")],
        };
        let (links, ids) = provenance(&item, &[group]);
        assert_eq!(ids, vec!["a", "b", "c"]);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://reuters.com/a", "https://reuters.com/b", "https://reuters.com/c"]);
    }

    #[tokio::test]
    async fn sections_keep_provenance_and_fallback_summary() {
        let agent = ComposeAgent::new(
            Arc::new(crate::llm::DisabledClient),
            0,
            Arc::new(PortfolioDirectory::default()),
        );
        let deal = analyzed("d", "Acme buys Beta", ItemCategory::MajorDeal, 80);
        let comp = analyzed("c", "Rival launches", ItemCategory::Competitor, 60);
        let group = DuplicateGroup {
            canonical_id: "d".into(),
            member_ids: vec!["x".into(), "d".into()],
            sources: vec![
                SourceLink { title: "dup".into(), url: "https://x.com/a".into(), source: Some("x".into()) },
                deal.raw().link(),
            ],
        };
        let input = ComposeInput {
            items: vec![deal.clone(), comp],
            carve_outs: vec![carve(deal, "Beta", &["Ops"], Priority::High)],
            duplicate_groups: vec![group],
            total_processed: 9,
            lookback_days: 7,
            now: DateTime::parse_from_rfc3339("2026-03-10T09:00:00Z").unwrap().with_timezone(&Utc),
        };
        let out = agent.compose(&input).await;
        let n = &out.newsletter;
        assert_eq!(n.subject, "SilverTree Weekly M&A Signals - March 10, 2026");
        assert_eq!(n.total_items_processed, 9);
        assert_eq!(n.deals.len(), 1);
        assert_eq!(n.competitive.groups[0].name, "Other");
        let bullet = n.deals.items().next().unwrap();
        assert_eq!(bullet.source_item_ids, vec!["d", "x"]);
        assert_eq!(bullet.sources.len(), 2);
        assert_eq!(bullet.impact_on_silvertree, "reason");
        assert!(n.executive_summary.starts_with("• Acme buys Beta: why d"));
        assert_eq!(n.carve_out.as_ref().map(|s| s.len()), Some(1));
        assert_eq!(n.period_end - n.period_start, ChronoDuration::days(7));
    }
}
