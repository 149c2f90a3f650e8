// src/model.rs
//! Typed records that flow through the pipeline.
//!
//! Each stage wraps the previous stage's value instead of mutating it:
//! `AnalyzedItem` owns a `TriagedItem`, which owns a `RawNewsItem`. Anything that
//! merges several items (dedupe groups, carve-outs, newsletter bullets) keeps an
//! explicit list of source ids for provenance.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Enums
// ------------------------------------------------------------

/// Category assigned by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Portfolio,
    Competitor,
    MajorDeal,
    Industry,
    NotRelevant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    MaAcquisition,
    MaMerger,
    Divestiture,
    Fundraising,
    Ipo,
    Partnership,
    ProductLaunch,
    PersonnelChange,
    StrategicUpdate,
    NotADeal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarveOutPotential {
    #[serde(rename = "high")]
    High,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "n/a")]
    NotApplicable,
}

impl CarveOutPotential {
    /// High and medium potential are worth surfacing as opportunities.
    pub fn is_actionable(self) -> bool {
        matches!(self, CarveOutPotential::High | CarveOutPotential::Medium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Medium,
    High,
}

/// Wire names, shared by prompts, coercion and logs.
pub trait WireName: Sized + Copy + 'static {
    const ALL: &'static [Self];
    fn wire_name(self) -> &'static str;
}

impl WireName for ItemCategory {
    const ALL: &'static [Self] = &[
        ItemCategory::Portfolio,
        ItemCategory::Competitor,
        ItemCategory::MajorDeal,
        ItemCategory::Industry,
        ItemCategory::NotRelevant,
    ];
    fn wire_name(self) -> &'static str {
        match self {
            ItemCategory::Portfolio => "portfolio",
            ItemCategory::Competitor => "competitor",
            ItemCategory::MajorDeal => "major_deal",
            ItemCategory::Industry => "industry",
            ItemCategory::NotRelevant => "not_relevant",
        }
    }
}

impl WireName for DealType {
    const ALL: &'static [Self] = &[
        DealType::MaAcquisition,
        DealType::MaMerger,
        DealType::Divestiture,
        DealType::Fundraising,
        DealType::Ipo,
        DealType::Partnership,
        DealType::ProductLaunch,
        DealType::PersonnelChange,
        DealType::StrategicUpdate,
        DealType::NotADeal,
    ];
    fn wire_name(self) -> &'static str {
        match self {
            DealType::MaAcquisition => "ma_acquisition",
            DealType::MaMerger => "ma_merger",
            DealType::Divestiture => "divestiture",
            DealType::Fundraising => "fundraising",
            DealType::Ipo => "ipo",
            DealType::Partnership => "partnership",
            DealType::ProductLaunch => "product_launch",
            DealType::PersonnelChange => "personnel_change",
            DealType::StrategicUpdate => "strategic_update",
            DealType::NotADeal => "not_a_deal",
        }
    }
}

impl WireName for RelevanceLevel {
    const ALL: &'static [Self] = &[RelevanceLevel::High, RelevanceLevel::Medium, RelevanceLevel::Low];
    fn wire_name(self) -> &'static str {
        match self {
            RelevanceLevel::High => "high",
            RelevanceLevel::Medium => "medium",
            RelevanceLevel::Low => "low",
        }
    }
}

impl WireName for CarveOutPotential {
    const ALL: &'static [Self] = &[
        CarveOutPotential::High,
        CarveOutPotential::Medium,
        CarveOutPotential::Low,
        CarveOutPotential::None,
        CarveOutPotential::NotApplicable,
    ];
    fn wire_name(self) -> &'static str {
        match self {
            CarveOutPotential::High => "high",
            CarveOutPotential::Medium => "medium",
            CarveOutPotential::Low => "low",
            CarveOutPotential::None => "none",
            CarveOutPotential::NotApplicable => "n/a",
        }
    }
}

impl WireName for ThreatLevel {
    const ALL: &'static [Self] = &[ThreatLevel::High, ThreatLevel::Medium, ThreatLevel::Low];
    fn wire_name(self) -> &'static str {
        match self {
            ThreatLevel::High => "high",
            ThreatLevel::Medium => "medium",
            ThreatLevel::Low => "low",
        }
    }
}

impl WireName for Priority {
    const ALL: &'static [Self] = &[Priority::High, Priority::Medium];
    fn wire_name(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ------------------------------------------------------------
// Stage records
// ------------------------------------------------------------

/// Raw news item from collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNewsItem {
    /// SHA-256 hex of the source URL.
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub source_url: String,
    pub published_date: Option<DateTime<Utc>>,
    pub full_text: Option<String>,
    pub full_text_source: Option<String>,
}

impl RawNewsItem {
    /// Copy of this item carrying fetched article text.
    pub fn with_full_text(&self, text: String, source: String) -> Self {
        Self {
            full_text: Some(text),
            full_text_source: Some(source),
            ..self.clone()
        }
    }

    pub fn link(&self) -> SourceLink {
        SourceLink {
            title: self.title.clone(),
            url: self.source_url.clone(),
            source: Some(self.source.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriagedItem {
    pub raw_item: RawNewsItem,
    pub is_relevant: bool,
    pub category: ItemCategory,
    pub deal_type: DealType,
    pub relevance_level: RelevanceLevel,
    /// 0..=100
    pub confidence: u8,
    pub related_portfolio_company: Option<String>,
    pub related_competitors: Vec<String>,
    pub related_sector: Option<String>,
    pub triage_reason: String,
}

impl TriagedItem {
    pub fn id(&self) -> &str {
        &self.raw_item.id
    }

    /// Copy wrapping an enriched raw item.
    pub fn with_raw(&self, raw_item: RawNewsItem) -> Self {
        Self {
            raw_item,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedItem {
    pub triaged_item: TriagedItem,
    pub why_it_matters: String,
    pub strategic_implications: String,
    pub impact_on_silvertree: String,
    pub competitive_threat_level: Option<ThreatLevel>,
    pub affected_portfolio_companies: Vec<String>,
    pub carve_out_potential: CarveOutPotential,
    pub carve_out_rationale: Option<String>,
    pub carve_out_target_units: Vec<String>,
    pub key_entities: BTreeMap<String, String>,
    /// Always within 0..=100.
    pub signal_score: u8,
    pub evidence: Vec<String>,
}

impl AnalyzedItem {
    pub fn id(&self) -> &str {
        self.triaged_item.id()
    }

    pub fn raw(&self) -> &RawNewsItem {
        &self.triaged_item.raw_item
    }

    pub fn category(&self) -> ItemCategory {
        self.triaged_item.category
    }
}

/// Carve-out opportunity derived from one or more analyzed items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarveOutOpportunity {
    pub source_item: AnalyzedItem,
    /// Every contributing item, `source_item` included.
    pub source_items: Vec<AnalyzedItem>,
    pub target_company: String,
    pub potential_units: Vec<String>,
    pub strategic_fit_rationale: String,
    pub recommended_action: String,
    pub priority: Priority,
}

impl CarveOutOpportunity {
    pub fn primary_id(&self) -> &str {
        self.source_item.id()
    }

    /// Ids of all contributing items, deduplicated, primary first.
    pub fn source_ids(&self) -> Vec<String> {
        let mut out = vec![self.source_item.id().to_string()];
        for it in &self.source_items {
            if !out.iter().any(|id| id == it.id()) {
                out.push(it.id().to_string());
            }
        }
        out
    }
}

/// Provenance of a dedupe merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub canonical_id: String,
    /// All member ids, canonical included, in input order.
    pub member_ids: Vec<String>,
    pub sources: Vec<SourceLink>,
}

// ------------------------------------------------------------
// Newsletter
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterItem {
    pub headline: String,
    pub summary: String,
    pub impact_on_silvertree: String,
    pub category: ItemCategory,
    pub deal_type: DealType,
    pub portfolio_company: Option<String>,
    pub cluster: Option<String>,
    pub signal_score: u8,
    pub primary_date: Option<DateTime<Utc>>,
    pub sources: Vec<SourceLink>,
    pub source_item_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterGroup {
    pub name: String,
    pub items: Vec<NewsletterItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSection {
    pub title: String,
    pub groups: Vec<NewsletterGroup>,
    pub summary: Option<String>,
}

impl NewsletterSection {
    pub fn empty(title: &str) -> Self {
        Self {
            title: title.to_string(),
            groups: Vec::new(),
            summary: None,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &NewsletterItem> {
        self.groups.iter().flat_map(|g| g.items.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Newsletter {
    pub subject: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub executive_summary: String,
    pub portfolio: NewsletterSection,
    pub competitive: NewsletterSection,
    pub deals: NewsletterSection,
    pub carve_out: Option<NewsletterSection>,
    pub total_items_processed: usize,
    pub total_relevant_items: usize,
}

impl Newsletter {
    pub fn sections(&self) -> impl Iterator<Item = &NewsletterSection> {
        [&self.portfolio, &self.competitive, &self.deals]
            .into_iter()
            .chain(self.carve_out.as_ref())
    }
}
