// src/ingest/queries.rs
//! Natural-language search queries built from the portfolio directory.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ingest::item_id;
use crate::portfolio::PortfolioDirectory;

const DEAL_TERMS: &[&str] = &["acquisition", "merger", "funding", "divestiture"];
const ACTIVITY_TERMS: &[&str] = &[
    "product launch",
    "new partnership",
    "executive appointment",
    "contract win",
];
const MAX_COMPETITORS_PER_COMPANY: usize = 2;
const MAX_SOURCE_DOMAINS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Portfolio,
    Competitor,
    Industry,
    Source,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// SHA-256 of kind, company and text; stable across runs.
    pub id: String,
    pub text: String,
    pub kind: QueryKind,
    pub related_company: Option<String>,
    pub domain_filter: Vec<String>,
    /// Provider recency bucket: day | week | month | year.
    pub recency: &'static str,
}

impl SearchQuery {
    pub fn new(text: String, kind: QueryKind, related_company: Option<String>, lookback_days: i64) -> Self {
        let id = item_id(&format!(
            "{kind:?}:{}:{text}",
            related_company.as_deref().unwrap_or_default()
        ));
        Self {
            id,
            text,
            kind,
            related_company,
            domain_filter: Vec::new(),
            recency: recency_bucket(lookback_days),
        }
    }
}

pub fn recency_bucket(days: i64) -> &'static str {
    match days {
        d if d <= 1 => "day",
        d if d <= 7 => "week",
        d if d <= 31 => "month",
        _ => "year",
    }
}

/// "A", "A or B", "A, B, or C".
fn natural_list(terms: &[&str]) -> String {
    match terms {
        [] => String::new(),
        [a] => a.to_string(),
        [a, b] => format!("{a} or {b}"),
        [init @ .., last] => format!("{}, or {last}", init.join(", ")),
    }
}

/// Portfolio, competitor and cluster queries, then trusted-domain queries.
/// `max_total` of zero keeps everything.
pub fn build_queries(
    dir: &PortfolioDirectory,
    trusted_domains: &[String],
    lookback_days: i64,
    max_total: usize,
) -> Vec<SearchQuery> {
    let deals = natural_list(DEAL_TERMS);
    let activity = natural_list(ACTIVITY_TERMS);
    let mut out = Vec::new();
    let mut clusters_done = HashSet::new();

    for c in dir.companies() {
        let name = c.name.trim();
        if name.is_empty() {
            continue;
        }
        let in_sector = c
            .sector
            .as_deref()
            .map(|s| format!(" in {s}"))
            .unwrap_or_default();
        let owner = Some(c.name.clone());

        out.push(SearchQuery::new(
            format!("Latest news about {name} {deals}{in_sector}"),
            QueryKind::Portfolio,
            owner.clone(),
            lookback_days,
        ));
        out.push(SearchQuery::new(
            format!("Recent {name} announcements about {activity}"),
            QueryKind::Portfolio,
            owner.clone(),
            lookback_days,
        ));
        for comp in c.competitors().into_iter().take(MAX_COMPETITORS_PER_COMPANY) {
            out.push(SearchQuery::new(
                format!("{comp} news {deals}{in_sector}"),
                QueryKind::Competitor,
                owner.clone(),
                lookback_days,
            ));
        }
        if let Some(cluster) = c.cluster_id.as_deref().and_then(|id| dir.cluster(id)) {
            if clusters_done.insert(cluster.cluster_id.clone()) {
                let text = match &cluster.what_it_is {
                    Some(w) => format!("{} industry news: {deals}. {w}", cluster.name),
                    None => format!("{} market news about {deals}", cluster.name),
                };
                out.push(SearchQuery::new(text, QueryKind::Industry, owner, lookback_days));
            }
        }
    }

    let mut seen_domains = HashSet::new();
    for d in trusted_domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .filter(|d| seen_domains.insert(d.clone()))
        .take(MAX_SOURCE_DOMAINS)
    {
        let mut q = SearchQuery::new(
            format!("Recent M&A deals, funding rounds, acquisitions and partnerships reported by {d}"),
            QueryKind::Source,
            None,
            lookback_days,
        );
        q.domain_filter = vec![d];
        out.push(q);
    }

    if max_total > 0 && out.len() > max_total {
        tracing::info!(target: "ingest", kept = max_total, total = out.len(), "limiting search queries");
        out.truncate(max_total);
    }
    out
}
