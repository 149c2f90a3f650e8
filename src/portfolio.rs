// src/portfolio.rs
//! Portfolio directory: companies, competitor clusters and the lookups used to
//! group items by company or cluster.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::TriagedItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Company {
    pub company_id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub company_context: Option<String>,
    pub sector: Option<String>,
    pub cluster_id: Option<String>,
    pub direct_competitors: Vec<String>,
    pub indirect_competitors: Vec<String>,
    pub websites: Vec<String>,
}

impl Company {
    /// Direct competitors first, then indirect, without repeats.
    pub fn competitors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in self.direct_competitors.iter().chain(&self.indirect_competitors) {
            if !out.contains(&c.as_str()) {
                out.push(c);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cluster {
    pub cluster_id: String,
    pub name: String,
    pub what_it_is: Option<String>,
    pub canonical_competitors_seed: Vec<String>,
    pub search_keyword_buckets: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DirectoryFile {
    companies: Vec<Company>,
    competitor_clusters: Vec<Cluster>,
}

/// Read-only view of the portfolio; cheap to share behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct PortfolioDirectory {
    companies: Vec<Company>,
    clusters: Vec<Cluster>,
    by_name: HashMap<String, usize>,
    cluster_by_id: HashMap<String, usize>,
}

impl PortfolioDirectory {
    pub fn new(companies: Vec<Company>, clusters: Vec<Cluster>) -> Self {
        let by_name = companies
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.name.trim().is_empty())
            .map(|(i, c)| (c.name.to_lowercase(), i))
            .collect();
        let cluster_by_id = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.cluster_id.is_empty())
            .map(|(i, c)| (c.cluster_id.clone(), i))
            .collect();
        Self {
            companies,
            clusters,
            by_name,
            cluster_by_id,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading portfolio directory {}", path.display()))?;
        let file: DirectoryFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing portfolio directory {}", path.display()))?;
        Ok(Self::new(file.companies, file.competitor_clusters))
    }

    /// Missing file is not an error: the run proceeds with an empty directory.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(target: "portfolio", path = %path.display(), "portfolio file missing; using empty directory");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn company(&self, name: &str) -> Option<&Company> {
        self.by_name.get(&name.to_lowercase()).map(|&i| &self.companies[i])
    }

    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.cluster_by_id.get(id).map(|&i| &self.clusters[i])
    }

    /// Prompt-facing summary of companies and clusters.
    pub fn context_string(&self) -> String {
        let mut lines = vec!["SilverTree Equity Portfolio Companies:".to_string()];
        for c in &self.companies {
            lines.push(format!("\n- {}", c.name));
            if let Some(ctx) = &c.company_context {
                lines.push(format!("  {ctx}"));
            }
            if let Some(sector) = &c.sector {
                lines.push(format!("  Sector: {sector}"));
            }
            let comps = c.competitors();
            if !comps.is_empty() {
                let shown: Vec<&str> = comps.into_iter().take(5).collect();
                lines.push(format!("  Competitors: {}", shown.join(", ")));
            }
        }
        if !self.clusters.is_empty() {
            lines.push("\n\nCompetitor Clusters to Monitor:".to_string());
            for cl in &self.clusters {
                lines.push(format!("\n- {}", cl.name));
                if let Some(w) = &cl.what_it_is {
                    lines.push(format!("  {w}"));
                }
                if !cl.canonical_competitors_seed.is_empty() {
                    let shown: Vec<&str> = cl
                        .canonical_competitors_seed
                        .iter()
                        .take(5)
                        .map(String::as_str)
                        .collect();
                    lines.push(format!("  Key players: {}", shown.join(", ")));
                }
            }
        }
        lines.join("\n")
    }

    /// Portfolio company an item is about: triage's answer, else the first
    /// company whose name appears in the title or summary.
    pub fn resolve_portfolio_company(&self, item: &TriagedItem) -> Option<String> {
        if let Some(name) = &item.related_portfolio_company {
            return Some(name.clone());
        }
        let text = format!("{} {}", item.raw_item.title, item.raw_item.summary).to_lowercase();
        self.companies
            .iter()
            .find(|c| !c.name.trim().is_empty() && text.contains(&c.name.to_lowercase()))
            .map(|c| c.name.clone())
    }

    /// Competitive cluster: via the resolved company's `cluster_id`, else a
    /// cluster whose name or description mentions the item's sector.
    pub fn resolve_cluster(&self, item: &TriagedItem) -> Option<String> {
        if let Some(company) = self
            .resolve_portfolio_company(item)
            .and_then(|name| self.company(&name))
        {
            if let Some(cluster) = company.cluster_id.as_deref().and_then(|id| self.cluster(id)) {
                return Some(cluster.name.clone());
            }
        }
        let sector = item.related_sector.as_deref()?.to_lowercase();
        if sector.trim().is_empty() {
            return None;
        }
        self.clusters
            .iter()
            .find(|cl| {
                cl.name.to_lowercase().contains(&sector)
                    || cl
                        .what_it_is
                        .as_deref()
                        .is_some_and(|w| w.to_lowercase().contains(&sector))
            })
            .map(|cl| cl.name.clone())
    }
}
