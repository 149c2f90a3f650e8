// src/curate.rs
//! Deterministic section caps applied to analyzed items before composition.
//!
//! Per bucket: stable sort by score, cap each group, order groups by their
//! best score, cap the total. Carve-out sources and high-potential items that
//! passed the score filter are added back if a cap dropped them.

use std::collections::{BTreeMap, HashSet};

use crate::config::CurationSettings;
use crate::model::{AnalyzedItem, CarveOutOpportunity, CarveOutPotential, ItemCategory, WireName};
use crate::portfolio::PortfolioDirectory;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curated {
    pub items: Vec<AnalyzedItem>,
    pub carve_outs: Vec<CarveOutOpportunity>,
    pub portfolio: usize,
    pub competitive: usize,
    pub deals: usize,
}

fn cap_by_group<'a>(
    items: Vec<&'a AnalyzedItem>,
    group_of: impl Fn(&AnalyzedItem) -> Option<String>,
    per_group: usize,
    total: usize,
) -> Vec<&'a AnalyzedItem> {
    let mut sorted = items;
    sorted.sort_by(|a, b| b.signal_score.cmp(&a.signal_score));

    let mut groups: Vec<(String, Vec<&AnalyzedItem>)> = Vec::new();
    for it in sorted {
        let key = group_of(it).unwrap_or_else(|| "Other".to_string());
        let slot = match groups.iter().position(|(k, _)| *k == key) {
            Some(i) => i,
            None => {
                groups.push((key, Vec::new()));
                groups.len() - 1
            }
        };
        if groups[slot].1.len() < per_group {
            groups[slot].1.push(it);
        }
    }
    let top = |g: &[&AnalyzedItem]| g.iter().map(|i| i.signal_score).max().unwrap_or(0);
    groups.sort_by(|a, b| top(&b.1).cmp(&top(&a.1)));

    let flat = groups.into_iter().flat_map(|(_, g)| g);
    if total > 0 {
        flat.take(total).collect()
    } else {
        flat.collect()
    }
}

/// Pure function of its inputs; identical inputs give identical output.
pub fn curate(
    items: &[AnalyzedItem],
    carve_outs: &[CarveOutOpportunity],
    thresholds: &BTreeMap<String, u8>,
    limits: &CurationSettings,
    directory: &PortfolioDirectory,
) -> Curated {
    if items.is_empty() {
        return Curated::default();
    }
    let threshold_for = |c: ItemCategory| {
        thresholds
            .get(c.wire_name())
            .copied()
            .unwrap_or(limits.min_signal_score)
    };
    let filtered: Vec<&AnalyzedItem> = items
        .iter()
        .filter(|a| a.signal_score >= threshold_for(a.category()) || a.carve_out_potential.is_actionable())
        .collect();
    let in_bucket = |cats: &[ItemCategory]| -> Vec<&AnalyzedItem> {
        filtered.iter().copied().filter(|a| cats.contains(&a.category())).collect()
    };

    let portfolio = cap_by_group(
        in_bucket(&[ItemCategory::Portfolio]),
        |a| directory.resolve_portfolio_company(&a.triaged_item),
        limits.max_items_per_portfolio_company,
        limits.max_portfolio_items,
    );
    let competitive = cap_by_group(
        in_bucket(&[ItemCategory::Competitor, ItemCategory::Industry]),
        |a| directory.resolve_cluster(&a.triaged_item),
        limits.max_items_per_cluster,
        limits.max_competitor_items + limits.max_industry_items,
    );
    let deals = cap_by_group(
        in_bucket(&[ItemCategory::MajorDeal]),
        |a| directory.resolve_cluster(&a.triaged_item),
        limits.max_items_per_cluster,
        limits.max_deal_items,
    );
    let (n_portfolio, n_competitive, n_deals) = (portfolio.len(), competitive.len(), deals.len());

    let mut selected: Vec<&AnalyzedItem> = portfolio.into_iter().chain(competitive).chain(deals).collect();
    let mut selected_ids: HashSet<&str> = selected.iter().map(|a| (*a).id()).collect();

    let carve_out_ids: HashSet<&str> = carve_outs.iter().map(|c| c.primary_id()).collect();
    for it in filtered.iter().copied() {
        let forced = carve_out_ids.contains(it.id()) || it.carve_out_potential == CarveOutPotential::High;
        if forced && selected_ids.insert(it.id()) {
            selected.push(it);
        }
    }

    let kept_carve_outs: Vec<CarveOutOpportunity> = carve_outs
        .iter()
        .filter(|c| selected_ids.contains(c.primary_id()))
        .cloned()
        .collect();

    tracing::info!(
        target: "curate",
        portfolio = n_portfolio,
        competitive = n_competitive,
        deals = n_deals,
        carve_outs = kept_carve_outs.len(),
        total = selected.len(),
        "curation finished"
    );
    Curated {
        items: selected.into_iter().cloned().collect(),
        carve_outs: kept_carve_outs,
        portfolio: n_portfolio,
        competitive: n_competitive,
        deals: n_deals,
    }
}
