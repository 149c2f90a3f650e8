// src/agents/dedupe.rs
//! Duplicate collapsing: exact canonical-URL matches and near-identical titles
//! are grouped, then one canonical item per group is kept.
//!
//! Grouping is the connected components of the "same URL or similar title"
//! relation over the whole input, so running it again over its own output
//! finds nothing further to merge. The canonical pick asks the LLM first and
//! falls back to a deterministic scorer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agents::{ask_json, run_batch, StageAgent};
use crate::config::DedupeSettings;
use crate::ingest::truncate_chars;
use crate::llm::coerce;
use crate::llm::DynLlm;
use crate::model::{DuplicateGroup, TriagedItem};
use crate::throttle::RateLimiter;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "to", "in", "on", "of", "by", "with", "from", "at", "as",
    "is", "are", "be", "will",
];
const TRACKING_KEYS: &[&str] = &["ref", "source"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeStats {
    pub original: usize,
    pub deduped: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DedupeOutcome {
    /// Canonical items in input order.
    pub kept: Vec<TriagedItem>,
    /// Provenance for every merged group (size > 1).
    pub groups: Vec<DuplicateGroup>,
    pub stats: DedupeStats,
}

/// URL with tracking query parameters (`utm_*`, `ref`, `source`) and the
/// fragment removed. Unparseable input is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_KEYS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_fragment(None);
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Lowercase, punctuation to spaces, stop words dropped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-set overlap (Jaccard) of two normalized titles. Empty titles never match.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// The smaller index becomes the root so groups are keyed by first occurrence.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Index groups over `items`, each ascending, ordered by first member. Singletons included.
pub fn group_duplicates(items: &[TriagedItem], threshold: f64) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(items.len());

    let mut by_url: HashMap<String, usize> = HashMap::new();
    for (i, it) in items.iter().enumerate() {
        let key = canonical_url(&it.raw_item.source_url);
        match by_url.get(&key) {
            Some(&first) => sets.union(first, i),
            None => {
                by_url.insert(key, i);
            }
        }
    }

    let titles: Vec<String> = items.iter().map(|it| normalize_title(&it.raw_item.title)).collect();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if title_similarity(&titles[i], &titles[j]) >= threshold {
                sets.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for i in 0..items.len() {
        let root = sets.find(i);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

/// Canonical-item selector; one call per duplicate group.
pub struct DedupeAgent {
    llm: DynLlm,
    limiter: RateLimiter,
    settings: DedupeSettings,
}

impl DedupeAgent {
    pub fn new(llm: DynLlm, requests_per_minute: i64, settings: DedupeSettings) -> Self {
        Self {
            llm,
            limiter: RateLimiter::new(requests_per_minute),
            settings,
        }
    }

    fn is_aggregator(&self, source: &str) -> bool {
        let s = source.trim().to_ascii_lowercase();
        s.starts_with("perplexity")
            || self
                .settings
                .aggregator_sources
                .iter()
                .any(|a| a.trim().eq_ignore_ascii_case(&s))
    }

    /// Index within `group` of the item to keep: first-party source, then
    /// dated, then longest summary, then newest date; full ties keep the first.
    pub fn fallback_pick(&self, group: &[TriagedItem]) -> usize {
        let mut best = 0;
        let mut best_key = None;
        for (i, it) in group.iter().enumerate() {
            let raw = &it.raw_item;
            let key = (
                !self.is_aggregator(&raw.source),
                raw.published_date.is_some(),
                raw.summary.chars().count(),
                raw.published_date,
            );
            if best_key.map_or(true, |b| key > b) {
                best = i;
                best_key = Some(key);
            }
        }
        best
    }

    fn prompt(&self, group: &[TriagedItem]) -> String {
        let items: Vec<_> = group
            .iter()
            .map(|it| {
                let raw = &it.raw_item;
                json!({
                    "id": raw.id,
                    "title": raw.title,
                    "source": raw.source,
                    "url": raw.source_url,
                    "published_date": raw.published_date.map(|d| d.to_rfc3339()),
                    "summary": truncate_chars(&raw.summary, 300),
                })
            })
            .collect();
        format!(
            "Task: dedupe\n\
             These items describe the same event. Pick the single best one to keep: primary \
             sources over search aggregators, reputable outlets, clearer titles, fuller summaries. \
             Ignore tracking parameters in URLs.\n\n\
             Items:\n{}\n\n\
             Reply with one JSON object: keep_id, discard_ids (list), reason.",
            serde_json::Value::Array(items)
        )
    }

    /// Collapse duplicates in `items`. Never fails.
    pub async fn dedupe(self: &Arc<Self>, items: &[TriagedItem]) -> DedupeOutcome {
        let groups = group_duplicates(items, self.settings.similarity_threshold);
        let multi: Vec<Vec<TriagedItem>> = groups
            .iter()
            .filter(|g| g.len() > 1)
            .map(|g| g.iter().map(|&i| items[i].clone()).collect())
            .collect();
        let mut picks = run_batch(Arc::clone(self), &multi, None, None).await.into_iter();

        let mut kept: Vec<(usize, TriagedItem)> = Vec::with_capacity(groups.len());
        let mut provenance = Vec::new();
        for g in &groups {
            if g.len() == 1 {
                kept.push((g[0], items[g[0]].clone()));
                continue;
            }
            let pick = picks.next().unwrap_or(0).min(g.len() - 1);
            let canonical = &items[g[pick]];
            provenance.push(DuplicateGroup {
                canonical_id: canonical.id().to_string(),
                member_ids: g.iter().map(|&i| items[i].id().to_string()).collect(),
                sources: g.iter().map(|&i| items[i].raw_item.link()).collect(),
            });
            kept.push((g[pick], canonical.clone()));
        }
        kept.sort_by_key(|(idx, _)| *idx);

        let kept: Vec<TriagedItem> = kept.into_iter().map(|(_, it)| it).collect();
        let stats = DedupeStats {
            original: items.len(),
            deduped: kept.len(),
            removed: items.len() - kept.len(),
        };
        tracing::info!(
            target: "dedupe",
            original = stats.original,
            deduped = stats.deduped,
            groups = provenance.len(),
            "dedupe finished"
        );
        DedupeOutcome {
            kept,
            groups: provenance,
            stats,
        }
    }
}

#[async_trait]
impl StageAgent for DedupeAgent {
    type Input = Vec<TriagedItem>;
    type Output = usize;

    fn stage(&self) -> &'static str {
        "dedupe"
    }

    fn workers(&self) -> usize {
        1
    }

    async fn attempt(&self, group: &Vec<TriagedItem>, _context: Option<&str>) -> Result<usize> {
        if !self.settings.use_llm {
            return Ok(self.fallback_pick(group));
        }
        let obj = ask_json(self.llm.as_ref(), &self.limiter, &self.prompt(group)).await?;
        let Some(keep_id) = coerce::text(obj.get("keep_id")) else {
            bail!("reply named no keep_id");
        };
        match group.iter().position(|it| it.id() == keep_id) {
            Some(i) => Ok(i),
            None => bail!("keep_id {keep_id} is not in the group"),
        }
    }

    fn fallback(&self, group: &Vec<TriagedItem>) -> usize {
        self.fallback_pick(group)
    }
}
