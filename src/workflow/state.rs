// src/workflow/state.rs
//! Pipeline state and the per-field merge policy.
//!
//! Replace fields take the latest write. `raw_items`, `collection_errors` and
//! `errors` append. `metrics` is a shallow key merge where later keys win.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::dedupe::DedupeStats;
use crate::agents::triage::TriageStats;
use crate::model::{AnalyzedItem, CarveOutOpportunity, DuplicateGroup, Newsletter, RawNewsItem, TriagedItem};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineState {
    pub portfolio_context: String,
    pub lookback_days: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub relevance_thresholds: BTreeMap<String, u8>,

    pub raw_items: Vec<RawNewsItem>,
    pub collection_errors: Vec<String>,

    pub triaged_items: Vec<TriagedItem>,
    pub relevant_items: Vec<TriagedItem>,
    pub triage_stats: Option<TriageStats>,

    pub deduped_items: Vec<TriagedItem>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub dedupe_stats: Option<DedupeStats>,

    pub analyzed_items: Vec<AnalyzedItem>,
    pub carve_out_opportunities: Vec<CarveOutOpportunity>,
    pub carve_out_research_report: Option<String>,

    pub newsletter: Option<Newsletter>,
    pub newsletter_html: Option<String>,
    pub output_path: Option<PathBuf>,
    pub completed_at: Option<DateTime<Utc>>,

    pub errors: Vec<String>,
    pub metrics: BTreeMap<String, Value>,
}

/// Partial write produced by one node. `None` leaves a replace field alone;
/// empty append/merge fields contribute nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub portfolio_context: Option<String>,
    pub lookback_days: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub relevance_thresholds: Option<BTreeMap<String, u8>>,

    pub raw_items: Vec<RawNewsItem>,
    pub collection_errors: Vec<String>,

    pub triaged_items: Option<Vec<TriagedItem>>,
    pub relevant_items: Option<Vec<TriagedItem>>,
    pub triage_stats: Option<TriageStats>,

    pub deduped_items: Option<Vec<TriagedItem>>,
    pub duplicate_groups: Option<Vec<DuplicateGroup>>,
    pub dedupe_stats: Option<DedupeStats>,

    pub analyzed_items: Option<Vec<AnalyzedItem>>,
    pub carve_out_opportunities: Option<Vec<CarveOutOpportunity>>,
    pub carve_out_research_report: Option<String>,

    pub newsletter: Option<Newsletter>,
    pub newsletter_html: Option<String>,
    pub output_path: Option<PathBuf>,
    pub completed_at: Option<DateTime<Utc>>,

    pub errors: Vec<String>,
    pub metrics: BTreeMap<String, Value>,
}

impl StateUpdate {
    pub fn metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn replace_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl PipelineState {
    pub fn apply(&mut self, u: StateUpdate) {
        replace(&mut self.portfolio_context, u.portfolio_context);
        replace(&mut self.lookback_days, u.lookback_days);
        replace_opt(&mut self.started_at, u.started_at);
        replace(&mut self.relevance_thresholds, u.relevance_thresholds);

        self.raw_items.extend(u.raw_items);
        self.collection_errors.extend(u.collection_errors);

        replace(&mut self.triaged_items, u.triaged_items);
        replace(&mut self.relevant_items, u.relevant_items);
        replace_opt(&mut self.triage_stats, u.triage_stats);

        replace(&mut self.deduped_items, u.deduped_items);
        replace(&mut self.duplicate_groups, u.duplicate_groups);
        replace_opt(&mut self.dedupe_stats, u.dedupe_stats);

        replace(&mut self.analyzed_items, u.analyzed_items);
        replace(&mut self.carve_out_opportunities, u.carve_out_opportunities);
        replace_opt(&mut self.carve_out_research_report, u.carve_out_research_report);

        replace_opt(&mut self.newsletter, u.newsletter);
        replace_opt(&mut self.newsletter_html, u.newsletter_html);
        replace_opt(&mut self.output_path, u.output_path);
        replace_opt(&mut self.completed_at, u.completed_at);

        self.errors.extend(u.errors);
        self.metrics.extend(u.metrics);
    }

    /// Apply branch updates computed against the same snapshot, in order.
    pub fn apply_all(&mut self, updates: impl IntoIterator<Item = StateUpdate>) {
        for u in updates {
            self.apply(u);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(id: &str) -> RawNewsItem {
        RawNewsItem {
            id: id.into(),
            title: id.into(),
            summary: String::new(),
            source: "s".into(),
            source_url: format!("https://x.com/{id}"),
            published_date: None,
            full_text: None,
            full_text_source: None,
        }
    }

    #[test]
    fn branch_updates_append_in_order_and_merge_metrics() {
        let mut st = PipelineState::default();
        let rss = StateUpdate {
            raw_items: vec![raw("a"), raw("b")],
            collection_errors: vec!["feed down".into()],
            ..StateUpdate::default()
        }
        .metric("rss_items", 2)
        .metric("shared", "rss");
        let search = StateUpdate {
            raw_items: vec![raw("c")],
            ..StateUpdate::default()
        }
        .metric("search_items", 1)
        .metric("shared", "search");

        st.apply_all([rss, search]);

        let ids: Vec<_> = st.raw_items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(st.collection_errors, vec!["feed down".to_string()]);
        assert_eq!(st.metrics["rss_items"], json!(2));
        assert_eq!(st.metrics["shared"], json!("search"));
    }

    #[test]
    fn replace_fields_keep_old_value_when_absent() {
        let mut st = PipelineState {
            lookback_days: 7,
            portfolio_context: "ctx".into(),
            ..PipelineState::default()
        };
        st.apply(StateUpdate {
            lookback_days: Some(3),
            ..StateUpdate::default()
        });
        assert_eq!(st.lookback_days, 3);
        assert_eq!(st.portfolio_context, "ctx");

        st.apply(StateUpdate {
            relevant_items: Some(vec![]),
            ..StateUpdate::default()
        }
        .error("one"));
        st.apply(StateUpdate::default().error("two"));
        assert!(st.relevant_items.is_empty());
        assert_eq!(st.errors, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut st = PipelineState::default();
        st.apply(
            StateUpdate {
                raw_items: vec![raw("a")],
                carve_out_research_report: Some("# Dossier".into()),
                output_path: Some(PathBuf::from("out/newsletter.html")),
                ..StateUpdate::default()
            }
            .metric("k", json!({"nested": [1, 2]})),
        );
        let text = serde_json::to_string(&st).unwrap();
        let back: PipelineState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, st);
    }
}
