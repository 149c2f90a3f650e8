// src/workflow/node.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::PipelineState;

/// Stages of the weekly run, in graph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Initialize,
    CollectRss,
    CollectSearch,
    Triage,
    Dedupe,
    FetchFullContent,
    Analyze,
    Curate,
    CarveOutResearch,
    Compose,
    Save,
    SendEmail,
}

impl Node {
    pub const ALL: [Node; 12] = [
        Node::Initialize,
        Node::CollectRss,
        Node::CollectSearch,
        Node::Triage,
        Node::Dedupe,
        Node::FetchFullContent,
        Node::Analyze,
        Node::Curate,
        Node::CarveOutResearch,
        Node::Compose,
        Node::Save,
        Node::SendEmail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Node::Initialize => "initialize",
            Node::CollectRss => "collect_rss",
            Node::CollectSearch => "collect_search",
            Node::Triage => "triage",
            Node::Dedupe => "dedupe",
            Node::FetchFullContent => "fetch_full_content",
            Node::Analyze => "analyze",
            Node::Curate => "curate",
            Node::CarveOutResearch => "carve_out_research",
            Node::Compose => "compose",
            Node::Save => "save",
            Node::SendEmail => "send_email",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let n = name.trim().to_ascii_lowercase().replace('-', "_");
        Node::ALL.into_iter().find(|node| node.name() == n)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Node::from_name(s).ok_or_else(|| {
            let known: Vec<&str> = Node::ALL.iter().map(|n| n.name()).collect();
            format!("unknown node '{s}' (expected one of: {})", known.join(", "))
        })
    }
}

/// First frontier of a fresh run.
pub fn entry() -> Vec<Node> {
    vec![Node::Initialize]
}

/// Next frontier after `frontier` completed. Empty means the run is over.
///
/// The collect pair runs as one superstep; the only conditional edge skips
/// enrichment and analysis when nothing survived dedupe.
pub fn route(frontier: &[Node], state: &PipelineState) -> Vec<Node> {
    let Some(&head) = frontier.first() else {
        return Vec::new();
    };
    match head {
        Node::Initialize => vec![Node::CollectRss, Node::CollectSearch],
        Node::CollectRss | Node::CollectSearch => vec![Node::Triage],
        Node::Triage => vec![Node::Dedupe],
        Node::Dedupe if state.relevant_items.is_empty() => vec![Node::Compose],
        Node::Dedupe => vec![Node::FetchFullContent],
        Node::FetchFullContent => vec![Node::Analyze],
        Node::Analyze => vec![Node::Curate],
        Node::Curate => vec![Node::CarveOutResearch],
        Node::CarveOutResearch => vec![Node::Compose],
        Node::Compose => vec![Node::Save],
        Node::Save => vec![Node::SendEmail],
        Node::SendEmail => Vec::new(),
    }
}
