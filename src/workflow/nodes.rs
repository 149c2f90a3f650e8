// src/workflow/nodes.rs
//! Node bodies. Each reads a snapshot of the state and returns a partial update.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::fs;

use super::clock::{Clock, SystemClock};
use super::node::Node;
use super::state::{PipelineState, StateUpdate};
use crate::agents::analysis::{extract_carve_outs, AnalysisAgent, ANALYSIS_FAILED};
use crate::agents::carve_out::CarveOutResearchAgent;
use crate::agents::compose::{ComposeAgent, ComposeInput};
use crate::agents::dedupe::DedupeAgent;
use crate::agents::triage::{TriageAgent, TriageStats};
use crate::agents::{run_batch, ProgressFn};
use crate::config::Settings;
use crate::curate::curate;
use crate::ingest::content::{fetch_full_texts, ContentFetcher, HttpContentFetcher};
use crate::ingest::queries::build_queries;
use crate::ingest::rss::RssFeedProvider;
use crate::ingest::search::{PerplexityClient, SearchCollector, SearchProvider};
use crate::ingest::types::NewsProvider;
use crate::ingest::{collect_feeds, domain_matches, domain_of, filter_recent};
use crate::llm::{build_client, DynLlm};
use crate::model::TriagedItem;
use crate::notify::{render_html, NewsletterSender, SmtpSender};
use crate::portfolio::PortfolioDirectory;
use crate::retry::RetryPolicy;

/// Everything a node may touch besides the state. Built once per process.
pub struct Collaborators {
    pub settings: Settings,
    pub directory: Arc<PortfolioDirectory>,
    pub llm: DynLlm,
    pub feeds: Vec<Box<dyn NewsProvider>>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub search_retry: Option<RetryPolicy>,
    pub content: Option<Arc<dyn ContentFetcher>>,
    pub sender: Option<Arc<dyn NewsletterSender>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// No feeds, no search, no fetcher, no sender, wall clock.
    pub fn new(settings: Settings, directory: PortfolioDirectory, llm: DynLlm) -> Self {
        Self {
            settings,
            directory: Arc::new(directory),
            llm,
            feeds: Vec::new(),
            search: None,
            search_retry: None,
            content: None,
            sender: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<Box<dyn NewsProvider>>) -> Self {
        self.feeds = feeds;
        self
    }

    pub fn with_search(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    pub fn with_search_retry(mut self, retry: RetryPolicy) -> Self {
        self.search_retry = Some(retry);
        self
    }

    pub fn with_content_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.content = Some(fetcher);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn NewsletterSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Production wiring: HTTP feeds, Perplexity search, HTTP fetcher, SMTP.
    /// Collaborators whose credentials are missing are left out.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let directory = PortfolioDirectory::load_or_empty(&settings.paths.portfolio_file)?;
        let llm = build_client(&settings.llm);
        let mut out = Self::new(settings, directory, llm);
        let s = &out.settings;

        let rss_timeout = Duration::from_secs(s.rss.timeout_secs);
        let mut feeds: Vec<Box<dyn NewsProvider>> = Vec::with_capacity(s.rss.feeds.len());
        for feed in &s.rss.feeds {
            let p = RssFeedProvider::from_feed(feed, s.rss.max_items_per_feed, rss_timeout)
                .with_context(|| format!("feed {}", feed.name))?;
            feeds.push(Box::new(p));
        }

        let search_key = s.search.resolved_api_key();
        let search: Option<Arc<dyn SearchProvider>> = if s.search.enabled && !search_key.is_empty() {
            Some(Arc::new(PerplexityClient::new(&s.search, search_key)?))
        } else {
            tracing::info!(target: "workflow", enabled = s.search.enabled, "search collaborator not configured");
            None
        };

        let content: Option<Arc<dyn ContentFetcher>> = if s.full_text.enabled {
            Some(Arc::new(HttpContentFetcher::new(Duration::from_secs(s.full_text.timeout_secs))?))
        } else {
            None
        };

        let e = &s.email;
        let sender: Option<Arc<dyn NewsletterSender>> = if e.send
            && !e.smtp_host.is_empty()
            && !e.smtp_username.is_empty()
            && !e.smtp_password.is_empty()
        {
            Some(Arc::new(SmtpSender::new(e)?))
        } else {
            None
        };

        out.feeds = feeds;
        out.search = search;
        out.content = content;
        out.sender = sender;
        Ok(out)
    }

    fn run_time(&self, state: &PipelineState) -> DateTime<Utc> {
        state.started_at.unwrap_or_else(|| self.clock.now())
    }
}

fn progress(stage: &'static str) -> ProgressFn {
    Arc::new(move |done, total| {
        if done == total || done % 10 == 0 {
            tracing::info!(target: "workflow", stage, done, total, "progress");
        }
    })
}

pub async fn run_node(node: Node, state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    match node {
        Node::Initialize => initialize(state, deps),
        Node::CollectRss => collect_rss(state, deps).await,
        Node::CollectSearch => collect_search(state, deps).await,
        Node::Triage => triage(state, deps).await,
        Node::Dedupe => dedupe(state, deps).await,
        Node::FetchFullContent => fetch_full_content(state, deps).await,
        Node::Analyze => analyze(state, deps).await,
        Node::Curate => curate_items(state, deps),
        Node::CarveOutResearch => carve_out_research(state, deps).await,
        Node::Compose => compose(state, deps).await,
        Node::Save => save(state, deps).await,
        Node::SendEmail => send_email(state, deps).await,
    }
}

fn initialize(_state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let started_at = deps.clock.now();
    let context = deps.directory.context_string();
    tracing::info!(
        target: "workflow",
        companies = deps.directory.companies().len(),
        clusters = deps.directory.clusters().len(),
        lookback_days = deps.settings.search.lookback_days,
        "run initialized"
    );
    Ok(StateUpdate {
        portfolio_context: Some(context),
        lookback_days: Some(deps.settings.search.lookback_days),
        started_at: Some(started_at),
        relevance_thresholds: Some(deps.settings.curation.category_thresholds.clone()),
        ..StateUpdate::default()
    }
    .metric("portfolio_companies", deps.directory.companies().len()))
}

async fn collect_rss(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    if deps.feeds.is_empty() {
        return Ok(StateUpdate::default().metric("rss_items", 0));
    }
    let (items, errors) = collect_feeds(&deps.feeds).await;
    let fetched = items.len();
    let items = filter_recent(
        items,
        state.lookback_days,
        deps.settings.search.keep_undated,
        deps.run_time(state),
    );
    tracing::info!(target: "workflow", fetched, kept = items.len(), errors = errors.len(), "rss collected");
    Ok(StateUpdate {
        raw_items: items,
        collection_errors: errors,
        ..StateUpdate::default()
    }
    .metric("rss_items", fetched))
}

async fn collect_search(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let cfg = &deps.settings.search;
    let Some(provider) = deps.search.as_ref().filter(|_| cfg.enabled) else {
        tracing::info!(target: "workflow", "search disabled");
        return Ok(StateUpdate::default().metric("search_queries", 0));
    };
    let queries = build_queries(
        &deps.directory,
        &deps.settings.full_text.trusted_domains,
        state.lookback_days,
        cfg.max_queries_total,
    );
    let mut collector = SearchCollector::new(Arc::clone(provider), cfg);
    if let Some(retry) = deps.search_retry {
        collector = collector.with_retry(retry);
    }
    let outcome = collector.collect(queries, deps.run_time(state)).await;
    let n = outcome.items.len();
    Ok(StateUpdate {
        raw_items: outcome.items,
        collection_errors: outcome.errors,
        ..StateUpdate::default()
    }
    .metric("search_queries", outcome.queries)
    .metric("search_items", n))
}

async fn triage(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let llm = &deps.settings.llm;
    let agent = Arc::new(TriageAgent::new(
        Arc::clone(&deps.llm),
        llm.requests_per_minute,
        llm.triage_workers,
        state.portfolio_context.clone(),
    ));
    let triaged = run_batch(agent, &state.raw_items, Some(progress("triage")), None).await;
    let relevant: Vec<TriagedItem> = triaged.iter().filter(|t| t.is_relevant).cloned().collect();
    let stats = TriageStats::from_items(&triaged);
    tracing::info!(
        target: "workflow",
        total = stats.total,
        relevant = stats.relevant,
        failed = stats.triage_failed,
        "triage finished"
    );
    let (n_relevant, n_failed) = (stats.relevant, stats.triage_failed);
    Ok(StateUpdate {
        triaged_items: Some(triaged),
        relevant_items: Some(relevant),
        triage_stats: Some(stats),
        ..StateUpdate::default()
    }
    .metric("triage_relevant", n_relevant)
    .metric("triage_failed", n_failed))
}

async fn dedupe(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let agent = Arc::new(DedupeAgent::new(
        Arc::clone(&deps.llm),
        deps.settings.llm.requests_per_minute,
        deps.settings.dedupe.clone(),
    ));
    let outcome = agent.dedupe(&state.relevant_items).await;
    Ok(StateUpdate {
        deduped_items: Some(outcome.kept.clone()),
        relevant_items: Some(outcome.kept),
        duplicate_groups: Some(outcome.groups),
        dedupe_stats: Some(outcome.stats),
        ..StateUpdate::default()
    }
    .metric("dedupe_removed", outcome.stats.removed))
}

async fn fetch_full_content(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let cfg = &deps.settings.full_text;
    let eligible: Vec<&TriagedItem> = state
        .relevant_items
        .iter()
        .filter(|t| t.raw_item.full_text.is_none() && !t.raw_item.source_url.is_empty())
        .collect();
    let Some(fetcher) = deps.content.as_ref().filter(|_| cfg.enabled) else {
        return Ok(StateUpdate::default()
            .metric("full_text_fetched", 0)
            .metric("full_text_failed", 0)
            .metric("full_text_skipped", eligible.len()));
    };

    let trusted = |t: &TriagedItem| {
        let d = domain_of(&t.raw_item.source_url);
        cfg.trusted_domains.iter().any(|td| domain_matches(&d, td))
    };
    let mut candidates = eligible.clone();
    candidates.sort_by(|a, b| trusted(*b).cmp(&trusted(*a)).then(b.confidence.cmp(&a.confidence)));
    if cfg.max_items > 0 {
        candidates.truncate(cfg.max_items);
    }
    let skipped = eligible.len() - candidates.len();

    let mut seen = HashSet::new();
    let urls: Vec<String> = candidates
        .iter()
        .map(|t| t.raw_item.source_url.clone())
        .filter(|u| seen.insert(u.clone()))
        .collect();
    let outcome = fetch_full_texts(Arc::clone(fetcher), urls, cfg).await;
    for e in &outcome.errors {
        tracing::debug!(target: "workflow", error = %e, "full text unavailable");
    }

    let enrich = |t: &TriagedItem| match outcome.results.get(&t.raw_item.source_url) {
        Some(text) if t.raw_item.full_text.is_none() => {
            t.with_raw(t.raw_item.with_full_text(text.clone(), domain_of(&t.raw_item.source_url)))
        }
        _ => t.clone(),
    };
    let relevant: Vec<TriagedItem> = state.relevant_items.iter().map(&enrich).collect();
    let triaged: Vec<TriagedItem> = state.triaged_items.iter().map(&enrich).collect();
    let fetched = relevant.iter().filter(|t| t.raw_item.full_text.is_some()).count();

    tracing::info!(
        target: "workflow",
        fetched,
        failed = outcome.errors.len(),
        skipped,
        "full text enrichment finished"
    );
    Ok(StateUpdate {
        relevant_items: Some(relevant),
        triaged_items: Some(triaged),
        ..StateUpdate::default()
    }
    .metric("full_text_fetched", fetched)
    .metric("full_text_failed", outcome.errors.len())
    .metric("full_text_skipped", skipped))
}

async fn analyze(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let llm = &deps.settings.llm;
    let agent = Arc::new(AnalysisAgent::new(
        Arc::clone(&deps.llm),
        llm.requests_per_minute,
        llm.analysis_workers,
        state.portfolio_context.clone(),
    ));
    let analyzed = run_batch(agent, &state.relevant_items, Some(progress("analysis")), None).await;
    let failed = analyzed.iter().filter(|a| a.why_it_matters == ANALYSIS_FAILED).count();
    let carve_outs = extract_carve_outs(&analyzed);
    tracing::info!(
        target: "workflow",
        analyzed = analyzed.len(),
        failed,
        carve_outs = carve_outs.len(),
        "analysis finished"
    );
    Ok(StateUpdate {
        analyzed_items: Some(analyzed),
        carve_out_opportunities: Some(carve_outs),
        ..StateUpdate::default()
    }
    .metric("analysis_failed", failed))
}

fn curate_items(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let before = state.analyzed_items.len();
    let curated = curate(
        &state.analyzed_items,
        &state.carve_out_opportunities,
        &state.relevance_thresholds,
        &deps.settings.curation,
        &deps.directory,
    );
    Ok(StateUpdate {
        analyzed_items: Some(curated.items.clone()),
        carve_out_opportunities: Some(curated.carve_outs),
        ..StateUpdate::default()
    }
    .metric("curated_before", before)
    .metric("curated_after", curated.items.len()))
}

async fn carve_out_research(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let cfg = &deps.settings.carve_out_research;
    if !cfg.enabled || state.carve_out_opportunities.is_empty() {
        return Ok(StateUpdate::default().metric("carve_out_research", "skipped"));
    }
    let mut selected = state.carve_out_opportunities.clone();
    selected.sort_by(|a, b| b.priority.cmp(&a.priority));
    if cfg.max_opportunities > 0 {
        selected.truncate(cfg.max_opportunities);
    }
    let agent = Arc::new(CarveOutResearchAgent::new(Arc::clone(&deps.llm), cfg.requests_per_minute));
    let report = agent
        .generate_report(&selected, Some(progress("carve_out_research")), deps.clock.now())
        .await;
    Ok(StateUpdate {
        carve_out_research_report: (!report.is_empty()).then_some(report),
        ..StateUpdate::default()
    }
    .metric("carve_out_researched", selected.len()))
}

async fn compose(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let agent = ComposeAgent::new(
        Arc::clone(&deps.llm),
        deps.settings.llm.requests_per_minute,
        Arc::clone(&deps.directory),
    );
    let input = ComposeInput {
        items: state.analyzed_items.clone(),
        carve_outs: state.carve_out_opportunities.clone(),
        duplicate_groups: state.duplicate_groups.clone(),
        total_processed: state.raw_items.len(),
        lookback_days: state.lookback_days,
        now: deps.clock.now(),
    };
    let outcome = agent.compose(&input).await;
    let html = render_html(&outcome.newsletter, state.carve_out_research_report.as_deref());
    Ok(StateUpdate {
        carve_out_opportunities: Some(outcome.carve_outs),
        newsletter: Some(outcome.newsletter),
        newsletter_html: Some(html),
        ..StateUpdate::default()
    })
}

async fn save(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let Some(newsletter) = &state.newsletter else {
        bail!("no newsletter to save");
    };
    let html = match &state.newsletter_html {
        Some(h) => h.clone(),
        None => render_html(newsletter, state.carve_out_research_report.as_deref()),
    };
    let dir = &deps.settings.paths.output_dir;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create output dir {}", dir.display()))?;

    let stamp = state
        .started_at
        .unwrap_or(newsletter.generated_at)
        .format("%Y%m%d_%H%M%S");
    let html_path = dir.join(format!("newsletter_{stamp}.html"));
    fs::write(&html_path, html).await.with_context(|| format!("write {}", html_path.display()))?;

    if let Some(report) = &state.carve_out_research_report {
        let md_path = dir.join(format!("carve_out_research_{stamp}.md"));
        fs::write(&md_path, report).await.with_context(|| format!("write {}", md_path.display()))?;
    }

    let summary = json!({
        "subject": newsletter.subject,
        "started_at": state.started_at,
        "generated_at": newsletter.generated_at,
        "raw_items": state.raw_items.len(),
        "relevant_items": newsletter.total_relevant_items,
        "triage_stats": state.triage_stats,
        "dedupe_stats": state.dedupe_stats,
        "carve_out_opportunities": state.carve_out_opportunities.len(),
        "collection_errors": state.collection_errors,
        "errors": state.errors,
        "metrics": state.metrics,
        "newsletter": newsletter,
    });
    let summary_path = dir.join(format!("summary_{stamp}.json"));
    let body = serde_json::to_vec_pretty(&summary).context("serialize run summary")?;
    fs::write(&summary_path, body).await.with_context(|| format!("write {}", summary_path.display()))?;

    tracing::info!(target: "workflow", path = %html_path.display(), "newsletter saved");
    Ok(StateUpdate {
        output_path: Some(html_path),
        ..StateUpdate::default()
    })
}

async fn send_email(state: &PipelineState, deps: &Collaborators) -> Result<StateUpdate> {
    let cfg = &deps.settings.email;
    let done = StateUpdate {
        completed_at: Some(deps.clock.now()),
        ..StateUpdate::default()
    };
    if !cfg.send {
        tracing::info!(target: "workflow", "email sending disabled");
        return Ok(done.metric("email_status", "skipped"));
    }
    let Some(newsletter) = &state.newsletter else {
        return Ok(skip(done, "Email skipped: no newsletter to send"));
    };
    if cfg.from.trim().is_empty() || cfg.to.is_empty() {
        return Ok(skip(done, "Email skipped: sender or recipients not configured"));
    }
    let Some(sender) = &deps.sender else {
        return Ok(skip(done, "Email skipped: SMTP credentials not configured"));
    };

    let html = match &state.newsletter_html {
        Some(h) => h.clone(),
        None => render_html(newsletter, state.carve_out_research_report.as_deref()),
    };
    match sender.send_html(&newsletter.subject, &html, &cfg.from, &cfg.to).await {
        Ok(message_id) => {
            tracing::info!(target: "workflow", recipients = cfg.to.len(), %message_id, "newsletter sent");
            Ok(done
                .metric("email_status", "sent")
                .metric("email_message_id", message_id)
                .metric("email_recipients", cfg.to.len()))
        }
        Err(e) => {
            tracing::warn!(target: "workflow", error = %format!("{e:#}"), "email delivery failed");
            Ok(done
                .metric("email_status", "failed")
                .error(format!("Email delivery failed: {e:#}")))
        }
    }
}

fn skip(update: StateUpdate, reason: &str) -> StateUpdate {
    tracing::warn!(target: "workflow", reason, "email skipped");
    update.metric("email_status", "skipped").error(reason)
}
