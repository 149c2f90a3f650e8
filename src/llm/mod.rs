// src/llm/mod.rs
//! LLM adapter: client trait, chat-completions provider, disabled and mock
//! clients, and an optional on-disk response cache.
//!
//! Every stage prompt starts with a `Task: <stage>` line. The mock client and
//! test doubles route on it.

pub mod coerce;
pub mod json;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::LlmSettings;
use crate::retry::{check_status, HttpError, RetryPolicy};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt, return the raw completion text.
    async fn invoke(&self, prompt: &str) -> Result<String>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// `false` for clients that can never answer; callers skip the round trip.
    fn is_available(&self) -> bool {
        true
    }
}

pub type DynLlm = Arc<dyn LlmClient>;

/// First-line stage tag of a prompt (`Task: triage` -> `triage`).
pub fn prompt_stage(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .next()
        .and_then(|l| l.trim().strip_prefix("Task:"))
        .map(str::trim)
}

/// Value after `<label>: ` on the first line that carries it.
pub fn prompt_field<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    prompt.lines().find_map(|l| {
        l.trim()
            .strip_prefix(label)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::trim)
    })
}

/// Factory following settings and environment.
///
/// * `AI_TEST_MODE=mock` or provider `mock` -> deterministic `MockLlm`.
/// * provider `disabled`, or no API key -> `DisabledClient`.
/// * otherwise the OpenAI-compatible provider, cached when `cache_dir` is set.
pub fn build_client(cfg: &LlmSettings) -> DynLlm {
    let mock_env = std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);
    if mock_env || cfg.provider == "mock" {
        return Arc::new(MockLlm);
    }
    if cfg.provider == "disabled" {
        return Arc::new(DisabledClient);
    }
    let key = cfg.resolved_api_key();
    if key.is_empty() {
        tracing::warn!(target: "llm", provider = %cfg.provider, "no API key configured; LLM disabled");
        return Arc::new(DisabledClient);
    }
    let provider = match OpenAiProvider::new(cfg, key) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(target: "llm", error = %e, "failed to build HTTP client; LLM disabled");
            return Arc::new(DisabledClient);
        }
    };
    match &cfg.cache_dir {
        Some(dir) => Arc::new(CachingClient::new(provider, dir.clone())),
        None => Arc::new(provider),
    }
}

// ------------------------------------------------------------
// Concrete clients
// ------------------------------------------------------------

/// OpenAI-compatible Chat Completions provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(cfg: &LlmSettings, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("silvertree-newsletter/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building LLM HTTP client")?;
        Ok(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            retry: RetryPolicy::new(cfg.max_retries),
        })
    }

    async fn call_once(&self, prompt: &str) -> Result<String, HttpError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        let body: Resp = check_status(resp)?.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for OpenAiProvider {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let stage = prompt_stage(prompt).unwrap_or("llm");
        let text = self
            .retry
            .run(stage, || self.call_once(prompt))
            .await
            .map_err(|e| anyhow!(e).context("chat completion"))?;
        if text.trim().is_empty() {
            return Err(anyhow!("empty completion"));
        }
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Never answers; every agent falls back to its deterministic path.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn invoke(&self, _prompt: &str) -> Result<String> {
        Err(anyhow!("LLM disabled"))
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
    fn is_available(&self) -> bool {
        false
    }
}

/// Deterministic offline client for local runs (`AI_TEST_MODE=mock`).
///
/// Triage marks everything relevant industry news; analysis gives a mid score;
/// other stages answer with an empty object so their fallbacks run.
pub struct MockLlm;

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let reply = match prompt_stage(prompt) {
            Some("triage") => serde_json::json!({
                "is_relevant": true,
                "category": "industry",
                "deal_type": "not_a_deal",
                "relevance_level": "medium",
                "confidence": 60,
                "triage_reason": "mock triage",
            }),
            Some("analysis") => serde_json::json!({
                "why_it_matters": "Mock analysis.",
                "impact_on_silvertree": "Worth a look.",
                "carve_out_potential": "n/a",
                "signal_score": 60,
            }),
            _ => serde_json::json!({}),
        };
        Ok(reply.to_string())
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache keyed by prompt hash)
// ------------------------------------------------------------

/// Reuses completions across resumed or repeated runs.
pub struct CachingClient<C: LlmClient> {
    inner: C,
    cache_dir: PathBuf,
}

impl<C: LlmClient> CachingClient<C> {
    pub fn new(inner: C, cache_dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!(target: "llm", dir = %cache_dir.display(), error = %e, "cache dir unavailable");
        }
        Self { inner, cache_dir }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for CachingClient<C> {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let key = cache_key(prompt);
        if let Ok(hit) = tokio::fs::read_to_string(cache_path(&self.cache_dir, &key)).await {
            return Ok(hit);
        }
        let fresh = self.inner.invoke(prompt).await?;
        if let Err(e) = write_atomic(&cache_path(&self.cache_dir, &key), fresh.as_bytes()).await {
            tracing::debug!(target: "llm", error = %e, "cache write failed");
        }
        Ok(fresh)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

fn cache_key(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.txt"))
}

/// Write via temp file + rename so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(bytes).await?;
    f.sync_all().await?;
    tokio::fs::rename(tmp, path).await
}
