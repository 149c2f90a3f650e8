// src/config/mod.rs
//! Run settings: one immutable struct, loaded once and passed explicitly.
//!
//! Lookup order: `$NEWSLETTER_CONFIG_PATH`, then `config/newsletter.toml`, then
//! `config/newsletter.json`, then built-in defaults. Secrets and delivery
//! addresses are overridden from the environment afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PATH: &str = "NEWSLETTER_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub rss: RssSettings,
    pub full_text: FullTextSettings,
    pub dedupe: DedupeSettings,
    pub curation: CurationSettings,
    pub carve_out_research: ResearchSettings,
    pub email: EmailSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// "openai" | "mock" | "disabled"
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// "ENV" means: read `OPENAI_API_KEY`.
    pub api_key: String,
    pub requests_per_minute: i64,
    pub triage_workers: usize,
    pub analysis_workers: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub cache_dir: Option<PathBuf>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: "ENV".into(),
            requests_per_minute: 60,
            triage_workers: 4,
            analysis_workers: 3,
            timeout_secs: 60,
            max_retries: 3,
            cache_dir: None,
        }
    }
}

impl LlmSettings {
    pub fn resolved_api_key(&self) -> String {
        resolve_secret(&self.api_key, "OPENAI_API_KEY")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub enabled: bool,
    pub base_url: String,
    /// "ENV" means: read `PERPLEXITY_API_KEY`.
    pub api_key: String,
    pub model: String,
    pub requests_per_minute: i64,
    pub max_retries: u32,
    pub max_items_per_query: usize,
    pub max_concurrency: usize,
    pub lookback_days: i64,
    pub keep_undated: bool,
    pub timeout_secs: u64,
    pub max_queries_total: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.perplexity.ai".into(),
            api_key: "ENV".into(),
            model: "sonar".into(),
            requests_per_minute: 50,
            max_retries: 3,
            max_items_per_query: 8,
            max_concurrency: 10,
            lookback_days: 7,
            keep_undated: true,
            timeout_secs: 30,
            max_queries_total: 0,
        }
    }
}

impl SearchSettings {
    pub fn resolved_api_key(&self) -> String {
        resolve_secret(&self.api_key, "PERPLEXITY_API_KEY")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RssSettings {
    pub feeds: Vec<FeedConfig>,
    pub max_items_per_feed: usize,
    pub timeout_secs: u64,
}

impl Default for RssSettings {
    fn default() -> Self {
        Self {
            feeds: vec![FeedConfig {
                name: "GP Bullhound".into(),
                url: "https://www.gpbullhound.com/feed/".into(),
            }],
            max_items_per_feed: 30,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTextSettings {
    pub enabled: bool,
    pub requests_per_minute: i64,
    pub max_concurrency: usize,
    pub min_chars: usize,
    pub max_chars: usize,
    /// 0 means no cap.
    pub max_items: usize,
    pub timeout_secs: u64,
    pub trusted_domains: Vec<String>,
}

impl Default for FullTextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            max_concurrency: 6,
            min_chars: 200,
            max_chars: 4000,
            max_items: 60,
            timeout_secs: 20,
            trusted_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeSettings {
    pub similarity_threshold: f64,
    /// Sources ranked below first-party publishers when picking a canonical item.
    pub aggregator_sources: Vec<String>,
    pub use_llm: bool,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            aggregator_sources: vec!["perplexity".into()],
            use_llm: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationSettings {
    pub min_signal_score: u8,
    pub max_portfolio_items: usize,
    pub max_competitor_items: usize,
    pub max_industry_items: usize,
    pub max_deal_items: usize,
    pub max_items_per_portfolio_company: usize,
    pub max_items_per_cluster: usize,
    /// Per-category score floors keyed by wire name (`portfolio`, `major_deal`, ...);
    /// categories without an entry use `min_signal_score`.
    pub category_thresholds: BTreeMap<String, u8>,
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self {
            min_signal_score: 55,
            max_portfolio_items: 8,
            max_competitor_items: 10,
            max_industry_items: 10,
            max_deal_items: 12,
            max_items_per_portfolio_company: 3,
            max_items_per_cluster: 5,
            category_thresholds: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    pub enabled: bool,
    pub requests_per_minute: i64,
    pub max_opportunities: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 20,
            max_opportunities: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub send: bool,
    pub from: String,
    pub to: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            send: false,
            from: String::new(),
            to: Vec::new(),
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub portfolio_file: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            portfolio_file: PathBuf::from("config/portfolio.json"),
            output_dir: PathBuf::from("output"),
            checkpoint_dir: PathBuf::from(".checkpoints"),
        }
    }
}

// ------------------------------------------------------------
// Loading
// ------------------------------------------------------------

impl Settings {
    /// Load from an explicit path. TOML or JSON, decided by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut s = parse_settings(&content, &ext)?;
        s.apply_env();
        s.validate()?;
        Ok(s)
    }

    /// Load using env var + fallbacks:
    /// 1) $NEWSLETTER_CONFIG_PATH
    /// 2) config/newsletter.toml
    /// 3) config/newsletter.json
    /// 4) defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        for candidate in ["config/newsletter.toml", "config/newsletter.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut s = Settings::default();
        s.apply_env();
        s.validate()?;
        Ok(s)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_nonempty("SMTP_USERNAME") {
            self.email.smtp_username = v;
        }
        if let Some(v) = env_nonempty("SMTP_PASSWORD") {
            self.email.smtp_password = v;
        }
        if let Some(v) = env_nonempty("SMTP_HOST") {
            self.email.smtp_host = v;
        }
        if let Some(port) = env_nonempty("SMTP_PORT").and_then(|v| v.parse().ok()) {
            self.email.smtp_port = port;
        }
        if let Some(v) = env_nonempty("FROM_EMAIL") {
            self.email.from = v.trim().to_string();
        }
        if let Some(v) = env_nonempty("TO_EMAIL") {
            self.email.to = split_emails(&v);
        }
        if let Some(v) = env_nonempty("SEND_EMAIL") {
            self.email.send = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_nonempty("LLM_PROVIDER") {
            self.llm.provider = v.trim().to_ascii_lowercase();
        }
    }

    fn validate(&self) -> Result<()> {
        let t = self.dedupe.similarity_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(anyhow!("dedupe.similarity_threshold must be within 0..=1, got {t}"));
        }
        if self.full_text.min_chars > self.full_text.max_chars {
            bail!("full_text.min_chars exceeds full_text.max_chars");
        }
        Ok(())
    }
}

fn parse_settings(s: &str, hint_ext: &str) -> Result<Settings> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing JSON settings");
    }
    match toml::from_str::<Settings>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!(toml_err))
            .context("parsing TOML settings"),
    }
}

/// `"ENV"` (any case) reads `var`; anything else is used verbatim.
fn resolve_secret(raw: &str, var: &str) -> String {
    if raw.trim().eq_ignore_ascii_case("env") {
        std::env::var(var).unwrap_or_default().trim().to_string()
    } else {
        raw.trim().to_string()
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Comma or semicolon separated recipients.
pub fn split_emails(value: &str) -> Vec<String> {
    value
        .replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            [llm]
            triage_workers = 8

            [curation]
            min_signal_score = 40
            category_thresholds = { portfolio = 30 }
        "#;
        let s = parse_settings(toml, "toml").unwrap();
        assert_eq!(s.llm.triage_workers, 8);
        assert_eq!(s.llm.analysis_workers, 3);
        assert_eq!(s.curation.min_signal_score, 40);
        assert_eq!(s.curation.category_thresholds.get("portfolio"), Some(&30));
        assert_eq!(s.search.requests_per_minute, 50);
        assert!((s.dedupe.similarity_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn json_is_accepted() {
        let s = parse_settings(r#"{"email": {"smtp_port": 2525}}"#, "json").unwrap();
        assert_eq!(s.email.smtp_port, 2525);
        assert_eq!(s.full_text.min_chars, 200);
    }

    #[test]
    fn recipients_split_on_comma_and_semicolon() {
        assert_eq!(split_emails(" a@x.com; b@y.com ,, "), vec!["a@x.com", "b@y.com"]);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);
        env::remove_var("TO_EMAIL");

        let s = Settings::load_default().unwrap();
        assert_eq!(s.llm.requests_per_minute, 60);

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[search]\nlookback_days = 14\n").unwrap();
        env::set_var(ENV_PATH, p.display().to_string());
        env::set_var("TO_EMAIL", "ops@example.com;deals@example.com");
        let s2 = Settings::load_default().unwrap();
        assert_eq!(s2.search.lookback_days, 14);
        assert_eq!(s2.email.to.len(), 2);

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(Settings::load_default().is_err());

        env::remove_var(ENV_PATH);
        env::remove_var("TO_EMAIL");
        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn env_marker_resolves_secret() {
        env::set_var("PERPLEXITY_API_KEY", " pplx-123 ");
        let s = SearchSettings::default();
        assert_eq!(s.resolved_api_key(), "pplx-123");
        env::remove_var("PERPLEXITY_API_KEY");
        assert_eq!(s.resolved_api_key(), "");
    }
}
