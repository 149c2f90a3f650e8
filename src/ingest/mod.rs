// src/ingest/mod.rs
pub mod bounded;
pub mod content;
pub mod queries;
pub mod rss;
pub mod search;
pub mod types;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::ingest::types::NewsProvider;
use crate::model::RawNewsItem;

/// Stable item id: SHA-256 hex of the source URL.
pub fn item_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Host part of a URL, empty when unparseable.
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// `domain` equals `trusted` or is a subdomain of it.
pub fn domain_matches(domain: &str, trusted: &str) -> bool {
    let d = domain.to_ascii_lowercase();
    let t = trusted.trim().to_ascii_lowercase();
    !t.is_empty() && (d == t || d.ends_with(&format!(".{t}")))
}

/// Strip tags, decode entities, collapse whitespace.
pub fn clean_html(s: &str) -> String {
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(s, " ");
    let out = html_escape::decode_html_entities(&out).to_string();

    // Normalize typographic quotes to ASCII
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// First `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Feed/search date in any of the shapes seen in the wild: RFC 3339, RFC 2822,
/// naive `YYYY-MM-DD[ HH:MM:SS]` (taken as UTC), or unix seconds.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
    }
    t.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Keep items published within `lookback_days` of `now`; undated items only
/// when `keep_undated`.
pub fn filter_recent(
    items: Vec<RawNewsItem>,
    lookback_days: i64,
    keep_undated: bool,
    now: DateTime<Utc>,
) -> Vec<RawNewsItem> {
    let cutoff = now - ChronoDuration::days(lookback_days.max(0));
    items
        .into_iter()
        .filter(|it| match it.published_date {
            Some(d) => d >= cutoff,
            None => keep_undated,
        })
        .collect()
}

/// Run every provider in order; a failing provider becomes an error entry.
pub async fn collect_feeds(
    providers: &[Box<dyn NewsProvider>],
) -> (Vec<RawNewsItem>, Vec<String>) {
    crate::telemetry::ensure_metrics_described();

    let mut items = Vec::new();
    let mut errors = Vec::new();
    for p in providers {
        match p.fetch_latest().await {
            Ok(mut v) => {
                tracing::info!(target: "ingest", provider = p.name(), items = v.len(), "feed collected");
                items.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, provider = p.name(), "provider error");
                counter!("collect_provider_errors_total").increment(1);
                errors.push(format!("RSS feed {} failed: {e:#}", p.name()));
            }
        }
    }
    (items, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated(url: &str, d: Option<DateTime<Utc>>) -> RawNewsItem {
        RawNewsItem {
            id: item_id(url),
            title: url.into(),
            summary: String::new(),
            source: "t".into(),
            source_url: url.into(),
            published_date: d,
            full_text: None,
            full_text_source: None,
        }
    }

    #[test]
    fn id_is_sha256_hex_of_url() {
        let id = item_id("https://example.com/a");
        assert_eq!(id.len(), 64);
        assert_eq!(id, item_id("https://example.com/a"));
        assert_ne!(id, item_id("https://example.com/b"));
    }

    #[test]
    fn clean_html_strips_tags_and_entities() {
        assert_eq!(clean_html("<p>Hello&nbsp;<b>world</b></p>\n\n"), "Hello world");
    }

    #[test]
    fn lookback_filter_respects_undated_flag() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let items = vec![
            dated("https://a/1", Some(now - ChronoDuration::days(2))),
            dated("https://a/2", Some(now - ChronoDuration::days(9))),
            dated("https://a/3", None),
        ];
        let kept = filter_recent(items.clone(), 7, true, now);
        assert_eq!(kept.len(), 2);
        let kept = filter_recent(items, 7, false, now);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn date_shapes() {
        assert!(parse_datetime("Tue, 10 Mar 2026 08:00:00 +0000").is_some());
        assert!(parse_datetime("2026-03-10T08:00:00Z").is_some());
        assert!(parse_datetime("2026-03-10").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn trusted_domain_match_includes_subdomains() {
        assert!(domain_matches("www.reuters.com", "reuters.com"));
        assert!(!domain_matches("notreuters.com", "reuters.com"));
        assert_eq!(domain_of("https://news.example.org/x?y=1"), "news.example.org");
    }
}
