// src/notify/render.rs
//! HTML body for the weekly email. All text is escaped; nothing from the
//! feeds is trusted as markup.

use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::model::{Newsletter, NewsletterItem, NewsletterSection};

const STYLE: &str = "body{font-family:Arial,Helvetica,sans-serif;color:#222;max-width:760px;margin:auto}\
h1{color:#1f3b57}h2{border-bottom:2px solid #1f3b57;padding-bottom:4px}\
h3{color:#555;margin-bottom:4px}.item{margin:0 0 14px 0}.meta{color:#777;font-size:12px}\
.impact{background:#f3f6f9;padding:6px 8px;border-left:3px solid #1f3b57}\
pre{white-space:pre-wrap;font-family:inherit}";

fn render_item(out: &mut String, item: &NewsletterItem) {
    out.push_str("<div class=\"item\">");
    let _ = write!(out, "<strong>{}</strong>", encode_text(&item.headline));
    if !item.summary.is_empty() {
        let _ = write!(out, "<p>{}</p>", encode_text(&item.summary));
    }
    if !item.impact_on_silvertree.is_empty() {
        let _ = write!(
            out,
            "<p class=\"impact\">Impact: {}</p>",
            encode_text(&item.impact_on_silvertree)
        );
    }
    let date = item
        .primary_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());
    let _ = write!(
        out,
        "<div class=\"meta\">{} | {} | score {} | {}",
        item.category, item.deal_type, item.signal_score, date
    );
    for link in &item.sources {
        let label = link.source.as_deref().unwrap_or(&link.title);
        let _ = write!(
            out,
            " | <a href=\"{}\">{}</a>",
            encode_double_quoted_attribute(&link.url),
            encode_text(label)
        );
    }
    out.push_str("</div></div>");
}

fn render_section(out: &mut String, section: &NewsletterSection) {
    let _ = write!(out, "<h2>{} ({})</h2>", encode_text(&section.title), section.len());
    if let Some(summary) = &section.summary {
        let _ = write!(out, "<p><em>{}</em></p>", encode_text(summary));
    }
    if section.is_empty() {
        out.push_str("<p class=\"meta\">No items this week.</p>");
        return;
    }
    for group in &section.groups {
        let _ = write!(out, "<h3>{}</h3>", encode_text(&group.name));
        for item in &group.items {
            render_item(out, item);
        }
    }
}

/// Full HTML document; the research dossier, when present, is appended verbatim
/// inside a preformatted block.
pub fn render_html(newsletter: &Newsletter, research_report: Option<&str>) -> String {
    let mut out = String::with_capacity(16 * 1024);
    let _ = write!(
        out,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{0}</title><style>{1}</style></head><body><h1>{0}</h1>",
        encode_text(&newsletter.subject),
        STYLE
    );
    let _ = write!(
        out,
        "<p class=\"meta\">Period {} to {} | {} items processed, {} relevant</p>",
        newsletter.period_start.format("%Y-%m-%d"),
        newsletter.period_end.format("%Y-%m-%d"),
        newsletter.total_items_processed,
        newsletter.total_relevant_items
    );

    out.push_str("<h2>Executive Summary</h2><div>");
    for line in newsletter.executive_summary.lines().filter(|l| !l.trim().is_empty()) {
        let _ = write!(out, "<p>{}</p>", encode_text(line.trim()));
    }
    out.push_str("</div>");

    for section in newsletter.sections() {
        render_section(&mut out, section);
    }

    if let Some(report) = research_report.filter(|r| !r.trim().is_empty()) {
        let _ = write!(out, "<h2>Carve-Out Research</h2><pre>{}</pre>", encode_text(report));
    }

    let _ = write!(
        out,
        "<p class=\"meta\">Generated {}</p></body></html>",
        newsletter.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DealType, ItemCategory, NewsletterGroup, SourceLink};
    use chrono::{TimeZone, Utc};

    fn newsletter() -> Newsletter {
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 9, 0, 0).unwrap();
        let mut portfolio = NewsletterSection::empty("Portfolio News");
        portfolio.groups.push(NewsletterGroup {
            name: "Acme".into(),
            items: vec![NewsletterItem {
                headline: "Acme buys <Widgets> & Co".into(),
                summary: "Deal closed".into(),
                impact_on_silvertree: "Positive".into(),
                category: ItemCategory::Portfolio,
                deal_type: DealType::MaAcquisition,
                portfolio_company: Some("Acme".into()),
                cluster: None,
                signal_score: 80,
                primary_date: Some(now),
                sources: vec![SourceLink {
                    title: "Acme".into(),
                    url: "https://news.example.com/a?x=1&y=\"2\"".into(),
                    source: Some("Example News".into()),
                }],
                source_item_ids: vec!["a".into()],
            }],
        });
        Newsletter {
            subject: "SilverTree Weekly".into(),
            generated_at: now,
            period_start: now - chrono::Duration::days(7),
            period_end: now,
            executive_summary: "• one\n\n• two".into(),
            portfolio,
            competitive: NewsletterSection::empty("Competitive Landscape"),
            deals: NewsletterSection::empty("Major Deals"),
            carve_out: None,
            total_items_processed: 10,
            total_relevant_items: 1,
        }
    }

    #[test]
    fn escapes_feed_text_and_attributes() {
        let html = render_html(&newsletter(), None);
        assert!(html.contains("Acme buys &lt;Widgets&gt; &amp; Co"));
        assert!(html.contains("href=\"https://news.example.com/a?x=1&amp;y=&quot;2&quot;\""));
        assert!(!html.contains("<Widgets>"));
        assert!(html.contains("<h2>Portfolio News (1)</h2>"));
        assert!(html.contains("<h2>Major Deals (0)</h2>"));
        assert!(!html.contains("Carve-Out Research"));
    }

    #[test]
    fn research_report_is_appended_when_present() {
        let html = render_html(&newsletter(), Some("# Dossier\n## Target <X>"));
        assert!(html.contains("<h2>Carve-Out Research</h2><pre># Dossier\n## Target &lt;X&gt;</pre>"));
    }
}
