// src/llm/json.rs
//! Pull a JSON object out of a model reply.
//!
//! Models answer with bare JSON, a fenced code block, or JSON buried in prose.
//! Anything unparseable yields an empty object so per-field defaults apply.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced block regex"));

pub fn extract_json(reply: &str) -> JsonObject {
    let text = reply.trim();
    if text.is_empty() {
        return JsonObject::new();
    }
    if let Some(obj) = parse_object(text) {
        return obj;
    }
    for cap in FENCED.captures_iter(text) {
        if let Some(obj) = cap.get(1).and_then(|m| parse_object(m.as_str().trim())) {
            return obj;
        }
    }
    let mut from = 0;
    while let Some(rel) = text[from..].find('{') {
        let start = from + rel;
        if let Some(end) = balanced_end(&text[start..]) {
            if let Some(obj) = parse_object(&text[start..start + end]) {
                return obj;
            }
        }
        from = start + 1;
    }
    JsonObject::new()
}

fn parse_object(s: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(m)) => Some(m),
        _ => None,
    }
}

/// Byte length of the balanced `{...}` at the start of `s`, skipping braces in strings.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if in_str {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object() {
        let o = extract_json(r#" {"is_relevant": true, "confidence": 80} "#);
        assert_eq!(o["confidence"], 80);
    }

    #[test]
    fn fenced_block() {
        let o = extract_json("Here you go:\n```json\n{\"keep_id\": \"abc\"}\n```\nThanks");
        assert_eq!(o["keep_id"], "abc");
    }

    #[test]
    fn embedded_in_prose_with_braces_inside_strings() {
        let o = extract_json(r#"Result: {"reason": "a {weird} } title", "score": 7} trailing {junk"#);
        assert_eq!(o["reason"], "a {weird} } title");
        assert_eq!(o["score"], 7);
    }

    #[test]
    fn garbage_gives_empty_object() {
        assert!(extract_json("no json here").is_empty());
        assert!(extract_json("[1,2,3]").is_empty());
        assert!(extract_json("{ not: valid").is_empty());
    }
}
