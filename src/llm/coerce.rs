// src/llm/coerce.rs
//! Decode-with-defaults for fields read out of model JSON.
//!
//! Every helper takes `Option<&Value>` (the result of `obj.get("field")`) and
//! never fails; malformed or missing input maps to the declared fallback.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::{CarveOutPotential, ThreatLevel, WireName};

/// Case-insensitive wire-name match after trim, else `default`.
pub fn enum_or<T: WireName>(v: Option<&Value>, default: T) -> T {
    enum_opt(v).unwrap_or(default)
}

pub fn enum_opt<T: WireName>(v: Option<&Value>) -> Option<T> {
    let raw = v?.as_str()?.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return None;
    }
    T::ALL.iter().copied().find(|e| e.wire_name() == raw)
}

/// Carve-out potential, accepting the usual spellings of "not applicable".
pub fn carve_out(v: Option<&Value>) -> CarveOutPotential {
    let Some(raw) = v.and_then(Value::as_str) else {
        return CarveOutPotential::NotApplicable;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "not_applicable" | "not applicable" | "na" | "n/a" => CarveOutPotential::NotApplicable,
        other => enum_opt(Some(&Value::String(other.to_string())))
            .unwrap_or(CarveOutPotential::NotApplicable),
    }
}

pub fn threat_level(v: Option<&Value>) -> Option<ThreatLevel> {
    enum_opt(v)
}

/// Integer score clamped into 0..=100. Floats round; numeric strings parse.
pub fn score(v: Option<&Value>, default: u8) -> u8 {
    let n = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(x) if x.is_finite() => x.round().clamp(0.0, 100.0) as u8,
        _ => default.min(100),
    }
}

/// Null, a comma-separated string, or an array; trimmed, non-empty, de-duplicated.
pub fn list(v: Option<&Value>) -> Vec<String> {
    let parts: Vec<String> = match v {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
        Some(other) => scalar_string(other).into_iter().collect(),
    };
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    for p in parts {
        let p = p.trim();
        if !p.is_empty() && !out.iter().any(|x| x == p) {
            out.push(p.to_string());
        }
    }
    out
}

/// Trimmed text; empty or null becomes `None`.
pub fn text(v: Option<&Value>) -> Option<String> {
    let s = scalar_string(v?)?;
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

pub fn boolean(v: Option<&Value>, default: bool) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(default),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => default,
        },
        _ => default,
    }
}

/// Object with stringified values; blank keys dropped.
pub fn string_map(v: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(m)) = v else {
        return BTreeMap::new();
    };
    m.iter()
        .filter(|(k, _)| !k.trim().is_empty())
        .filter_map(|(k, val)| scalar_string(val).map(|s| (k.trim().to_string(), s)))
        .collect()
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DealType, ItemCategory};
    use serde_json::json;

    #[test]
    fn score_is_always_clamped() {
        let cases = [
            (json!(150), 100),
            (json!(-3), 0),
            (json!(72.6), 73),
            (json!(" 88 "), 88),
            (json!("1e3"), 100),
            (json!("high"), 50),
            (json!(null), 50),
            (json!([1]), 50),
        ];
        for (input, want) in cases {
            assert_eq!(score(Some(&input), 50), want, "input {input}");
        }
        assert_eq!(score(None, 50), 50);
    }

    #[test]
    fn enums_match_loosely_with_fallback() {
        assert_eq!(
            enum_or(Some(&json!("  Major_Deal ")), ItemCategory::NotRelevant),
            ItemCategory::MajorDeal
        );
        assert_eq!(enum_or(Some(&json!("merger!")), DealType::NotADeal), DealType::NotADeal);
        assert_eq!(carve_out(Some(&json!("Not Applicable"))), CarveOutPotential::NotApplicable);
        assert_eq!(carve_out(Some(&json!("HIGH"))), CarveOutPotential::High);
        assert_eq!(threat_level(Some(&json!("severe"))), None);
    }

    #[test]
    fn lists_accept_strings_and_arrays() {
        assert_eq!(list(Some(&json!("A, B ,,A"))), vec!["A", "B"]);
        assert_eq!(list(Some(&json!([" x ", "", null, 3]))), vec!["x", "3"]);
        assert!(list(Some(&json!(null))).is_empty());
    }

    #[test]
    fn text_and_bool() {
        assert_eq!(text(Some(&json!("   "))), None);
        assert_eq!(text(Some(&json!(" ok "))).as_deref(), Some("ok"));
        assert!(boolean(Some(&json!("Yes")), false));
        assert!(!boolean(Some(&json!("0")), true));
        assert!(boolean(Some(&json!("maybe")), true));
    }

    #[test]
    fn map_stringifies_values() {
        let m = string_map(Some(&json!({"Acme": "target", " ": "x", "n": 2})));
        assert_eq!(m.get("Acme").map(String::as_str), Some("target"));
        assert_eq!(m.get("n").map(String::as_str), Some("2"));
        assert_eq!(m.len(), 2);
    }
}
