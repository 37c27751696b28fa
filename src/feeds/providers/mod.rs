// src/feeds/providers/mod.rs
pub mod fuel;
pub mod history;
pub mod hitokoto;
pub mod poetry;
pub mod weather;

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::feeds::types::{SourceAdapter, SourceKind};

/// Built-in adapter for a feed kind.
pub fn adapter_for(kind: SourceKind) -> Arc<dyn SourceAdapter> {
    match kind {
        SourceKind::Quote => Arc::new(hitokoto::HitokotoAdapter),
        SourceKind::Poetry => Arc::new(poetry::PoetryAdapter),
        SourceKind::Fuel => Arc::new(fuel::FuelAdapter),
        SourceKind::History => Arc::new(history::HistoryAdapter),
        SourceKind::Weather => Arc::new(weather::WeatherAdapter),
    }
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex"));

/// Strip tags, decode entities and collapse whitespace in an HTML fragment.
pub(crate) fn clean_text(fragment: &str) -> String {
    let no_tags = RE_TAGS.replace_all(fragment, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

/// First decimal number in a string, e.g. `"7.41元/升"` -> `7.41`.
pub(crate) fn first_number(s: &str) -> Option<f64> {
    RE_NUMBER
        .find(s)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// JSON string field, tolerating numbers encoded without quotes.
pub(crate) fn json_str(v: &serde_json::Value, key: &str) -> Option<String> {
    let s = match v.get(key)? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// JSON number field, tolerating numeric strings (`"24"`).
pub(crate) fn json_num(v: &serde_json::Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_tags_and_entities() {
        let s = "  <b>Hello</b>,&nbsp;&nbsp; <i>world</i>\n ";
        assert_eq!(clean_text(s), "Hello , world");
    }

    #[test]
    fn first_number_skips_units() {
        assert_eq!(first_number("7.41元/升"), Some(7.41));
        assert_eq!(first_number("暂无"), None);
    }

    #[test]
    fn json_helpers_accept_both_encodings() {
        let v = serde_json::json!({"a": "24", "b": 12, "c": "", "d": null});
        assert_eq!(json_num(&v, "a"), Some(24.0));
        assert_eq!(json_num(&v, "b"), Some(12.0));
        assert_eq!(json_str(&v, "b").as_deref(), Some("12"));
        assert_eq!(json_str(&v, "c"), None);
        assert_eq!(json_str(&v, "d"), None);
    }

    #[test]
    fn every_kind_has_an_adapter() {
        for kind in SourceKind::ALL {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }
}
