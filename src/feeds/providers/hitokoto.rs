// src/feeds/providers/hitokoto.rs
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::json_str;
use crate::feeds::transport::FeedRequest;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::{FieldSet, FieldValue};

/// Hitokoto category codes and their names.
const CATEGORIES: [(&str, &str); 12] = [
    ("a", "animation"),
    ("b", "comic"),
    ("c", "game"),
    ("d", "literature"),
    ("e", "original"),
    ("f", "internet"),
    ("g", "other"),
    ("h", "film"),
    ("i", "poetry"),
    ("j", "netease"),
    ("k", "philosophy"),
    ("l", "witty"),
];

const DEFAULT_CATEGORY: &str = "k";

/// Resolve a `category` filter given either as a name or a one-letter code.
pub fn category_code(filter: &str) -> Option<&'static str> {
    let f = filter.trim().to_ascii_lowercase();
    CATEGORIES
        .iter()
        .find(|(code, name)| *code == f || *name == f)
        .map(|(code, _)| *code)
}

pub fn category_name(code: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Quote-of-the-day feed (hitokoto).
pub struct HitokotoAdapter;

#[async_trait]
impl SourceAdapter for HitokotoAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Quote
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), String> {
        match config.filter("category") {
            Some(c) if category_code(c).is_none() => Err(format!("unknown quote category `{c}`")),
            _ => Ok(()),
        }
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        _today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        let code = config
            .filter("category")
            .and_then(category_code)
            .unwrap_or(DEFAULT_CATEGORY);

        let mut url = config.endpoint.clone();
        url.query_pairs_mut().append_pair("c", code);
        Ok(FeedRequest::get(url).with_header("Accept", "application/json"))
    }

    fn parse(&self, _config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let v: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| FetchError::parse(format!("hitokoto json: {e}")))?;

        let content = json_str(&v, "hitokoto").ok_or_else(|| FetchError::missing("hitokoto"))?;
        let category = json_str(&v, "type").map(|code| {
            category_name(&code)
                .map(str::to_string)
                .unwrap_or(code)
        });

        Ok(FieldSet::new()
            .with("content", content)
            .with("author", FieldValue::text_or_null(json_str(&v, "from_who")))
            .with("origin", FieldValue::text_or_null(json_str(&v, "from")))
            .with("category", FieldValue::text_or_null(category))
            .with("uuid", FieldValue::text_or_null(json_str(&v, "uuid"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SourceConfig {
        SourceConfig::with_defaults("quote", SourceKind::Quote)
    }

    #[test]
    fn category_filter_accepts_name_or_code() {
        let a = HitokotoAdapter;
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        let by_name = a
            .build_request(&cfg().with_filter("category", "Literature"), today)
            .unwrap();
        assert_eq!(by_name.url.as_str(), "https://v1.hitokoto.cn/?c=d");

        let by_code = a.build_request(&cfg().with_filter("category", "i"), today).unwrap();
        assert_eq!(by_code.url.query(), Some("c=i"));

        let default = a.build_request(&cfg(), today).unwrap();
        assert_eq!(default.url.query(), Some("c=k"));
    }

    #[test]
    fn unknown_category_fails_validation() {
        assert!(HitokotoAdapter
            .validate(&cfg().with_filter("category", "sports"))
            .is_err());
    }

    #[test]
    fn parses_full_payload() {
        let body = r#"{
            "id": 8211, "uuid": "5e3b-1c",
            "hitokoto": "Carpe diem.", "type": "k",
            "from": "Odes", "from_who": "Horace", "length": 11
        }"#;
        let fs = HitokotoAdapter.parse(&cfg(), body).unwrap();
        assert_eq!(fs.get("content").and_then(FieldValue::as_text), Some("Carpe diem."));
        assert_eq!(fs.get("author").and_then(FieldValue::as_text), Some("Horace"));
        assert_eq!(fs.get("origin").and_then(FieldValue::as_text), Some("Odes"));
        assert_eq!(fs.get("category").and_then(FieldValue::as_text), Some("philosophy"));
    }

    #[test]
    fn missing_author_is_null_not_error() {
        let body = r#"{"hitokoto": "Stay hungry.", "type": "f", "from": "web", "from_who": null}"#;
        let fs = HitokotoAdapter.parse(&cfg(), body).unwrap();
        assert_eq!(fs.get("author"), Some(&FieldValue::Null));
        assert_eq!(fs.get("uuid"), Some(&FieldValue::Null));
    }

    #[test]
    fn missing_text_is_parse_error() {
        let err = HitokotoAdapter
            .parse(&cfg(), r#"{"type": "k", "from_who": "Horace"}"#)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Parse);
    }
}
