// src/feeds/providers/poetry.rs
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::json_str;
use crate::feeds::transport::FeedRequest;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::{FieldSet, FieldValue};

/// Classical poetry line (jinrishici).
///
/// Accepts both the flat `/all` payload and the token API's
/// `{"status": "success", "data": {"content", "origin": {...}}}` envelope.
pub struct PoetryAdapter;

#[async_trait]
impl SourceAdapter for PoetryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Poetry
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        _today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        let mut req = FeedRequest::get(config.endpoint.clone());
        if let Some(token) = config.credential("token") {
            req = req.with_header("X-User-Token", token);
        }
        Ok(req)
    }

    fn parse(&self, _config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let v: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| FetchError::parse(format!("poetry json: {e}")))?;

        if let Some(status) = v.get("status").and_then(|s| s.as_str()) {
            if status != "success" {
                let msg = json_str(&v, "errMessage").unwrap_or_else(|| status.to_string());
                return Err(FetchError::parse(format!("poetry api reported: {msg}")));
            }
        }

        let data = v.get("data").filter(|d| d.is_object()).unwrap_or(&v);
        let content = json_str(data, "content").ok_or_else(|| FetchError::missing("content"))?;

        // Flat payload: origin is the title string. Envelope: origin is an object.
        let (origin, author, dynasty) = match data.get("origin") {
            Some(o) if o.is_object() => (
                json_str(o, "title"),
                json_str(o, "author"),
                json_str(o, "dynasty"),
            ),
            _ => (
                json_str(data, "origin"),
                json_str(data, "author"),
                json_str(data, "dynasty"),
            ),
        };

        Ok(FieldSet::new()
            .with("content", content)
            .with("author", FieldValue::text_or_null(author))
            .with("origin", FieldValue::text_or_null(origin))
            .with("category", FieldValue::text_or_null(json_str(data, "category")))
            .with("dynasty", FieldValue::text_or_null(dynasty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SourceConfig {
        SourceConfig::with_defaults("poetry", SourceKind::Poetry)
    }

    #[test]
    fn flat_payload() {
        let body = r#"{"content":"床前明月光，疑是地上霜。","origin":"静夜思","author":"李白","category":"古诗文-思念"}"#;
        let fs = PoetryAdapter.parse(&cfg(), body).unwrap();
        assert_eq!(fs.get("author").and_then(FieldValue::as_text), Some("李白"));
        assert_eq!(fs.get("origin").and_then(FieldValue::as_text), Some("静夜思"));
        assert_eq!(fs.get("dynasty"), Some(&FieldValue::Null));
        let names: Vec<&str> = fs.names().collect();
        assert_eq!(names, ["content", "author", "origin", "category", "dynasty"]);
    }

    #[test]
    fn envelope_payload_reads_nested_origin() {
        let body = r#"{"status":"success","data":{"content":"会当凌绝顶","origin":{"title":"望岳","dynasty":"唐代","author":"杜甫"}}}"#;
        let fs = PoetryAdapter.parse(&cfg(), body).unwrap();
        assert_eq!(fs.get("dynasty").and_then(FieldValue::as_text), Some("唐代"));
        assert_eq!(fs.get("origin").and_then(FieldValue::as_text), Some("望岳"));
        assert_eq!(fs.get("category"), Some(&FieldValue::Null));
    }

    #[test]
    fn error_status_is_parse_failure() {
        let body = r#"{"status":"error","errCode":2001,"errMessage":"token invalid"}"#;
        let err = PoetryAdapter.parse(&cfg(), body).unwrap_err();
        assert!(err.message.contains("token invalid"));
    }

    #[test]
    fn token_credential_becomes_header() {
        let cfg = cfg().with_credential("token", "t-123");
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let req = PoetryAdapter.build_request(&cfg, today).unwrap();
        assert_eq!(req.header("x-user-token"), Some("t-123"));
    }
}
