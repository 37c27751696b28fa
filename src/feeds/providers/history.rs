// src/feeds/providers/history.rs
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::clean_text;
use crate::feeds::transport::FeedRequest;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::{FieldSet, FieldValue};

static RE_P: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<p[\s>].*?</p>").expect("p regex"));
static RE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<span[^>]*>(.*?)</span>").expect("span regex"));
static RE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).expect("link regex")
});
static RE_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("bracket regex"));
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits regex"));

/// Upper bounds (exclusive) of each era; anything later is `modern`.
const ERAS: [(i64, &str); 8] = [
    (221, "ancient"),
    (581, "qin_han_wei_jin"),
    (907, "sui_tang"),
    (1279, "song_liao_jin"),
    (1368, "yuan"),
    (1644, "ming"),
    (1912, "qing"),
    (1949, "republic"),
];

/// Era label for a year string such as `"1949"` or `"1911年"`.
pub fn era_for(year: &str) -> Option<&'static str> {
    let digits: String = RE_DIGITS.find_iter(year).map(|m| m.as_str()).collect();
    let year: i64 = digits.parse().ok()?;
    Some(
        ERAS.iter()
            .find(|(bound, _)| year < *bound)
            .map_or("modern", |(_, label)| *label),
    )
}

#[derive(Debug, Clone, PartialEq)]
struct HistoryEvent {
    year: Option<String>,
    event: String,
    href: String,
}

fn events(html: &str) -> Vec<HistoryEvent> {
    RE_P.find_iter(html)
        .filter_map(|p| {
            let p = p.as_str();
            let span = RE_SPAN.captures(p)?;
            let link = RE_LINK.captures(p)?;
            let event = clean_text(&link[2]);
            if event.is_empty() {
                return None;
            }
            let year = RE_BRACKET
                .captures(&clean_text(&span[1]))
                .map(|c| c[1].trim().to_string())
                .filter(|y| !y.is_empty());
            Some(HistoryEvent {
                year,
                event,
                href: html_escape::decode_html_entities(link[1].trim()).into_owned(),
            })
        })
        .collect()
}

/// "On this day" events scraped from todayonhistory.
///
/// The first listed event wins so a given page always yields the same fields.
pub struct HistoryAdapter;

#[async_trait]
impl SourceAdapter for HistoryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::History
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        let page = format!("today-{}-{}.html", today.month(), today.day());
        let mut url = config.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::network("history endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(&page);
        Ok(FeedRequest::get(url).with_header("Accept", "text/html"))
    }

    fn parse(&self, config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let found = events(body);
        let first = found
            .first()
            .ok_or_else(|| FetchError::missing("event"))?;

        let url = if first.href.is_empty() {
            None
        } else {
            config
                .endpoint
                .join(&first.href)
                .map(|u| u.to_string())
                .ok()
        };
        let era = first.year.as_deref().and_then(era_for);

        Ok(FieldSet::new()
            .with("event", first.event.as_str())
            .with("year", FieldValue::text_or_null(first.year.as_deref()))
            .with("url", FieldValue::text_or_null(url))
            .with("era", FieldValue::text_or_null(era))
            .with("event_count", found.len() as f64))
    }
}
