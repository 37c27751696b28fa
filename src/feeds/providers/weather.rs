// src/feeds/providers/weather.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::{json_num, json_str};
use crate::feeds::transport::FeedRequest;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::{FieldSet, FieldValue};

/// Days published as fields.
const FORECAST_DAYS: usize = 3;
/// Change in daily maximum (°C) between first and last day that counts as a trend.
const TREND_DELTA: f64 = 2.0;

/// Three-day forecast from the QWeather v7 API.
pub struct WeatherAdapter;

/// `warming` / `cooling` / `steady` from the first and last daily maxima.
pub fn temperature_trend(first_max: f64, last_max: f64) -> &'static str {
    let delta = last_max - first_max;
    if delta >= TREND_DELTA {
        "warming"
    } else if delta <= -TREND_DELTA {
        "cooling"
    } else {
        "steady"
    }
}

fn parse_update_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn day_summary(day: &serde_json::Value) -> Option<String> {
    let text_day = json_str(day, "textDay")?;
    let text_night = json_str(day, "textNight").unwrap_or_else(|| text_day.clone());
    let min = json_str(day, "tempMin")?;
    let max = json_str(day, "tempMax")?;
    Some(format!("{text_day}/{text_night} {min}~{max}°C"))
}

#[async_trait]
impl SourceAdapter for WeatherAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), String> {
        if config.filter("location").is_none() {
            return Err("weather requires filters.location".into());
        }
        if config.credential("api_key").is_none() {
            return Err("weather requires credentials.api_key".into());
        }
        Ok(())
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        _today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        let location = config
            .filter("location")
            .ok_or_else(|| FetchError::network("weather location not configured"))?;
        let key = config
            .credential("api_key")
            .ok_or_else(|| FetchError::network("weather api key not configured"))?;

        let mut url = config.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("location", location)
            .append_pair("lang", config.filter("lang").unwrap_or("zh"))
            .append_pair("unit", "m");
        Ok(FeedRequest::get(url)
            .with_header("Accept", "application/json")
            .with_header("X-QW-Api-Key", key))
    }

    fn parse(&self, _config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let v: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| FetchError::parse(format!("weather json: {e}")))?;

        // QWeather reports request errors in the body with HTTP-like codes.
        if let Some(code) = json_str(&v, "code") {
            if code != "200" {
                let status = code.parse::<u16>().unwrap_or(0);
                return Err(FetchError::status(status, format!("weather api code {code}")));
            }
        }

        let daily = v
            .get("daily")
            .and_then(|d| d.as_array())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| FetchError::missing("daily"))?;

        let mut fields = FieldSet::new();
        for n in 0..FORECAST_DAYS {
            let day = daily.get(n);
            fields.set(
                format!("day{n}"),
                FieldValue::text_or_null(day.and_then(day_summary)),
            );
            fields.set(
                format!("day{n}_date"),
                FieldValue::text_or_null(day.and_then(|d| json_str(d, "fxDate"))),
            );
            fields.set(
                format!("day{n}_temp_min"),
                FieldValue::number_or_null(day.and_then(|d| json_num(d, "tempMin"))),
            );
            fields.set(
                format!("day{n}_temp_max"),
                FieldValue::number_or_null(day.and_then(|d| json_num(d, "tempMax"))),
            );
        }

        let shown = &daily[..daily.len().min(FORECAST_DAYS)];
        let trend = match (shown.first(), shown.last()) {
            (Some(first), Some(last)) if shown.len() >= 2 => {
                match (json_num(first, "tempMax"), json_num(last, "tempMax")) {
                    (Some(a), Some(b)) => Some(temperature_trend(a, b)),
                    _ => None,
                }
            }
            _ => None,
        };
        fields.set("trend", FieldValue::text_or_null(trend));

        let updated = json_str(&v, "updateTime")
            .as_deref()
            .and_then(parse_update_time)
            .map_or(FieldValue::Null, FieldValue::Timestamp);
        fields.set("updated_at", updated);
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    const BODY: &str = r#"{
      "code": "200",
      "updateTime": "2026-10-18T08:35+08:00",
      "daily": [
        {"fxDate": "2026-10-18", "tempMax": "21", "tempMin": "12", "textDay": "晴", "textNight": "多云"},
        {"fxDate": "2026-10-19", "tempMax": "23", "tempMin": "13", "textDay": "多云", "textNight": "阴"},
        {"fxDate": "2026-10-20", "tempMax": "25", "tempMin": "14", "textDay": "晴", "textNight": "晴"}
      ]
    }"#;

    fn cfg() -> SourceConfig {
        SourceConfig::with_defaults("weather", SourceKind::Weather)
            .with_filter("location", "101010100")
            .with_credential("api_key", "k-1")
    }

    #[test]
    fn validate_requires_location_and_key() {
        let bare = SourceConfig::with_defaults("weather", SourceKind::Weather);
        assert!(WeatherAdapter.validate(&bare).is_err());
        assert!(WeatherAdapter
            .validate(&bare.clone().with_filter("location", "101010100"))
            .is_err());
        assert!(WeatherAdapter.validate(&cfg()).is_ok());
    }

    #[test]
    fn key_travels_in_header_not_url() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let req = WeatherAdapter.build_request(&cfg(), today).unwrap();
        assert_eq!(req.url.query(), Some("location=101010100&lang=zh&unit=m"));
        assert_eq!(req.header("X-QW-Api-Key"), Some("k-1"));
        assert!(!req.url.as_str().contains("k-1"));
    }

    #[test]
    fn parses_three_days() {
        let fs = WeatherAdapter.parse(&cfg(), BODY).unwrap();
        assert_eq!(fs.get("day0").and_then(FieldValue::as_text), Some("晴/多云 12~21°C"));
        assert_eq!(fs.get("day2_date").and_then(FieldValue::as_text), Some("2026-10-20"));
        assert_eq!(fs.get("day1_temp_max").and_then(FieldValue::as_number), Some(23.0));
        assert_eq!(fs.get("trend").and_then(FieldValue::as_text), Some("warming"));
        let expected = Utc.with_ymd_and_hms(2026, 10, 18, 0, 35, 0).unwrap();
        assert_eq!(fs.get("updated_at"), Some(&FieldValue::Timestamp(expected)));
    }

    #[test]
    fn short_forecast_nulls_missing_days() {
        let body = r#"{"code":"200","daily":[{"tempMax":"10","tempMin":"2","textDay":"雪","textNight":"雪"}]}"#;
        let fs = WeatherAdapter.parse(&cfg(), body).unwrap();
        assert_eq!(fs.get("day1"), Some(&FieldValue::Null));
        assert_eq!(fs.get("day2_temp_min"), Some(&FieldValue::Null));
        assert_eq!(fs.get("trend"), Some(&FieldValue::Null));
        assert_eq!(fs.get("updated_at"), Some(&FieldValue::Null));
    }

    #[test]
    fn body_codes_classify_like_http() {
        let err = WeatherAdapter.parse(&cfg(), r#"{"code":"401"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Upstream4xx);
        let err = WeatherAdapter.parse(&cfg(), r#"{"code":"500"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Upstream5xx);
    }

    #[test]
    fn empty_daily_is_parse_error() {
        let err = WeatherAdapter
            .parse(&cfg(), r#"{"code":"200","daily":[]}"#)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn trend_thresholds() {
        assert_eq!(temperature_trend(20.0, 22.0), "warming");
        assert_eq!(temperature_trend(20.0, 18.0), "cooling");
        assert_eq!(temperature_trend(20.0, 21.5), "steady");
    }
}
