// src/feeds/types.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::transport::{FeedRequest, Transport};
use crate::fields::FieldSet;

/// Feed families the crate ships adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Quote,
    Poetry,
    Fuel,
    History,
    Weather,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Quote,
        SourceKind::Poetry,
        SourceKind::Fuel,
        SourceKind::History,
        SourceKind::Weather,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Poetry => "poetry",
            Self::Fuel => "fuel",
            Self::History => "history",
            Self::Weather => "weather",
        }
    }

    /// Infer the kind from a source id, accepting the legacy service names.
    pub fn from_source_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "quote" | "hitokoto" => Some(Self::Quote),
            "poetry" | "jinrishici" => Some(Self::Poetry),
            "fuel" | "oil" | "oilprice" => Some(Self::Fuel),
            "history" => Some(Self::History),
            "weather" | "qweather" => Some(Self::Weather),
            _ => None,
        }
    }

    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::Quote => "https://v1.hitokoto.cn/",
            Self::Poetry => "https://v1.jinrishici.com/all",
            Self::Fuel => "http://www.qiyoujiage.com/",
            Self::History => "http://www.todayonhistory.com/",
            Self::Weather => "https://devapi.qweather.com/v7/weather/3d",
        }
    }

    pub const fn default_refresh_interval(self) -> Duration {
        let minutes = match self {
            Self::Quote | Self::Poetry | Self::History => 10,
            Self::Weather => 30,
            Self::Fuel => 360,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-feed request building and response parsing.
///
/// `parse` must be pure over the body: the same upstream response always
/// yields the same `FieldSet`. Adapters never retry; the scheduler owns
/// retry policy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Reject configs this adapter cannot ever serve (missing location, key...).
    fn validate(&self, _config: &SourceConfig) -> Result<(), String> {
        Ok(())
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        today: NaiveDate,
    ) -> Result<FeedRequest, FetchError>;

    fn parse(&self, config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError>;

    async fn fetch(
        &self,
        config: &SourceConfig,
        transport: &dyn Transport,
    ) -> Result<FieldSet, FetchError> {
        let request = self.build_request(config, chrono::Local::now().date_naive())?;
        let response = transport.get(&request).await?;
        if !response.is_success() {
            return Err(FetchError::status(
                response.status,
                format!("{} upstream returned status {}", self.kind(), response.status),
            ));
        }
        self.parse(config, &response.body)
    }
}
