// tests/common/mod.rs
// Shared helpers for the integration tests. Not every test file uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use myriad_box::feeds::transport::{FeedRequest, FeedResponse, ScriptedTransport, Transport};
use myriad_box::{FetchError, FieldSet, FieldValue, SourceAdapter, SourceConfig, SourceKind};

pub const MIN: Duration = Duration::from_secs(60);

pub const FUEL_PAGE: &str = include_str!("../fixtures/fuel_zhejiang.html");
pub const HISTORY_PAGE: &str = include_str!("../fixtures/history_today.html");
pub const WEATHER_JSON: &str = include_str!("../fixtures/weather_3d.json");
pub const HITOKOTO_JSON: &str = include_str!("../fixtures/hitokoto.json");

/// Adapter that republishes a flat JSON object as-is.
pub struct JsonFieldsAdapter;

#[async_trait]
impl SourceAdapter for JsonFieldsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Quote
    }

    fn build_request(
        &self,
        config: &SourceConfig,
        _today: NaiveDate,
    ) -> Result<FeedRequest, FetchError> {
        Ok(FeedRequest::get(config.endpoint.clone()))
    }

    fn parse(&self, _config: &SourceConfig, body: &str) -> Result<FieldSet, FetchError> {
        let v: serde_json::Value =
            serde_json::from_str(body).map_err(|e| FetchError::parse(e.to_string()))?;
        let obj = v
            .as_object()
            .ok_or_else(|| FetchError::parse("expected an object"))?;
        Ok(obj
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => FieldValue::Text(s.clone()),
                    serde_json::Value::Number(n) => FieldValue::number_or_null(n.as_f64()),
                    _ => FieldValue::Null,
                };
                (k.clone(), value)
            })
            .collect())
    }
}

/// Routes requests to a per-host script so several sources can share one coordinator.
#[derive(Default)]
pub struct HostRouter {
    routes: HashMap<String, Arc<ScriptedTransport>>,
}

impl HostRouter {
    pub fn route(mut self, host: &str, script: Arc<ScriptedTransport>) -> Self {
        self.routes.insert(host.to_string(), script);
        self
    }
}

#[async_trait]
impl Transport for HostRouter {
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, FetchError> {
        let host = request.url.host_str().unwrap_or_default();
        match self.routes.get(host) {
            Some(script) => script.get(request).await,
            None => Err(FetchError::network(format!("no route for {host}"))),
        }
    }
}

/// Let spawned loops run. Under a paused clock this advances time by 1ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `cond` every 10ms (real or paused clock) until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if cond() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    cond()
}

pub fn quote_config(endpoint: &str) -> SourceConfig {
    SourceConfig::new("quote", SourceKind::Quote, endpoint)
        .expect("valid endpoint")
        .with_refresh_interval(MIN * 10)
}

pub fn weather_config() -> SourceConfig {
    SourceConfig::with_defaults("weather", SourceKind::Weather)
        .with_filter("location", "101210101")
        .with_credential("api_key", "test-key")
}
