// src/feeds/config.rs
use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoordinatorError;
use crate::feeds::types::SourceKind;

pub const ENV_SOURCES_PATH: &str = "MYRIAD_SOURCES_PATH";
pub const DEFAULT_SOURCES_TOML: &str = "config/sources.toml";
pub const DEFAULT_SOURCES_JSON: &str = "config/sources.json";

/// Upper bound for the derived fetch timeout.
pub const MAX_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Shorter intervals are raised to this at registration.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const MAX_FETCH_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Configuration for one source. Treated as immutable once registered;
/// changing any field means deregister + register.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    pub enabled: bool,
    pub endpoint: Url,
    pub refresh_interval: Duration,
    pub filters: BTreeMap<String, String>,
    pub credentials: Option<BTreeMap<String, String>>,
    pub timeout: Option<Duration>,
}

impl SourceConfig {
    /// Enabled config with the kind's default interval.
    pub fn new(
        source_id: impl Into<String>,
        kind: SourceKind,
        endpoint: &str,
    ) -> Result<Self, CoordinatorError> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| CoordinatorError::Config(format!("endpoint `{endpoint}`: {e}")))?;
        Ok(Self {
            source_id: source_id.into(),
            kind,
            enabled: true,
            endpoint,
            refresh_interval: kind.default_refresh_interval(),
            filters: BTreeMap::new(),
            credentials: None,
            timeout: None,
        })
    }

    /// Config pointing at the kind's public endpoint.
    pub fn with_defaults(source_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            enabled: true,
            endpoint: Url::parse(kind.default_endpoint()).expect("built-in endpoints are valid"),
            refresh_interval: kind.default_refresh_interval(),
            filters: BTreeMap::new(),
            credentials: None,
            timeout: None,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .as_ref()
            .and_then(|c| c.get(key))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Explicit timeout, else `min(refresh_interval / 2, 30s)`.
    pub fn fetch_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| (self.refresh_interval / 2).min(MAX_DEFAULT_TIMEOUT))
    }

    /// Shape checks shared by every kind.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.source_id.trim().is_empty() {
            return Err(CoordinatorError::Config("source_id must not be empty".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(CoordinatorError::Config(format!(
                "source `{}`: refresh_interval must be greater than zero",
                self.source_id
            )));
        }
        if self.refresh_interval > MAX_REFRESH_INTERVAL {
            return Err(CoordinatorError::Config(format!(
                "source `{}`: refresh_interval of {}s exceeds the {}s maximum",
                self.source_id,
                self.refresh_interval.as_secs(),
                MAX_REFRESH_INTERVAL.as_secs()
            )));
        }
        match self.timeout {
            Some(t) if t.is_zero() => {
                return Err(CoordinatorError::Config(format!(
                    "source `{}`: timeout must be greater than zero",
                    self.source_id
                )));
            }
            Some(t) if t > MAX_FETCH_TIMEOUT => {
                return Err(CoordinatorError::Config(format!(
                    "source `{}`: timeout of {}s exceeds the {}s maximum",
                    self.source_id,
                    t.as_secs(),
                    MAX_FETCH_TIMEOUT.as_secs()
                )));
            }
            _ => {}
        }
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(CoordinatorError::Config(format!(
                "source `{}`: endpoint must be http(s), got `{}`",
                self.source_id,
                self.endpoint.scheme()
            )));
        }
        Ok(())
    }

    /// Raise a sub-minute interval to [`MIN_REFRESH_INTERVAL`], with a warning.
    pub fn with_minimum_interval(mut self) -> Self {
        if self.refresh_interval < MIN_REFRESH_INTERVAL {
            let requested_ms = u64::try_from(self.refresh_interval.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                target: "coordinator",
                source = %self.source_id,
                requested_ms,
                "refresh interval below one minute, using 60s"
            );
            self.refresh_interval = MIN_REFRESH_INTERVAL;
        }
        self
    }
}

/// On-disk shape of one `[[sources]]` table.
#[derive(Debug, Deserialize)]
struct SourceRecord {
    id: String,
    #[serde(default)]
    kind: Option<SourceKind>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    refresh_minutes: Option<i64>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    filters: BTreeMap<String, String>,
    #[serde(default)]
    credentials: Option<BTreeMap<String, String>>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceRecord>,
}

impl SourceRecord {
    fn into_config(self) -> Result<SourceConfig> {
        let kind = self
            .kind
            .or_else(|| SourceKind::from_source_id(&self.id))
            .ok_or_else(|| anyhow!("source `{}`: cannot infer kind, set `kind`", self.id))?;
        let endpoint = self
            .endpoint
            .as_deref()
            .unwrap_or_else(|| kind.default_endpoint());
        let mut cfg = SourceConfig::new(self.id.clone(), kind, endpoint)
            .map_err(|e| anyhow!("source `{}`: {e}", self.id))?;

        cfg.enabled = self.enabled;
        if let Some(minutes) = self.refresh_minutes {
            // Non-positive values are kept as zero so registration reports them.
            let minutes = u64::try_from(minutes).unwrap_or(0);
            cfg.refresh_interval = Duration::from_secs(minutes.saturating_mul(60));
        }
        cfg.timeout = self.timeout_secs.map(Duration::from_secs);
        cfg.filters = self.filters;
        cfg.credentials = self.credentials.filter(|c| !c.is_empty());
        Ok(cfg)
    }
}

/// Load source configs from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load source configs using env var + fallbacks:
/// 1) $MYRIAD_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<SourceConfig>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from(DEFAULT_SOURCES_TOML);
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_SOURCES_JSON);
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceConfig>> {
    let file: SourcesFile = if hint_ext == "json" {
        serde_json::from_str(s).context("parsing sources json")?
    } else {
        match toml::from_str(s) {
            Ok(f) => f,
            Err(toml_err) => serde_json::from_str(s)
                .map_err(|_| anyhow!(toml_err))
                .context("parsing sources toml")?,
        }
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::with_capacity(file.sources.len());
    for rec in file.sources {
        if !seen.insert(rec.id.clone()) {
            return Err(anyhow!("duplicate source id `{}`", rec.id));
        }
        out.push(rec.into_config()?);
    }
    Ok(out)
}
