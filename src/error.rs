// src/error.rs
//! Error taxonomy shared by adapters, the scheduler and the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Classification of a failed fetch. Every kind is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Parse,
    #[serde(rename = "upstream_4xx")]
    Upstream4xx,
    #[serde(rename = "upstream_5xx")]
    Upstream5xx,
    Timeout,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Upstream4xx => "upstream_4xx",
            Self::Upstream5xx => "upstream_5xx",
            Self::Timeout => "timeout",
        }
    }

    /// Map a non-2xx HTTP status (or an upstream status code embedded in a
    /// JSON body) to an error kind.
    pub const fn from_status(status: u16) -> Self {
        match status {
            400..=499 => Self::Upstream4xx,
            500..=599 => Self::Upstream5xx,
            _ => Self::Network,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single fetch-and-parse cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message)
    }

    /// Missing required field: the payload is unusable.
    pub fn missing(field: &str) -> Self {
        Self::parse(format!("required field `{field}` missing from response"))
    }
}

/// Last error recorded against a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_fetch(err: &FetchError, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            occurred_at,
        }
    }
}

/// Errors surfaced by the coordinator's public operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("invalid source config: {0}")]
    Config(String),
    #[error("source `{0}` has not produced data yet")]
    NoData(String),
    #[error("source `{0}` is not registered")]
    UnknownSource(String),
}
