// src/feeds/transport.rs
//! HTTP GET seam between adapters and the network.

use async_trait::async_trait;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::FetchError;

const USER_AGENT: &str = "MyriadBox/0.1 (+home-automation feed poller)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl FeedRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

impl FeedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, FetchError>;
}

/// Production transport. Timeouts are enforced by the scheduler, so the
/// client itself only carries a generous connect timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, FetchError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.send().await.map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify_reqwest)?;
        Ok(FeedResponse { status, body })
    }
}

fn classify_reqwest(e: reqwest::Error) -> FetchError {
    // Never echo the URL: some feeds carry credentials.
    let e = e.without_url();
    if e.is_timeout() {
        FetchError::timeout(format!("request timed out: {e}"))
    } else if e.is_decode() || e.is_body() {
        FetchError::parse(format!("failed to read response body: {e}"))
    } else {
        FetchError::network(format!("request failed: {e}"))
    }
}

/// In-memory transport that replays queued responses in order.
///
/// Once the queue is drained the last response is repeated. An optional
/// delay makes every call slow, for timeout and overlap tests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<FeedResponse, FetchError>>>,
    last: Mutex<Option<Result<FeedResponse, FetchError>>>,
    requests: Mutex<Vec<FeedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<FeedResponse, FetchError>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub fn push_ok(&self, body: impl Into<String>) {
        self.push(Ok(FeedResponse::ok(body)));
    }

    pub fn push_err(&self, err: FetchError) {
        self.push(Err(err));
    }

    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match next {
            Some(resp) => {
                *last = Some(resp.clone());
                resp
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(FetchError::network("scripted transport is empty"))),
        }
    }
}
