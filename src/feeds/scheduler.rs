// src/feeds/scheduler.rs
//! Per-source poll loop: fetch, record, back off, repeat.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::feeds::config::SourceConfig;
use crate::feeds::ensure_metrics_described;
use crate::feeds::transport::Transport;
use crate::feeds::types::SourceAdapter;
use crate::fields::FieldSet;

/// Outcome of handing a fetch result to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Installed,
    /// Result started no later than the installed one.
    Discarded,
    /// Source was deregistered; the loop must stop.
    Retired,
}

/// Where a scheduler records its results.
pub trait CycleSink: Send + Sync {
    fn on_success(&self, started_at: DateTime<Utc>, fields: FieldSet) -> Applied;
    fn on_failure(
        &self,
        started_at: DateTime<Utc>,
        err: &FetchError,
        occurred_at: DateTime<Utc>,
    ) -> Applied;
    fn consecutive_failures(&self) -> u32;
}

/// Exponential backoff over the configured interval.
///
/// After `n >= 1` consecutive failures the delay is
/// `base * 2^min(n - 1, max_exponent)`, clamped to `ceiling` but never
/// below `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_exponent: u32,
    pub ceiling: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_exponent: 6,
            ceiling: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, base: Duration, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return base;
        }
        let exp = (consecutive_failures - 1).min(self.max_exponent).min(31);
        let scaled = base.saturating_mul(1u32 << exp);
        match self.ceiling {
            Some(cap) => scaled.min(cap).max(base),
            None => scaled,
        }
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Stand-in for a deadline that does not fit in an `Instant`.
fn far_future(now: Instant) -> Instant {
    now.checked_add(FAR_FUTURE).unwrap_or(now)
}

/// Next tick after a fetch that started at `started`.
///
/// Ticks fall on `started + k * delay`. Every tick that passed while the
/// fetch was in flight is dropped; returns the next deadline and how many
/// ticks were dropped.
pub fn next_deadline(started: Instant, delay: Duration, now: Instant) -> (Instant, u64) {
    if delay.is_zero() {
        return (now, 0);
    }
    let elapsed = now.saturating_duration_since(started);
    if elapsed <= delay {
        return (started.checked_add(delay).unwrap_or_else(|| far_future(now)), 0);
    }
    let k = elapsed.as_nanos().div_ceil(delay.as_nanos());
    let k32 = u32::try_from(k).unwrap_or(u32::MAX);
    let deadline = delay
        .checked_mul(k32)
        .and_then(|d| started.checked_add(d))
        .unwrap_or_else(|| far_future(now));
    (deadline, u64::try_from(k - 1).unwrap_or(u64::MAX))
}

/// Shared view of a running loop used for out-of-band refreshes.
#[derive(Clone)]
pub struct RefreshTrigger {
    requests: mpsc::Sender<()>,
    in_flight: Arc<AtomicBool>,
}

impl RefreshTrigger {
    fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let trigger = Self {
            requests: tx,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        (trigger, rx)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Request an immediate fetch. Returns `false` (and does nothing) when a
    /// fetch is already running or requested.
    ///
    /// The flag is claimed here, so a second caller is refused even before
    /// the loop wakes up.
    pub fn fire(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.requests.try_send(()).is_err() {
            self.in_flight.store(false, Ordering::Release);
            return false;
        }
        true
    }
}

pub struct PollScheduler {
    config: Arc<SourceConfig>,
    adapter: Arc<dyn SourceAdapter>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn CycleSink>,
    backoff: BackoffPolicy,
    trigger: RefreshTrigger,
    requests: mpsc::Receiver<()>,
    token: CancellationToken,
}

impl PollScheduler {
    pub fn new(
        config: Arc<SourceConfig>,
        adapter: Arc<dyn SourceAdapter>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn CycleSink>,
        token: CancellationToken,
    ) -> Self {
        let (trigger, requests) = RefreshTrigger::channel();
        Self {
            config,
            adapter,
            transport,
            sink,
            backoff: BackoffPolicy::default(),
            trigger,
            requests,
            token,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Loop until cancelled or the sink is retired. The first fetch is immediate.
    ///
    /// A due tick wins over a pending manual request; that request is then
    /// served by the tick's fetch and dropped.
    pub async fn run(mut self) {
        ensure_metrics_described();
        let source = self.config.source_id.clone();
        let interval = self.config.refresh_interval;
        let mut next = Instant::now();
        info!(target: "scheduler", source = %source, interval_secs = interval.as_secs(), "poll loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = sleep_until(next) => {}
                Some(()) = self.requests.recv() => {
                    debug!(target: "scheduler", source = %source, "manual refresh");
                }
            }

            let started = Instant::now();
            let started_at = Utc::now();
            self.trigger.in_flight.store(true, Ordering::Release);
            let fetch_timeout = self.config.fetch_timeout();
            let fetch = self.adapter.fetch(&self.config, self.transport.as_ref());
            let outcome = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                r = timeout(fetch_timeout, fetch) => Some(r.unwrap_or_else(|_| {
                    Err(FetchError::timeout(format!(
                        "no response within {}ms",
                        fetch_timeout.as_millis()
                    )))
                })),
            };
            // requests that raced with this fetch are served by it
            while self.requests.try_recv().is_ok() {}
            self.trigger.in_flight.store(false, Ordering::Release);
            let Some(outcome) = outcome else {
                debug!(target: "scheduler", source = %source, "in-flight fetch cancelled");
                break;
            };

            counter!("source_fetch_total", "source" => source.clone()).increment(1);
            histogram!("source_fetch_ms", "source" => source.clone())
                .record(started.elapsed().as_secs_f64() * 1000.0);

            let applied = match outcome {
                Ok(fields) => {
                    let n = fields.len();
                    let applied = self.sink.on_success(started_at, fields);
                    if applied == Applied::Installed {
                        debug!(target: "scheduler", source = %source, fields = n, "fields installed");
                    }
                    applied
                }
                Err(err) => {
                    counter!(
                        "source_fetch_errors_total",
                        "source" => source.clone(),
                        "kind" => err.kind.as_str()
                    )
                    .increment(1);
                    let applied = self.sink.on_failure(started_at, &err, Utc::now());
                    if applied == Applied::Installed {
                        warn!(
                            target: "scheduler",
                            source = %source,
                            kind = %err.kind,
                            error = %err.message,
                            "fetch failed"
                        );
                    }
                    applied
                }
            };

            match applied {
                Applied::Retired => break,
                Applied::Discarded => {
                    counter!("source_results_discarded_total", "source" => source.clone())
                        .increment(1);
                    debug!(target: "scheduler", source = %source, "outdated result discarded");
                }
                Applied::Installed => {}
            }

            let failures = self.sink.consecutive_failures();
            gauge!("source_consecutive_failures", "source" => source.clone()).set(failures as f64);

            let delay = self.backoff.delay(interval, failures);
            let (deadline, skipped) = next_deadline(started, delay, Instant::now());
            if skipped > 0 {
                counter!("source_ticks_skipped_total", "source" => source.clone())
                    .increment(skipped);
                info!(
                    target: "scheduler",
                    source = %source,
                    skipped,
                    "ticks skipped while fetch was in flight"
                );
            }
            if failures > 0 {
                debug!(
                    target: "scheduler",
                    source = %source,
                    failures,
                    delay_secs = delay.as_secs(),
                    "backing off"
                );
            }
            next = deadline;
        }

        info!(target: "scheduler", source = %source, "poll loop stopped");
    }
}
