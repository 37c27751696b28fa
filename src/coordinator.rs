// src/coordinator.rs
//! Owns every registered source: its config, cache slot and poll loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CoordinatorError, ErrorInfo};
use crate::feeds::cache::{FieldUpdate, Observer, SourceSlot, SubscriptionId};
use crate::feeds::config::SourceConfig;
use crate::feeds::providers::adapter_for;
use crate::feeds::scheduler::{BackoffPolicy, CycleSink, PollScheduler, RefreshTrigger};
use crate::feeds::transport::Transport;
use crate::feeds::types::{SourceAdapter, SourceKind};
use crate::fields::FieldSet;

/// Extra time granted to a loop after cancellation before it is aborted.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Current fields of one source as seen by a reader.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSnapshot {
    pub source_id: String,
    pub fields: Arc<FieldSet>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    pub generation: u64,
}

/// Diagnostic view of a source's cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub kind: SourceKind,
    pub refresh_interval_secs: u64,
    pub has_data: bool,
    pub stale: bool,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub consecutive_failures: u32,
    pub next_delay_secs: u64,
    pub generation: u64,
    pub in_flight: bool,
    pub subscribers: usize,
}

struct SourceHandle {
    config: Arc<SourceConfig>,
    slot: Arc<SourceSlot>,
    trigger: RefreshTrigger,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SourceHandle {
    /// Retire the slot first so nothing lands after this call, then stop the loop.
    async fn stop(self) {
        self.slot.retire();
        self.token.cancel();
        let wait = self.config.fetch_timeout().saturating_add(STOP_GRACE);
        let abort = self.task.abort_handle();
        match tokio::time::timeout(wait, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => {
                warn!(
                    target: "coordinator",
                    source = %self.config.source_id,
                    error = %e,
                    "poll loop panicked"
                );
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    target: "coordinator",
                    source = %self.config.source_id,
                    "poll loop did not stop in time, aborting"
                );
                abort.abort();
            }
        }
    }
}

/// Multi-source update coordinator. Share it as `Arc<Coordinator>`.
pub struct Coordinator {
    sources: RwLock<HashMap<String, SourceHandle>>,
    transport: Arc<dyn Transport>,
    backoff: BackoffPolicy,
    next_subscription: AtomicU64,
}

impl Coordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            transport,
            backoff: BackoffPolicy::default(),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Register a source with the built-in adapter for its kind.
    pub fn register_source(&self, config: SourceConfig) -> Result<(), CoordinatorError> {
        let adapter = adapter_for(config.kind);
        self.register_source_with(config, adapter)
    }

    /// Register a source served by a caller-supplied adapter.
    ///
    /// Must be called inside a tokio runtime; the first fetch starts
    /// immediately. Disabled configs are validated and then ignored.
    pub fn register_source_with(
        &self,
        config: SourceConfig,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<(), CoordinatorError> {
        self.start_source(config, adapter, None).map(|_| ())
    }

    /// Register a source with `callback` already subscribed, so it also sees
    /// the install from the immediate first fetch. Returns `None` for a
    /// disabled config.
    pub fn register_source_observed<F>(
        &self,
        config: SourceConfig,
        callback: F,
    ) -> Result<Option<SubscriptionId>, CoordinatorError>
    where
        F: Fn(&FieldUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let adapter = adapter_for(config.kind);
        let observer: Observer = Arc::new(callback);
        self.start_source(config, adapter, Some(observer))
    }

    fn start_source(
        &self,
        config: SourceConfig,
        adapter: Arc<dyn SourceAdapter>,
        observer: Option<Observer>,
    ) -> Result<Option<SubscriptionId>, CoordinatorError> {
        config.validate()?;
        adapter.validate(&config).map_err(|msg| {
            CoordinatorError::Config(format!("source `{}`: {msg}", config.source_id))
        })?;

        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if sources.contains_key(&config.source_id) {
            return Err(CoordinatorError::Config(format!(
                "source `{}` is already registered",
                config.source_id
            )));
        }
        if !config.enabled {
            info!(
                target: "coordinator",
                source = %config.source_id,
                "source disabled, not scheduled"
            );
            return Ok(None);
        }

        let config = Arc::new(config.with_minimum_interval());
        let slot = Arc::new(SourceSlot::new(config.source_id.clone()));
        let subscription = observer.map(|observer| {
            let id = self.next_subscription_id();
            slot.add_observer(id, observer);
            id
        });
        let token = CancellationToken::new();
        let scheduler = PollScheduler::new(
            Arc::clone(&config),
            adapter,
            Arc::clone(&self.transport),
            Arc::clone(&slot) as Arc<dyn CycleSink>,
            token.clone(),
        )
        .with_backoff(self.backoff);
        let trigger = scheduler.trigger();
        let task = scheduler.spawn();

        info!(
            target: "coordinator",
            source = %config.source_id,
            kind = %config.kind,
            interval_secs = config.refresh_interval.as_secs(),
            "source registered"
        );
        sources.insert(
            config.source_id.clone(),
            SourceHandle {
                config,
                slot,
                trigger,
                token,
                task,
            },
        );
        Ok(subscription)
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    /// Stop a source and drop its cache entry. Returns whether it was registered.
    pub async fn deregister_source(&self, source_id: &str) -> bool {
        let handle = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_id);
        match handle {
            Some(h) => {
                h.stop().await;
                info!(target: "coordinator", source = %source_id, "source deregistered");
                true
            }
            None => false,
        }
    }

    /// Deregister every source.
    pub async fn shutdown(&self) {
        let handles: Vec<SourceHandle> = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, h)| h)
            .collect();
        let n = handles.len();
        for h in &handles {
            h.slot.retire();
            h.token.cancel();
        }
        for h in handles {
            h.stop().await;
        }
        info!(target: "coordinator", sources = n, "coordinator shut down");
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_registered(&self, source_id: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source_id)
    }

    fn with_handle<T>(
        &self,
        source_id: &str,
        f: impl FnOnce(&SourceHandle) -> T,
    ) -> Result<T, CoordinatorError> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources
            .get(source_id)
            .map(f)
            .ok_or_else(|| CoordinatorError::UnknownSource(source_id.to_string()))
    }

    pub fn get_fields(&self, source_id: &str) -> Result<FieldSnapshot, CoordinatorError> {
        self.get_fields_at(source_id, Utc::now())
    }

    /// Fields as of `now`; staleness is evaluated against that instant.
    pub fn get_fields_at(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FieldSnapshot, CoordinatorError> {
        let (entry, interval) =
            self.with_handle(source_id, |h| (h.slot.snapshot(), h.config.refresh_interval))?;
        let (Some(fields), Some(fetched_at)) = (entry.last_good.clone(), entry.last_fetch_time)
        else {
            return Err(CoordinatorError::NoData(source_id.to_string()));
        };
        Ok(FieldSnapshot {
            source_id: entry.source_id.clone(),
            fields,
            fetched_at,
            stale: entry.is_stale(interval, now),
            generation: entry.generation,
        })
    }

    pub fn status(&self, source_id: &str) -> Result<SourceStatus, CoordinatorError> {
        self.with_handle(source_id, |h| self.status_of(h, Utc::now()))
    }

    /// Status of every registered source, sorted by id.
    pub fn statuses(&self) -> Vec<SourceStatus> {
        let now = Utc::now();
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<SourceStatus> = sources.values().map(|h| self.status_of(h, now)).collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }

    fn status_of(&self, h: &SourceHandle, now: DateTime<Utc>) -> SourceStatus {
        let entry = h.slot.snapshot();
        let interval = h.config.refresh_interval;
        SourceStatus {
            source_id: entry.source_id.clone(),
            kind: h.config.kind,
            refresh_interval_secs: interval.as_secs(),
            has_data: entry.last_good.is_some(),
            stale: entry.is_stale(interval, now),
            last_fetch_time: entry.last_fetch_time,
            last_attempt_time: entry.last_attempt_time,
            last_error: entry.last_error.clone(),
            consecutive_failures: entry.consecutive_failures,
            next_delay_secs: self
                .backoff
                .delay(interval, entry.consecutive_failures)
                .as_secs(),
            generation: entry.generation,
            in_flight: h.trigger.is_in_flight(),
            subscribers: h.slot.observer_count(),
        }
    }

    /// Call `callback` after every install of new fields for `source_id`.
    ///
    /// Callbacks run on the blocking pool; an error or panic is logged and
    /// never reaches the poll loop.
    pub fn subscribe<F>(
        &self,
        source_id: &str,
        callback: F,
    ) -> Result<SubscriptionId, CoordinatorError>
    where
        F: Fn(&FieldUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_subscription_id();
        let observer: Observer = Arc::new(callback);
        self.with_handle(source_id, |h| h.slot.add_observer(id, observer))?;
        Ok(id)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|h| h.slot.remove_observer(subscription))
    }

    /// Trigger an immediate fetch. `Ok(false)` means a fetch was already in
    /// flight and the request was dropped.
    pub fn refresh_now(&self, source_id: &str) -> Result<bool, CoordinatorError> {
        let fired = self.with_handle(source_id, |h| h.trigger.fire())?;
        if !fired {
            info!(target: "coordinator", source = %source_id, "refresh skipped, fetch in flight");
        }
        Ok(fired)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let sources = self.sources.get_mut().unwrap_or_else(PoisonError::into_inner);
        for h in sources.values() {
            h.slot.retire();
            h.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::transport::ScriptedTransport;

    fn coordinator() -> (Coordinator, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        (Coordinator::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn duplicate_and_invalid_configs_are_rejected() {
        let (c, t) = coordinator();
        t.push_ok(r#"{"hitokoto":"x"}"#);
        c.register_source(SourceConfig::with_defaults("quote", SourceKind::Quote))
            .unwrap();
        let dup = c.register_source(SourceConfig::with_defaults("quote", SourceKind::Quote));
        assert!(matches!(dup, Err(CoordinatorError::Config(_))));

        let zero = SourceConfig::with_defaults("poetry", SourceKind::Poetry)
            .with_refresh_interval(Duration::ZERO);
        assert!(matches!(c.register_source(zero), Err(CoordinatorError::Config(_))));

        let no_key = SourceConfig::with_defaults("weather", SourceKind::Weather);
        assert!(matches!(c.register_source(no_key), Err(CoordinatorError::Config(_))));
        c.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_sources_are_not_scheduled() {
        let (c, t) = coordinator();
        c.register_source(SourceConfig::with_defaults("history", SourceKind::History).disabled())
            .unwrap();
        assert!(!c.is_registered("history"));
        assert_eq!(t.call_count(), 0);
        assert!(matches!(
            c.get_fields("history"),
            Err(CoordinatorError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn sub_minute_intervals_run_at_one_minute() {
        let (c, t) = coordinator();
        t.push_ok(r#"{"hitokoto":"x"}"#);
        let fast = SourceConfig::with_defaults("quote", SourceKind::Quote)
            .with_refresh_interval(Duration::from_millis(1));
        c.register_source(fast).unwrap();

        let st = c.status("quote").unwrap();
        assert_eq!(st.refresh_interval_secs, 60);
        c.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_timeout_is_rejected_before_scheduling() {
        let (c, t) = coordinator();
        let cfg = SourceConfig::with_defaults("quote", SourceKind::Quote)
            .with_timeout(Duration::from_secs(u64::MAX));
        assert!(matches!(c.register_source(cfg), Err(CoordinatorError::Config(_))));
        assert!(!c.is_registered("quote"));
        assert_eq!(t.call_count(), 0);
        assert!(!c.deregister_source("quote").await);
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let (c, t) = coordinator();
        t.push_ok(r#"{"hitokoto":"x"}"#);
        c.register_source(SourceConfig::with_defaults("quote", SourceKind::Quote))
            .unwrap();
        assert!(c.deregister_source("quote").await);
        assert!(!c.deregister_source("quote").await);
        assert!(matches!(c.status("quote"), Err(CoordinatorError::UnknownSource(_))));
    }
}
