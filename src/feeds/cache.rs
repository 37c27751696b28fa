// src/feeds/cache.rs
//! Per-source cache entries and the slot that serializes writes to them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{ErrorInfo, FetchError};
use crate::feeds::scheduler::{Applied, CycleSink};
use crate::fields::FieldSet;

/// Last known state of one source. Entries are never mutated in place:
/// every accepted result builds a new entry that replaces the old `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub source_id: String,
    pub last_good: Option<Arc<FieldSet>>,
    /// Start time of the fetch that produced `last_good`.
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub consecutive_failures: u32,
    /// Bumped on every install of `last_good`.
    pub generation: u64,
}

impl CacheEntry {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// A result started at or before the installed fetch is stale on arrival.
    fn is_outdated(&self, started_at: DateTime<Utc>) -> bool {
        self.last_fetch_time.is_some_and(|t| started_at <= t)
    }

    fn attempt_time(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        self.last_attempt_time
            .map_or(started_at, |t| t.max(started_at))
    }

    /// Entry after a successful fetch, or `None` if the result is outdated.
    pub fn with_success(&self, started_at: DateTime<Utc>, fields: FieldSet) -> Option<Self> {
        if self.is_outdated(started_at) {
            return None;
        }
        Some(Self {
            source_id: self.source_id.clone(),
            last_good: Some(Arc::new(fields)),
            last_fetch_time: Some(started_at),
            last_attempt_time: Some(self.attempt_time(started_at)),
            last_error: self.last_error.clone(),
            consecutive_failures: 0,
            generation: self.generation + 1,
        })
    }

    /// Entry after a failed fetch. `last_good` and `last_fetch_time` carry over.
    pub fn with_failure(
        &self,
        started_at: DateTime<Utc>,
        err: &FetchError,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        if self.is_outdated(started_at) {
            return None;
        }
        Some(Self {
            last_attempt_time: Some(self.attempt_time(started_at)),
            last_error: Some(ErrorInfo::from_fetch(err, occurred_at)),
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            ..self.clone()
        })
    }

    /// `now - last_fetch_time > 2 × refresh_interval`. No data counts as stale.
    pub fn is_stale(&self, refresh_interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(fetched) = self.last_fetch_time else {
            return true;
        };
        match (now - fetched).to_std() {
            Ok(age) => age > refresh_interval.saturating_mul(2),
            // fetched "in the future" relative to `now`
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

/// Delivered to observers once per install of new fields.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub source_id: String,
    pub fields: Arc<FieldSet>,
    pub fetched_at: DateTime<Utc>,
    pub generation: u64,
}

pub type Observer = Arc<dyn Fn(&FieldUpdate) -> anyhow::Result<()> + Send + Sync>;

struct SlotState {
    entry: Arc<CacheEntry>,
    retired: bool,
}

/// Single-writer home of one source's cache entry plus its observers.
///
/// Reads clone the current `Arc<CacheEntry>`; writes build a new entry and
/// swap it while holding the write guard, so a reader never sees a partial
/// update. Once retired the slot rejects every write.
pub struct SourceSlot {
    source_id: String,
    state: RwLock<SlotState>,
    observers: RwLock<Vec<(SubscriptionId, Observer)>>,
}

impl SourceSlot {
    pub fn new(source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            state: RwLock::new(SlotState {
                entry: Arc::new(CacheEntry::new(source_id.clone())),
                retired: false,
            }),
            source_id,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<CacheEntry> {
        let st = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&st.entry)
    }

    pub fn retire(&self) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        st.retired = true;
    }

    pub fn add_observer(&self, id: SubscriptionId, observer: Observer) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
    }

    pub fn remove_observer(&self, id: SubscriptionId) -> bool {
        let mut obs = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = obs.len();
        obs.retain(|(sid, _)| *sid != id);
        obs.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Apply `update` to the current entry under the write guard.
    fn install(
        &self,
        update: impl FnOnce(&CacheEntry) -> Option<CacheEntry>,
    ) -> (Applied, Arc<CacheEntry>) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if st.retired {
            return (Applied::Retired, Arc::clone(&st.entry));
        }
        match update(st.entry.as_ref()) {
            Some(next) => {
                st.entry = Arc::new(next);
                (Applied::Installed, Arc::clone(&st.entry))
            }
            None => (Applied::Discarded, Arc::clone(&st.entry)),
        }
    }

    /// Run every observer on the blocking pool; failures only reach the log.
    fn notify(&self, entry: &CacheEntry) {
        let (Some(fields), Some(fetched_at)) = (entry.last_good.clone(), entry.last_fetch_time)
        else {
            return;
        };
        let observers: Vec<(SubscriptionId, Observer)> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if observers.is_empty() {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                target: "coordinator",
                source = %self.source_id,
                "no runtime, observers not notified"
            );
            return;
        };

        let update = Arc::new(FieldUpdate {
            source_id: self.source_id.clone(),
            fields,
            fetched_at,
            generation: entry.generation,
        });
        for (sub, observer) in observers {
            let update = Arc::clone(&update);
            let job = rt.spawn_blocking(move || observer(update.as_ref()));
            let source = self.source_id.clone();
            rt.spawn(async move {
                match job.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        target: "coordinator",
                        source = %source,
                        subscription = sub.0,
                        error = %e,
                        "observer returned an error"
                    ),
                    Err(e) => tracing::error!(
                        target: "coordinator",
                        source = %source,
                        subscription = sub.0,
                        error = %e,
                        "observer panicked"
                    ),
                }
            });
        }
    }
}

impl CycleSink for SourceSlot {
    fn on_success(&self, started_at: DateTime<Utc>, fields: FieldSet) -> Applied {
        let (applied, entry) = self.install(|e| e.with_success(started_at, fields));
        if applied == Applied::Installed {
            self.notify(&entry);
        }
        applied
    }

    fn on_failure(
        &self,
        started_at: DateTime<Utc>,
        err: &FetchError,
        occurred_at: DateTime<Utc>,
    ) -> Applied {
        self.install(|e| e.with_failure(started_at, err, occurred_at)).0
    }

    fn consecutive_failures(&self) -> u32 {
        self.snapshot().consecutive_failures
    }
}
