// src/feeds/mod.rs
pub mod cache;
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod transport;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("source_fetch_total", "Fetch attempts per source.");
        describe_counter!(
            "source_fetch_errors_total",
            "Failed fetches per source and error kind."
        );
        describe_counter!(
            "source_ticks_skipped_total",
            "Ticks dropped because a fetch was still in flight."
        );
        describe_counter!(
            "source_results_discarded_total",
            "Results older than the installed entry."
        );
        describe_histogram!("source_fetch_ms", "Fetch + parse time in milliseconds.");
        describe_gauge!(
            "source_consecutive_failures",
            "Consecutive failed fetches per source."
        );
    });
}
