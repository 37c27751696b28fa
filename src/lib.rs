// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod feeds;
pub mod fields;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::coordinator::{Coordinator, FieldSnapshot, SourceStatus};
pub use crate::error::{CoordinatorError, ErrorInfo, ErrorKind, FetchError};
pub use crate::feeds::cache::{FieldUpdate, SubscriptionId};
pub use crate::feeds::config::SourceConfig;
pub use crate::feeds::types::{SourceAdapter, SourceKind};
pub use crate::fields::{FieldSet, FieldValue};
