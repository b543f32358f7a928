// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod config;
pub mod cycle;
pub mod dedup;
pub mod feed;
pub mod metrics;

// Delivery core: rate limiter, per-endpoint queues, fan-out dispatcher
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::app::{shutdown_signal, RelayApp};
pub use crate::config::{ConfigError, RelayConfig};
pub use crate::cycle::{CycleProcessor, CycleReport, RunMode};
pub use crate::dedup::{DedupCache, Policy};
pub use crate::feed::types::{Item, SourceKind, SourceRef};
pub use crate::notify::{DispatchOutcome, Dispatcher, Endpoint};
