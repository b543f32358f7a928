//! # Cycle Processor
//! One polling pass: pick a policy, filter through the dedup cache, fan the
//! survivors out, and persist the cache.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::dedup::store::{CacheStore, SaveOutcome};
use crate::dedup::{DedupCache, Policy, DEFAULT_MAX_ENTRIES};
use crate::feed::types::Item;
use crate::notify::Dispatcher;

/// Operating mode chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Normal operation; the first run only primes the cache.
    #[default]
    Production,
    /// One item per source, for low-noise verification.
    Sampled,
    /// Everything unseen, even on the first run.
    Verbose,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(RunMode::Production),
            "sampled" | "sample" => Ok(RunMode::Sampled),
            "verbose" | "full" => Ok(RunMode::Verbose),
            other => Err(format!(
                "expected `production`, `sampled` or `verbose`, got `{other}`"
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Production => "production",
            RunMode::Sampled => "sampled",
            RunMode::Verbose => "verbose",
        })
    }
}

/// Quiet bootstrap applies only to a production run over an empty cache.
pub fn select_policy(mode: RunMode, is_bootstrap: bool) -> Policy {
    match mode {
        RunMode::Production if is_bootstrap => Policy::BootstrapQuiet,
        RunMode::Production | RunMode::Verbose => Policy::Full,
        RunMode::Sampled => Policy::Sampled,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub policy: Option<Policy>,
    pub delivered_items: usize,
    pub failed_outcomes: usize,
    /// `None` when no save was attempted or the write failed.
    pub saved: Option<SaveOutcome>,
}

impl CycleReport {
    fn idle() -> Self {
        Self {
            candidates: 0,
            policy: None,
            delivered_items: 0,
            failed_outcomes: 0,
            saved: None,
        }
    }
}

/// Owns the dedup cache and its store; the only writer of either.
#[derive(Debug)]
pub struct CycleProcessor {
    mode: RunMode,
    cache: DedupCache,
    store: CacheStore,
    max_entries: usize,
}

impl CycleProcessor {
    /// Loads the cache from `store` (never fails).
    pub fn new(mode: RunMode, store: CacheStore) -> Self {
        let cache = store.load();
        Self::with_cache(mode, cache, store)
    }

    pub fn with_cache(mode: RunMode, cache: DedupCache, store: CacheStore) -> Self {
        Self {
            mode,
            cache,
            store,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub async fn run(&mut self, items: Vec<Item>, dispatcher: &Dispatcher) -> Result<CycleReport> {
        counter!("relay_cycles_total").increment(1);
        if items.is_empty() {
            debug!("no candidate items this cycle");
            return Ok(CycleReport::idle());
        }

        let bootstrap = self.cache.is_bootstrap();
        let policy = select_policy(self.mode, bootstrap);
        let to_deliver = self.cache.process(&items, bootstrap, policy);
        let dropped = self.cache.cleanup(self.max_entries);
        if dropped > 0 {
            debug!(dropped, "trimmed dedup cache");
        }
        for (source, ts) in self.cache.latest_by_source() {
            gauge!("relay_source_latest_ts", "source" => source.clone()).set(ts.timestamp() as f64);
        }
        counter!("relay_items_new_total").increment(to_deliver.len() as u64);

        if policy == Policy::BootstrapQuiet && bootstrap {
            info!(
                primed = self.cache.len(),
                "first run: cache primed, nothing delivered"
            );
        }

        let mut report = CycleReport {
            candidates: items.len(),
            policy: Some(policy),
            delivered_items: to_deliver.len(),
            failed_outcomes: 0,
            saved: None,
        };

        let force = !to_deliver.is_empty();
        if force {
            info!(items = to_deliver.len(), ?policy, "delivering new items");
            let outcomes = dispatcher.deliver_batch(&to_deliver).await;
            report.failed_outcomes = outcomes.iter().filter(|o| !o.is_success()).count();
        }

        report.saved = self.save(force);
        Ok(report)
    }

    /// Final write on shutdown.
    pub fn flush(&mut self) -> Option<SaveOutcome> {
        self.save(true)
    }

    /// `None` when the write failed; the in-memory cache stays authoritative.
    fn save(&mut self, force: bool) -> Option<SaveOutcome> {
        match self.store.save(&self.cache, force) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                counter!("relay_cache_save_errors_total").increment(1);
                warn!(error = %e, "saving dedup cache failed, keeping in-memory state");
                None
            }
        }
    }
}
