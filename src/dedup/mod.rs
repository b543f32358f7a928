//! Duplicate suppression.
//!
//! Tracks which item identities were already handled and the newest publish
//! time seen per source. Persistence lives in [`store`].

pub mod store;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::feed::types::{Item, SourceRef};

/// Default cap on remembered identities.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How a batch of unseen items turns into deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// First run: remember everything, deliver nothing.
    BootstrapQuiet,
    /// One item per source, everything remembered.
    Sampled,
    /// Every unseen item.
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupCache {
    seen: HashSet<String>,
    latest_by_source: BTreeMap<String, DateTime<Utc>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        seen: HashSet<String>,
        latest_by_source: BTreeMap<String, DateTime<Utc>>,
    ) -> Self {
        Self {
            seen,
            latest_by_source,
        }
    }

    /// No prior state: first run, or the state was reset.
    pub fn is_bootstrap(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn latest_by_source(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.latest_by_source
    }

    pub fn latest_for(&self, source: &SourceRef) -> Option<DateTime<Utc>> {
        self.latest_by_source.get(&source.key()).copied()
    }

    /// Pick the items to deliver from `items` under `policy`.
    ///
    /// Source timestamps are advanced for every item regardless of policy.
    /// Identities already in the cache are never returned and never re-marked.
    pub fn process(&mut self, items: &[Item], is_bootstrap: bool, policy: Policy) -> Vec<Item> {
        for item in items {
            self.observe(&item.source, item.published_at);
        }

        let mut fresh: Vec<&Item> = Vec::with_capacity(items.len());
        for item in items {
            // `insert` also collapses duplicate ids within the batch.
            if self.seen.insert(item.id.clone()) {
                fresh.push(item);
            }
        }

        match policy {
            Policy::BootstrapQuiet if is_bootstrap => Vec::new(),
            Policy::BootstrapQuiet | Policy::Full => fresh.into_iter().cloned().collect(),
            Policy::Sampled => {
                let mut taken: HashSet<&SourceRef> = HashSet::new();
                fresh
                    .into_iter()
                    .filter(|it| taken.insert(&it.source))
                    .cloned()
                    .collect()
            }
        }
    }

    /// Raise the latest timestamp of `source`; never lowers it.
    pub fn observe(&mut self, source: &SourceRef, published_at: DateTime<Utc>) {
        self.latest_by_source
            .entry(source.key())
            .and_modify(|ts| {
                if published_at > *ts {
                    *ts = published_at;
                }
            })
            .or_insert(published_at);
    }

    /// Bound `seen` to `max_entries` by keeping the lexicographically largest
    /// identities. Best effort: only approximates recency when ids sort by time.
    /// Returns how many identities were dropped.
    pub fn cleanup(&mut self, max_entries: usize) -> usize {
        if self.seen.len() <= max_entries {
            return 0;
        }
        let mut ids: Vec<String> = self.seen.drain().collect();
        ids.sort_unstable();
        let dropped = ids.len() - max_entries;
        self.seen = ids.into_iter().skip(dropped).collect();
        dropped
    }

    /// Number of sources with a recorded timestamp.
    pub fn source_count(&self) -> usize {
        self.latest_by_source.len()
    }
}
