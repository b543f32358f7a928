// tests/common/mod.rs
// Shared helpers for integration tests: items, payloads, a scripted sender.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feed_relay::feed::types::{FeedProvider, Item, SourceRef};
use feed_relay::notify::{SendError, WebhookPayload, WebhookSender};
use parking_lot::Mutex;
use tokio::time::Instant;

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap()
}

pub fn item(id: &str, source: &str, minute: u32) -> Item {
    Item {
        id: id.into(),
        title: format!("title {id}"),
        url: format!("https://www.youtube.com/watch?v={id}"),
        source: SourceRef::channel(source),
        source_name: format!("{source} name"),
        published_at: at(minute),
        thumbnail: None,
    }
}

pub fn payload(id: &str) -> Arc<WebhookPayload> {
    Arc::new(WebhookPayload::from_item(&item(id, "S1", 0)))
}

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    Quota(Option<Duration>),
    /// Pops one result per call; succeeds once the script runs out.
    Script(Arc<Mutex<VecDeque<Result<(), SendError>>>>),
    /// Never completes.
    Hang,
}

impl Behavior {
    pub fn script(results: Vec<Result<(), SendError>>) -> Self {
        Behavior::Script(Arc::new(Mutex::new(results.into())))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub title: String,
    pub at: Instant,
}

/// Records every send attempt and answers per endpoint URL.
#[derive(Default)]
pub struct MockSender {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<Call>>,
}

impl MockSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().insert(url.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }
}

#[async_trait]
impl WebhookSender for MockSender {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), SendError> {
        self.calls.lock().push(Call {
            url: url.to_string(),
            title: payload.embeds[0].title.clone(),
            at: Instant::now(),
        });
        let behavior = self
            .behaviors
            .lock()
            .get(url)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        if matches!(behavior, Behavior::Hang) {
            return std::future::pending().await;
        }
        respond(behavior)
    }
}

fn respond(behavior: Behavior) -> Result<(), SendError> {
    match behavior {
        Behavior::Succeed | Behavior::Hang => Ok(()),
        Behavior::Fail => Err(SendError::Transport("HTTP 500".into())),
        Behavior::Quota(retry_after) => Err(SendError::Quota { retry_after }),
        Behavior::Script(q) => {
            let next = q.lock().pop_front();
            next.unwrap_or(Ok(()))
        }
    }
}

/// Feed whose contents the test swaps between cycles.
#[derive(Clone)]
pub struct StaticFeed {
    source: SourceRef,
    items: Arc<Mutex<Vec<Item>>>,
}

impl StaticFeed {
    pub fn new(source: &str, items: Vec<Item>) -> Self {
        Self {
            source: SourceRef::channel(source),
            items: Arc::new(Mutex::new(items)),
        }
    }

    pub fn replace(&self, items: Vec<Item>) {
        *self.items.lock() = items;
    }
}

#[async_trait]
impl FeedProvider for StaticFeed {
    async fn fetch_latest(&self) -> anyhow::Result<Vec<Item>> {
        Ok(self.items.lock().clone())
    }

    fn source(&self) -> &SourceRef {
        &self.source
    }
}

/// Provider that always errors.
pub struct BrokenFeed(pub SourceRef);

#[async_trait]
impl FeedProvider for BrokenFeed {
    async fn fetch_latest(&self) -> anyhow::Result<Vec<Item>> {
        anyhow::bail!("feed unavailable")
    }

    fn source(&self) -> &SourceRef {
        &self.0
    }
}
