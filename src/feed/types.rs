// src/feed/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Channel,
    Playlist,
    Feed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Channel => "channel",
            SourceKind::Playlist => "playlist",
            SourceKind::Feed => "feed",
        }
    }
}

/// Where an item came from. Its string key (`channel:UC..`) is what the dedup
/// cache and the state file use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

impl SourceRef {
    pub fn new(kind: SourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self::new(SourceKind::Channel, id)
    }

    pub fn playlist(id: impl Into<String>) -> Self {
        Self::new(SourceKind::Playlist, id)
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Public page for the source, used as the author link in notifications.
    pub fn link(&self) -> String {
        match self.kind {
            SourceKind::Channel => format!("https://www.youtube.com/channel/{}", self.id),
            SourceKind::Playlist => format!("https://www.youtube.com/playlist?list={}", self.id),
            SourceKind::Feed => self.id.clone(),
        }
    }

    /// Atom feed location for the source.
    pub fn feed_url(&self) -> String {
        match self.kind {
            SourceKind::Channel => format!(
                "https://www.youtube.com/feeds/videos.xml?channel_id={}",
                self.id
            ),
            SourceKind::Playlist => format!(
                "https://www.youtube.com/feeds/videos.xml?playlist_id={}",
                self.id
            ),
            SourceKind::Feed => self.id.clone(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for SourceRef {
    type Err = String;

    /// Accepts `channel:<id>`, `playlist:<id>`, `feed:<url>`, a bare feed URL,
    /// or a bare channel id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty source".to_string());
        }
        let (kind, id) = match s.split_once(':') {
            Some(("channel", id)) => (SourceKind::Channel, id),
            Some(("playlist", id)) => (SourceKind::Playlist, id),
            Some(("feed", id)) => (SourceKind::Feed, id),
            Some(("http" | "https", _)) => (SourceKind::Feed, s),
            Some((other, _)) => return Err(format!("unknown source kind `{other}`")),
            None => (SourceKind::Channel, s),
        };
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("missing id in `{s}`"));
        }
        Ok(SourceRef::new(kind, id))
    }
}

/// A single piece of content discovered from a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: SourceRef,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
}

#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<Item>>;
    fn source(&self) -> &SourceRef;
}
