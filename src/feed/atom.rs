// src/feed/atom.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::feed::normalize_text;
use crate::feed::types::{FeedProvider, Item, SourceRef};

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<String>,
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    #[serde(rename = "yt:videoId")]
    video_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    author: Option<Author>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "media:group")]
    media: Option<MediaGroup>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaGroup {
    #[serde(rename = "media:thumbnail")]
    thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    #[serde(rename = "@url")]
    url: String,
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc3339).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

pub struct AtomFeedProvider {
    source: SourceRef,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl AtomFeedProvider {
    pub fn from_source(source: SourceRef, client: reqwest::Client) -> Self {
        let url = source.feed_url();
        Self {
            source,
            mode: Mode::Http { url, client },
        }
    }

    pub fn from_fixture_str(source: SourceRef, xml: &str) -> Self {
        Self {
            source,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<Item>> {
        let t0 = std::time::Instant::now();
        let feed: AtomFeed = from_str(s).context("parsing atom feed xml")?;
        let feed_title = feed.title.as_deref().map(normalize_text);

        let mut out = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            let Some(id) = entry_id(&entry) else {
                tracing::debug!(source = %self.source, "atom entry without id skipped");
                continue;
            };
            let Some(published_at) = entry
                .published
                .as_deref()
                .or(entry.updated.as_deref())
                .and_then(parse_rfc3339)
            else {
                tracing::debug!(source = %self.source, item = %id, "atom entry without valid timestamp skipped");
                continue;
            };

            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                .map(|l| l.href.clone())
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));

            let source_name = entry
                .author
                .and_then(|a| a.name)
                .map(|n| normalize_text(&n))
                .filter(|n| !n.is_empty())
                .or_else(|| feed_title.clone())
                .unwrap_or_else(|| self.source.id.clone());

            out.push(Item {
                title: normalize_text(entry.title.as_deref().unwrap_or_default()),
                url,
                source: self.source.clone(),
                source_name,
                published_at,
                thumbnail: entry.media.and_then(|m| m.thumbnail).map(|t| t.url),
                id,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("feed_parse_ms").record(ms);
        counter!("feed_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

fn entry_id(entry: &Entry) -> Option<String> {
    if let Some(v) = entry.video_id.as_deref().map(str::trim) {
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }
    let raw = entry.id.as_deref()?.trim();
    let id = raw.strip_prefix("yt:video:").unwrap_or(raw);
    (!id.is_empty()).then(|| id.to_string())
}

#[async_trait]
impl FeedProvider for AtomFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<Item>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .timeout(Duration::from_secs(15))
                    .send()
                    .await
                    .with_context(|| format!("feed http get {url}"))?
                    .error_for_status()
                    .with_context(|| format!("feed http status {url}"))?
                    .text()
                    .await
                    .context("feed http .text()")?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn source(&self) -> &SourceRef {
        &self.source
    }
}
