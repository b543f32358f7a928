use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::SendError;
use super::WebhookSender;
use crate::feed::types::Item;

/// Discord caps embed titles at 256 characters.
const MAX_TITLE_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub author: EmbedAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    pub timestamp: String,
}

/// Body POSTed to every endpoint for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    pub fn from_item(item: &Item) -> Self {
        let title: String = if item.title.chars().count() > MAX_TITLE_CHARS {
            let mut t: String = item.title.chars().take(MAX_TITLE_CHARS - 1).collect();
            t.push('…');
            t
        } else {
            item.title.clone()
        };

        Self {
            content: None,
            embeds: vec![Embed {
                title,
                url: item.url.clone(),
                author: EmbedAuthor {
                    name: item.source_name.clone(),
                    url: item.source.link(),
                },
                image: item.thumbnail.clone().map(|url| EmbedImage { url }),
                timestamp: item.published_at.to_rfc3339(),
            }],
        }
    }
}

/// Posts payloads to Discord-compatible webhooks over HTTP.
/// One attempt per `send`; retries belong to the endpoint queue.
#[derive(Clone)]
pub struct DiscordSender {
    client: Client,
    timeout: Duration,
}

impl Default for DiscordSender {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl DiscordSender {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl WebhookSender for DiscordSender {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), SendError> {
        let rsp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| SendError::Transport(format!("webhook request failed: {e}")))?;

        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::Quota {
                retry_after: retry_after_of(rsp).await,
            });
        }
        Err(SendError::Transport(format!("webhook HTTP error: {status}")))
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

/// Server-provided delay: `Retry-After` header first, then Discord's JSON body.
async fn retry_after_of(rsp: Response) -> Option<Duration> {
    let header = rsp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    if header.is_some() {
        return header;
    }
    let body: RateLimitBody = rsp.json().await.ok()?;
    body.retry_after.and_then(secs_to_duration)
}

/// `Retry-After` is either delta-seconds (Discord sends fractions) or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return secs_to_duration(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// `None` for negative, non-finite, or out-of-range values.
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::SourceRef;
    use chrono::TimeZone;

    fn item(title: &str, thumb: Option<&str>) -> Item {
        Item {
            id: "vid1".into(),
            title: title.into(),
            url: "https://www.youtube.com/watch?v=vid1".into(),
            source: SourceRef::channel("UC1"),
            source_name: "Rust Channel".into(),
            published_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            thumbnail: thumb.map(str::to_string),
        }
    }

    #[test]
    fn payload_carries_item_fields() {
        let p = WebhookPayload::from_item(&item("New video", Some("https://i.ytimg.com/vi/vid1/hq.jpg")));
        let json = serde_json::to_value(&p).unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "New video");
        assert_eq!(embed["url"], "https://www.youtube.com/watch?v=vid1");
        assert_eq!(embed["author"]["name"], "Rust Channel");
        assert_eq!(embed["author"]["url"], "https://www.youtube.com/channel/UC1");
        assert_eq!(embed["image"]["url"], "https://i.ytimg.com/vi/vid1/hq.jpg");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn payload_omits_missing_image_and_truncates_title() {
        let long = "x".repeat(300);
        let p = WebhookPayload::from_item(&item(&long, None));
        assert!(p.embeds[0].image.is_none());
        assert_eq!(p.embeds[0].title.chars().count(), MAX_TITLE_CHARS);
        let json = serde_json::to_value(&p).unwrap();
        assert!(json["embeds"][0].get("image").is_none());
    }

    #[test]
    fn retry_after_seconds_and_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("0.5", now), Some(Duration::from_millis(500)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:03 GMT", now),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("-1", now), None);
        assert_eq!(parse_retry_after("later", now), None);
    }

    #[test]
    fn out_of_range_retry_after_is_ignored() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("1e20", now), None);
        assert_eq!(parse_retry_after("inf", now), None);
        assert_eq!(parse_retry_after("NaN", now), None);
        assert_eq!(secs_to_duration(1e20), None);
        assert_eq!(
            parse_retry_after("86400", now),
            Some(Duration::from_secs(86_400))
        );
    }
}
