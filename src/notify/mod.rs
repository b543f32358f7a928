//! Delivery core: per-endpoint rate-limited queues and the fan-out dispatcher.

pub mod discord;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod rate_limit;

use async_trait::async_trait;

pub use discord::{DiscordSender, WebhookPayload};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DeliveryError, SendError};
pub use queue::{Delivered, EndpointQueue, QueueSettings, RetryPolicy, Shutdown, MAX_RETRY_HINT};
pub use rate_limit::RateLimiter;

/// One outbound webhook destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Loggable form: webhook URLs end in a secret token, so the last path
    /// segment is masked.
    pub fn redacted(&self) -> String {
        let Ok(url) = reqwest::Url::parse(&self.url) else {
            return "<invalid url>".to_string();
        };
        let host = url.host_str().unwrap_or_default();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        match segments.split_last() {
            None => host.to_string(),
            Some((_, rest)) => {
                let mut out = String::from(host);
                for seg in rest {
                    out.push('/');
                    out.push_str(seg);
                }
                out.push_str("/***");
                out
            }
        }
    }
}

/// Transport seam for a single send attempt.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_masks_token_segment() {
        let e = Endpoint::new("https://discord.com/api/webhooks/123/s3cr3t-token");
        assert_eq!(e.redacted(), "discord.com/api/webhooks/123/***");
        assert!(!e.redacted().contains("s3cr3t"));
        assert_eq!(Endpoint::new("http://localhost:9000").redacted(), "localhost");
        assert_eq!(Endpoint::new("nonsense").redacted(), "<invalid url>");
    }
}
