//! Per-endpoint delivery queue.
//!
//! Each endpoint gets one worker task that owns its rate limiter and drains a
//! FIFO channel. Callers get the final result back on a oneshot, so sends for
//! one endpoint never overlap and never reorder.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use super::error::{DeliveryError, SendError};
use super::rate_limit::{RateLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};
use super::{Endpoint, WebhookPayload, WebhookSender};

/// Upper bound on a server-provided retry delay.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_hint: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_hint: MAX_RETRY_HINT,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (1-based): base, 2x, 4x, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    /// Server-provided delay wins for quota rejections, capped at `max_hint`.
    pub fn delay_for(&self, retry: u32, err: &SendError) -> Duration {
        match err {
            SendError::Quota {
                retry_after: Some(d),
            } => (*d).min(self.max_hint),
            _ => self.backoff(retry),
        }
    }
}

/// Shutdown signals shared by every endpoint worker.
///
/// `stop` ends in-flight sends and suppresses further retries; jobs still
/// queued when it fires get a single attempt each. `abort` resolves whatever
/// is left as `Cancelled` without touching the network.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    pub stop: CancellationToken,
    pub abort: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    pub max_requests: usize,
    pub window: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub attempts: u32,
}

pub type DeliveryResult = Result<Delivered, DeliveryError>;

struct Job {
    payload: Arc<WebhookPayload>,
    reply: oneshot::Sender<DeliveryResult>,
    span: tracing::Span,
}

/// Cloneable handle to one endpoint's worker.
#[derive(Clone)]
pub struct EndpointQueue {
    index: usize,
    label: String,
    tx: mpsc::Sender<Job>,
}

impl EndpointQueue {
    /// Start the worker. It exits once every handle is dropped and the FIFO
    /// is drained.
    pub fn spawn(
        index: usize,
        endpoint: Endpoint,
        sender: Arc<dyn WebhookSender>,
        settings: QueueSettings,
        shutdown: Shutdown,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let label = endpoint.redacted();
        let worker = Worker {
            index,
            endpoint,
            sender,
            limiter: RateLimiter::new(settings.max_requests, settings.window),
            retry: settings.retry,
            shutdown,
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { index, label, tx }, handle)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue `payload` behind everything already enqueued and wait for its
    /// final result (after rate limiting and retries).
    pub async fn enqueue(&self, payload: Arc<WebhookPayload>) -> DeliveryResult {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            payload,
            reply,
            span: tracing::Span::current(),
        };
        self.tx
            .send(job)
            .await
            .map_err(|_| DeliveryError::QueueClosed)?;
        rx.await.map_err(|_| DeliveryError::QueueClosed)?
    }
}

struct Worker {
    index: usize,
    endpoint: Endpoint,
    sender: Arc<dyn WebhookSender>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    shutdown: Shutdown,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            let span = job.span.clone();
            let res = self.deliver(&job.payload).instrument(span).await;
            if job.reply.send(res).is_err() {
                debug!(endpoint = self.index, "caller went away before delivery finished");
            }
        }
        debug!(endpoint = self.index, "queue closed, worker exiting");
    }

    async fn deliver(&mut self, payload: &WebhookPayload) -> DeliveryResult {
        let stop = self.shutdown.stop.clone();
        let abort = self.shutdown.abort.clone();
        // A job picked up after `stop` is draining: one attempt, no retries.
        let draining = stop.is_cancelled();

        let mut attempt: u32 = 0;
        loop {
            self.wait_for_slot(draining).await?;
            if abort.is_cancelled() || (!draining && stop.is_cancelled()) {
                return Err(DeliveryError::Cancelled);
            }

            attempt += 1;
            counter!("relay_send_attempts_total").increment(1);
            let res = tokio::select! {
                biased;
                _ = abort.cancelled() => Err(SendError::Cancelled),
                _ = stop.cancelled(), if !draining => Err(SendError::Cancelled),
                r = self.sender.send(self.endpoint.url(), payload) => r,
            };
            self.limiter.record();

            let err = match res {
                Ok(()) => return Ok(Delivered { attempts: attempt }),
                Err(SendError::Cancelled) => return Err(DeliveryError::Cancelled),
                Err(e) => e,
            };
            if matches!(err, SendError::Quota { .. }) {
                counter!("relay_quota_rejections_total").increment(1);
            }
            if attempt > self.retry.max_retries || draining {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.retry.delay_for(attempt, &err);
            warn!(
                endpoint = self.index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "send failed, will retry"
            );
            tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(DeliveryError::Cancelled),
                _ = stop.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Sleep until the rate window has room. Outside a drain, `stop` also
    /// ends the wait.
    async fn wait_for_slot(&mut self, draining: bool) -> Result<(), DeliveryError> {
        let stop = self.shutdown.stop.clone();
        loop {
            let wait = self.limiter.admit();
            if wait.is_zero() {
                return Ok(());
            }
            counter!("relay_rate_limit_waits_total").increment(1);
            debug!(
                endpoint = self.index,
                wait_ms = wait.as_millis() as u64,
                "rate window full, deferring send"
            );
            tokio::select! {
                biased;
                _ = self.shutdown.abort.cancelled() => return Err(DeliveryError::Cancelled),
                _ = stop.cancelled(), if !draining => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn quota_delay_prefers_server_hint() {
        let p = RetryPolicy::default();
        let hinted = SendError::Quota {
            retry_after: Some(Duration::from_millis(250)),
        };
        let bare = SendError::Quota { retry_after: None };
        let transport = SendError::Transport("boom".into());
        assert_eq!(p.delay_for(2, &hinted), Duration::from_millis(250));
        assert_eq!(p.delay_for(2, &bare), Duration::from_secs(2));
        assert_eq!(p.delay_for(3, &transport), Duration::from_secs(4));
    }

    #[test]
    fn quota_hint_is_capped() {
        let p = RetryPolicy::default();
        let day = SendError::Quota {
            retry_after: Some(Duration::from_secs(86_400)),
        };
        assert_eq!(p.delay_for(1, &day), MAX_RETRY_HINT);
        let tight = RetryPolicy {
            max_hint: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(tight.delay_for(1, &day), Duration::from_secs(5));
    }
}
