// src/notify/dispatcher.rs
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use super::error::DeliveryError;
use super::queue::{DeliveryResult, EndpointQueue, QueueSettings, Shutdown};
use super::{Endpoint, WebhookPayload, WebhookSender};
use crate::feed::types::Item;

/// Result of one item on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub item_id: String,
    pub endpoint: usize,
    pub endpoint_label: String,
    pub result: DeliveryResult,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        self.result.as_ref().err()
    }
}

/// Fans each item out to every endpoint queue and gathers the outcomes.
pub struct Dispatcher {
    queues: Vec<EndpointQueue>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Shutdown,
}

impl Dispatcher {
    /// Spawn one worker per endpoint, all watching the same `shutdown` tokens.
    pub fn new(
        endpoints: Vec<Endpoint>,
        sender: Arc<dyn WebhookSender>,
        settings: QueueSettings,
        shutdown: Shutdown,
    ) -> Self {
        let mut queues = Vec::with_capacity(endpoints.len());
        let mut workers = Vec::with_capacity(endpoints.len());
        for (index, endpoint) in endpoints.into_iter().enumerate() {
            let (q, h) =
                EndpointQueue::spawn(index, endpoint, sender.clone(), settings, shutdown.clone());
            queues.push(q);
            workers.push(h);
        }
        Self {
            queues,
            workers,
            shutdown,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.queues.len()
    }

    /// Deliver one item to all endpoints concurrently. Never short-circuits:
    /// one outcome per endpoint, in endpoint order.
    pub async fn deliver_to_all(&self, item: &Item) -> Vec<DispatchOutcome> {
        let payload = Arc::new(WebhookPayload::from_item(item));
        let sends = self.queues.iter().map(|q| {
            let payload = payload.clone();
            let span = info_span!("deliver", item = %item.id, endpoint = q.index());
            async move {
                let result = q.enqueue(payload).await;
                DispatchOutcome {
                    item_id: item.id.clone(),
                    endpoint: q.index(),
                    endpoint_label: q.label().to_string(),
                    result,
                }
            }
            .instrument(span)
        });
        let outcomes = join_all(sends).await;
        outcomes.iter().for_each(log_outcome);
        outcomes
    }

    /// Items go out one at a time in input order; each fan-out settles
    /// before the next item starts. Once `stop` fires, items not yet started
    /// resolve as cancelled without being enqueued.
    pub async fn deliver_batch(&self, items: &[Item]) -> Vec<DispatchOutcome> {
        let mut all = Vec::with_capacity(items.len() * self.queues.len());
        for (n, item) in items.iter().enumerate() {
            if self.shutdown.stop.is_cancelled() {
                warn!(skipped = items.len() - n, "shutdown requested, not starting remaining items");
                let start = all.len();
                for rest in &items[n..] {
                    let skipped = self.queues.iter().map(|q| DispatchOutcome {
                        item_id: rest.id.clone(),
                        endpoint: q.index(),
                        endpoint_label: q.label().to_string(),
                        result: Err(DeliveryError::Cancelled),
                    });
                    all.extend(skipped);
                }
                all[start..].iter().for_each(log_outcome);
                break;
            }
            all.extend(self.deliver_to_all(item).await);
        }
        all
    }

    /// Stop in-flight sends, close the queues, and give already-enqueued jobs
    /// up to `grace` for a single attempt each; then abort the rest.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            queues,
            workers,
            shutdown,
        } = self;
        shutdown.stop.cancel();
        drop(queues);

        let all = join_all(workers);
        tokio::pin!(all);
        if tokio::time::timeout(grace, &mut all).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "delivery queues still busy after grace period, aborting"
            );
            shutdown.abort.cancel();
            all.await;
        }
        info!("delivery queues stopped");
    }
}

fn log_outcome(o: &DispatchOutcome) {
    match &o.result {
        Ok(d) => {
            counter!("relay_deliveries_total", "outcome" => "success").increment(1);
            info!(
                item = %o.item_id,
                endpoint = o.endpoint,
                dest = %o.endpoint_label,
                attempts = d.attempts,
                "delivered"
            );
        }
        Err(e) => {
            counter!("relay_deliveries_total", "outcome" => "failure").increment(1);
            warn!(
                item = %o.item_id,
                endpoint = o.endpoint,
                dest = %o.endpoint_label,
                error = %e,
                "delivery failed"
            );
        }
    }
}
