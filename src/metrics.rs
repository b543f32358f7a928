use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the relay series.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_relay_metrics();
        Ok(Self { handle })
    }

    /// `/metrics` in Prometheus text format, plus a `/healthz` liveness check.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route("/metrics", get(move || std::future::ready(handle.render())))
            .route("/healthz", get(|| async { "ok" }))
    }

    /// Bind `addr` and serve the router in a background task. Returns the
    /// bound address (useful with port 0).
    pub async fn serve(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        let bound = listener.local_addr().context("metrics listener address")?;
        let router = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::warn!(error = %e, "metrics server stopped");
            }
        });
        tracing::info!(addr = %bound, "serving /metrics and /healthz");
        Ok(bound)
    }
}

fn describe_relay_metrics() {
    describe_counter!("relay_cycles_total", "Polling cycles run.");
    describe_counter!("relay_cycle_errors_total", "Polling cycles that failed.");
    describe_counter!("relay_items_new_total", "Items selected for delivery.");
    describe_counter!(
        "relay_deliveries_total",
        "Final delivery outcomes per endpoint, by outcome."
    );
    describe_counter!("relay_send_attempts_total", "HTTP send attempts, retries included.");
    describe_counter!(
        "relay_rate_limit_waits_total",
        "Sends deferred by the local rate window."
    );
    describe_counter!(
        "relay_quota_rejections_total",
        "429 responses from endpoints."
    );
    describe_counter!("relay_cache_save_errors_total", "Failed state-file writes.");
    describe_gauge!(
        "relay_source_latest_ts",
        "Unix ts of the newest item seen per source."
    );
}
