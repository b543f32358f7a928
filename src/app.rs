//! Top-level orchestration: owns every component, runs the polling loop, and
//! drives the shutdown sequence (stop scheduling, drain queues, final save).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::cycle::{CycleProcessor, CycleReport};
use crate::dedup::store::{CacheStore, SaveOutcome};
use crate::feed::atom::AtomFeedProvider;
use crate::feed::filter::KeywordFilter;
use crate::feed::types::FeedProvider;
use crate::notify::{DiscordSender, Dispatcher, QueueSettings, Shutdown};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct RelayApp {
    providers: Vec<Box<dyn FeedProvider>>,
    filter: KeywordFilter,
    processor: CycleProcessor,
    dispatcher: Dispatcher,
    shutdown: Shutdown,
    poll_interval: Duration,
    grace: Duration,
}

impl RelayApp {
    /// `shutdown` must be the tokens the dispatcher was built with.
    pub fn new(
        providers: Vec<Box<dyn FeedProvider>>,
        filter: KeywordFilter,
        processor: CycleProcessor,
        dispatcher: Dispatcher,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            providers,
            filter,
            processor,
            dispatcher,
            shutdown,
            poll_interval: Duration::from_secs(300),
            grace: Duration::from_secs(5),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, grace: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.grace = grace;
        self
    }

    /// Wire up HTTP feeds, Discord delivery and the state file from config.
    /// Must be called inside a tokio runtime (spawns endpoint workers).
    pub fn from_config(cfg: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building http client")?;

        let providers: Vec<Box<dyn FeedProvider>> = cfg
            .sources
            .iter()
            .map(|s| {
                Box::new(AtomFeedProvider::from_source(s.clone(), client.clone()))
                    as Box<dyn FeedProvider>
            })
            .collect();
        let filter = KeywordFilter::new(&cfg.keywords)?;
        let processor = CycleProcessor::new(cfg.run_mode, CacheStore::new(cfg.cache_path.clone()));

        let shutdown = Shutdown::new();
        let dispatcher = Dispatcher::new(
            cfg.endpoints.clone(),
            Arc::new(DiscordSender::new(client)),
            QueueSettings::default(),
            shutdown.clone(),
        );

        info!(
            endpoints = dispatcher.endpoint_count(),
            sources = providers.len(),
            keywords = cfg.keywords.len(),
            mode = %cfg.run_mode,
            bootstrap = processor.cache().is_bootstrap(),
            "relay configured"
        );

        Ok(Self::new(providers, filter, processor, dispatcher, shutdown)
            .with_timing(cfg.poll_interval, cfg.shutdown_grace))
    }

    pub fn processor(&self) -> &CycleProcessor {
        &self.processor
    }

    /// One pass: collect candidates from every feed and process them.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        let items = crate::feed::collect(&self.providers, &self.filter).await;
        self.processor.run(items, &self.dispatcher).await
    }

    /// Poll until `stop` fires, then shut down. In-flight sends end at once
    /// without retries; jobs still queued get the grace period, then anything
    /// left is aborted. Returns the outcome of the final cache save.
    pub async fn run(mut self, stop: CancellationToken) -> Option<SaveOutcome> {
        let watchdog = {
            let stop = stop.clone();
            let shutdown = self.shutdown.clone();
            let grace = self.grace;
            tokio::spawn(async move {
                stop.cancelled().await;
                shutdown.stop.cancel();
                tokio::time::sleep(grace).await;
                shutdown.abort.cancel();
            })
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once().await {
                Ok(report) if report.delivered_items > 0 || report.failed_outcomes > 0 => info!(
                    candidates = report.candidates,
                    delivered = report.delivered_items,
                    failed = report.failed_outcomes,
                    "cycle finished"
                ),
                Ok(report) => debug!(candidates = report.candidates, "cycle finished"),
                Err(e) => {
                    counter!("relay_cycle_errors_total").increment(1);
                    warn!(error = ?e, "cycle failed, next cycle proceeds as scheduled");
                }
            }
        }

        info!("shutdown requested, draining delivery queues");
        self.dispatcher.shutdown(self.grace).await;
        watchdog.abort();
        let saved = self.processor.flush();
        info!(?saved, "final cache save");
        saved
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
