//! feed-relay binary entrypoint.
//! Loads configuration, wires the relay, and runs the polling loop until
//! ctrl-c / SIGTERM.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_relay::config::LogFormat;
use feed_relay::metrics::Metrics;
use feed_relay::{shutdown_signal, RelayApp, RelayConfig};

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();

    // Configuration errors are the only fatal ones.
    let cfg = RelayConfig::from_env()?;
    init_tracing(cfg.log_format);

    if let Some(addr) = cfg.metrics_addr {
        let metrics = Metrics::init()?;
        metrics.serve(addr).await?;
    }

    let app = RelayApp::from_config(&cfg)?;

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            stop.cancel();
        });
    }

    app.run(stop).await;
    tracing::info!("relay stopped");
    Ok(())
}
