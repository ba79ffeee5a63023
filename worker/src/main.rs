//! Queue worker that continues upstream traces while processing GPU tasks.
//!
//! Bootstrap order matters: logging first, then the process-wide telemetry
//! client, then the loop. The telemetry handle is passed into the loop
//! explicitly; nothing reaches for ambient global state after init. A missing
//! DSN downgrades telemetry to a no-op instead of crashing the worker.

use anyhow::Context as _;
use sentry_otel_lite::{constants::env_vars, init_telemetry, TelemetryConfig};
use tracing_subscriber::EnvFilter;

mod config;
mod handler;
mod poller;
mod worker;

use config::WorkerConfig;
use poller::QueuePoller;
use worker::WorkerLoop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dsn_loaded = std::env::var(env_vars::DSN)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    tracing::info!(dsn_loaded, "starting worker");

    let config = WorkerConfig::from_env();
    let (tracer, handle) = init_telemetry(TelemetryConfig::default());

    let poller = QueuePoller::new(&config).context("failed to build queue client")?;
    let worker = WorkerLoop::new(poller, tracer, handle.clone(), config);
    worker.run().await?;

    // In-flight spans get one last chance at delivery before exit.
    handle.shutdown().await;
    Ok(())
}
