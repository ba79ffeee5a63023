//! Telemetry initialization and the flush/teardown handle.
//!
//! [`init_telemetry`] wires the pieces together once at startup: the
//! `sentry-trace` propagator becomes the global text-map propagator, the
//! tracer provider gets the envelope exporter behind a [`WorkerSpanProcessor`]
//! and an always-on sampler, and the caller receives a tracer plus a
//! [`TelemetryHandle`] for per-message flushing and flush-on-exit teardown.
//!
//! The sampler is `AlwaysOn` deliberately: every span must be recorded so the
//! send-time sampling override can guarantee transaction delivery, whatever
//! the remote sampling flag said.
//!
//! # Examples
//!
//! ```no_run
//! use sentry_otel_lite::{init_telemetry, TelemetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let (tracer, handle) = init_telemetry(TelemetryConfig::default());
//! // ... create spans with `tracer` ...
//! handle.flush(Duration::from_secs(2)).await;
//! handle.shutdown().await;
//! # }
//! ```

use crate::constants::{defaults, env_vars};
use crate::exporter::SentryEnvelopeExporter;
use crate::processor::WorkerSpanProcessor;
use crate::propagation::SentryTracePropagator;
use bon::Builder;
use opentelemetry::{
    global, global::set_tracer_provider, trace::TracerProvider as _, InstrumentationScope,
    KeyValue,
};
use opentelemetry_sdk::{
    trace::{Sampler, SdkTracerProvider, SpanProcessor, TracerProviderBuilder},
    Resource,
};
use std::borrow::Cow;
use std::{env, sync::Arc, time::Duration};

/// Configuration for telemetry initialization.
///
/// `TelemetryConfig::default()` reads everything from the environment; the
/// builder exists for tests and embedders that need to swap the DSN, the
/// resource, or the whole span processor.
#[derive(Builder, Debug)]
pub struct TelemetryConfig {
    #[builder(field)]
    provider_builder: TracerProviderBuilder,

    #[builder(field)]
    has_processor: bool,

    /// DSN override. When unset, `SENTRY_DSN` is consulted; when that is also
    /// unset, telemetry is a no-op.
    pub dsn: Option<String>,

    /// Custom resource attributes. Defaults to service name and environment
    /// derived from the process environment.
    pub resource: Option<Resource>,

    /// Register the provider as the global OpenTelemetry tracer provider.
    #[builder(default = true)]
    pub set_global_provider: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<S: telemetry_config_builder::State> TelemetryConfigBuilder<S> {
    /// Add a span processor, replacing the default exporter pipeline.
    pub fn with_span_processor<T>(mut self, processor: T) -> Self
    where
        T: SpanProcessor + 'static,
    {
        self.provider_builder = self.provider_builder.with_span_processor(processor);
        self.has_processor = true;
        self
    }
}

/// Clonable handle over the process-wide tracer provider.
///
/// Owns the bounded per-message flush and the flush-on-exit teardown; the
/// provider itself is initialized once at startup and never reconfigured.
#[derive(Clone)]
pub struct TelemetryHandle {
    provider: Arc<SdkTracerProvider>,
    tracer: opentelemetry_sdk::trace::Tracer,
}

impl TelemetryHandle {
    fn new(provider: Arc<SdkTracerProvider>) -> Self {
        let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(Cow::Borrowed(env!("CARGO_PKG_VERSION")))
            .build();
        let tracer = provider.tracer_with_scope(scope);
        Self { provider, tracer }
    }

    /// The tracer for creating spans.
    pub fn tracer(&self) -> &opentelemetry_sdk::trace::Tracer {
        &self.tracer
    }

    /// Force-flush buffered spans, waiting at most `timeout`.
    ///
    /// Returns whether the flush completed in time. Failures and timeouts are
    /// logged and swallowed: delivery is best-effort and must never mask the
    /// caller's own result.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let provider = self.provider.clone();
        let flush = tokio::task::spawn_blocking(move || provider.force_flush());
        match tokio::time::timeout(timeout, flush).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(error))) => {
                tracing::warn!(?error, "telemetry flush failed");
                false
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "telemetry flush task failed");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "telemetry flush timed out");
                false
            }
        }
    }

    /// Flush-on-exit teardown of the provider.
    pub async fn shutdown(&self) {
        let provider = self.provider.clone();
        match tokio::task::spawn_blocking(move || provider.shutdown()).await {
            Ok(Err(error)) => tracing::warn!(?error, "telemetry shutdown failed"),
            Err(error) => tracing::warn!(%error, "telemetry shutdown task failed"),
            Ok(Ok(())) => {}
        }
    }
}

/// Initialize telemetry for the process.
///
/// Installs the global propagator, builds the tracer provider, and returns a
/// tracer plus the [`TelemetryHandle`]. A missing DSN never fails
/// initialization — the exporter simply becomes a no-op.
pub fn init_telemetry(
    mut config: TelemetryConfig,
) -> (opentelemetry_sdk::trace::Tracer, TelemetryHandle) {
    global::set_text_map_propagator(SentryTracePropagator::new());

    if !config.has_processor {
        let exporter = SentryEnvelopeExporter::builder()
            .maybe_dsn(config.dsn.take())
            .build();
        let processor = WorkerSpanProcessor::builder().exporter(exporter).build();
        config.provider_builder = config.provider_builder.with_span_processor(processor);
    }

    let resource = config.resource.unwrap_or_else(default_resource);
    let provider = Arc::new(
        config
            .provider_builder
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource)
            .build(),
    );

    if config.set_global_provider {
        set_tracer_provider(provider.as_ref().clone());
    }

    let handle = TelemetryHandle::new(provider);
    let tracer = handle.tracer().clone();
    (tracer, handle)
}

fn default_resource() -> Resource {
    let service_name =
        env::var(env_vars::SERVICE_NAME).unwrap_or_else(|_| defaults::SERVICE_NAME.to_owned());
    let environment =
        env::var(env_vars::ENVIRONMENT).unwrap_or_else(|_| defaults::ENVIRONMENT.to_owned());
    Resource::builder()
        .with_attributes(vec![
            KeyValue::new("service.name", service_name),
            KeyValue::new("environment", environment),
        ])
        .build()
}
