//! Lightweight Sentry-compatible tracing built on the OpenTelemetry SDK.
//!
//! This crate provides the telemetry plumbing for queue workers that continue
//! distributed traces from an upstream caller: a codec for the `sentry-trace`
//! continuation header, a span processor tuned for flush-after-every-message
//! workloads, an envelope exporter for the ingest wire format, and a sampling
//! override that guarantees every transaction is delivered regardless of the
//! probabilistic sampling decision it arrived with.
//!
//! # Architecture
//!
//! - [`propagation`]: `sentry-trace` / `baggage` parsing and propagation
//! - [`filter`]: the pre-send sampling override
//! - [`processor`]: ring-buffered span processing
//! - [`exporter`]: envelope construction and HTTP transport
//! - [`telemetry`]: initialization and the flush/teardown handle
//!
//! # Quick Start
//!
//! ```no_run
//! use sentry_otel_lite::{init_telemetry, TelemetryConfig};
//! use opentelemetry::trace::{Span, Tracer};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let (tracer, handle) = init_telemetry(TelemetryConfig::default());
//!
//! let mut span = tracer.start("queue.process");
//! // ... do the work ...
//! span.end();
//!
//! // Bounded, best-effort delivery before the next unit of work.
//! handle.flush(Duration::from_secs(2)).await;
//! # }
//! ```
//!
//! # Configuration
//!
//! Everything is environment-driven: `SENTRY_DSN` (absent means telemetry is
//! a no-op), `SENTRY_ENVIRONMENT`, `OTEL_SERVICE_NAME`, and the buffer knobs
//! `WORKER_SPAN_QUEUE_SIZE` / `WORKER_SPAN_BATCH_SIZE`. See [`constants`].

pub mod constants;
mod envelope;
pub mod exporter;
pub mod filter;
pub mod processor;
pub mod propagation;
pub mod telemetry;

pub use envelope::DESCRIPTION_ATTRIBUTE;
pub use exporter::{Dsn, DsnError, SentryEnvelopeExporter};
pub use filter::{default_before_send, force_transaction_sampling, BeforeSend};
pub use processor::WorkerSpanProcessor;
pub use propagation::{SentryBaggage, SentryTracePropagator, TraceContext};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryHandle};
