//! Span buffering between the tracer and the envelope transport.
//!
//! The worker processes one message at a time and force-flushes after each
//! one, so spans are held in a fixed-size ring buffer and exported in batches
//! when [`SpanProcessor::force_flush`] runs. When the buffer is full new spans
//! are dropped and counted rather than reallocating.
//!
//! Unlike a conventional processor, ended spans are buffered regardless of
//! their sampled flag: the delivery guarantee for transactions lives in the
//! send-time sampling override, so nothing may be pre-filtered here.

use crate::constants::{defaults, env_vars};
use bon::bon;
use opentelemetry::Context;
use opentelemetry_sdk::{
    error::{OTelSdkError, OTelSdkResult},
    trace::{Span, SpanData, SpanExporter, SpanProcessor},
    Resource,
};
use std::env;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

/// A fixed-size ring buffer for finished spans.
///
/// `head` is the next write position, `tail` the next read position. When the
/// buffer is full new spans are rejected rather than overwriting old ones.
#[derive(Debug)]
struct SpanRingBuffer {
    buffer: Vec<Option<SpanData>>,
    head: usize,
    tail: usize,
    size: usize,
    capacity: usize,
}

impl SpanRingBuffer {
    fn new(capacity: usize) -> Self {
        let mut buffer = Vec::with_capacity(capacity);
        buffer.extend((0..capacity).map(|_| None));
        Self {
            buffer,
            head: 0,
            tail: 0,
            size: 0,
            capacity,
        }
    }

    fn push(&mut self, span: SpanData) -> bool {
        if self.size == self.capacity {
            return false;
        }

        self.buffer[self.head] = Some(span);
        self.head = (self.head + 1) % self.capacity;
        self.size += 1;
        true
    }

    fn take_batch(&mut self, max_batch_size: usize) -> Vec<SpanData> {
        let batch_size = self.size.min(max_batch_size);
        let mut result = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            if let Some(span) = self.buffer[self.tail].take() {
                result.push(span);
            }
            self.tail = (self.tail + 1) % self.capacity;
            self.size -= 1;
        }

        if self.size == 0 {
            self.head = 0;
            self.tail = 0;
        }

        result
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Buffers ended spans and exports them in batches on flush.
///
/// # Examples
///
/// ```
/// use sentry_otel_lite::{SentryEnvelopeExporter, WorkerSpanProcessor};
///
/// let processor = WorkerSpanProcessor::builder()
///     .exporter(SentryEnvelopeExporter::builder().build())
///     .max_queue_size(1024)
///     .max_batch_size(256)
///     .build();
/// ```
#[derive(Debug)]
pub struct WorkerSpanProcessor<E>
where
    E: SpanExporter + std::fmt::Debug,
{
    exporter: Mutex<E>,
    spans: Mutex<SpanRingBuffer>,
    is_shutdown: AtomicBool,
    dropped_count: AtomicUsize,
    max_batch_size: usize,
}

#[bon]
impl<E> WorkerSpanProcessor<E>
where
    E: SpanExporter + std::fmt::Debug,
{
    fn default_max_batch_size() -> usize {
        env::var(env_vars::SPAN_BATCH_SIZE)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::SPAN_BATCH_SIZE)
    }

    fn default_max_queue_size() -> usize {
        env::var(env_vars::SPAN_QUEUE_SIZE)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::SPAN_QUEUE_SIZE)
    }

    /// Creates a new processor with the given exporter and configuration.
    #[builder]
    pub fn new(exporter: E, max_batch_size: Option<usize>, max_queue_size: Option<usize>) -> Self {
        let max_batch_size = max_batch_size.unwrap_or_else(Self::default_max_batch_size);
        let max_queue_size = max_queue_size.unwrap_or_else(Self::default_max_queue_size);

        Self {
            exporter: Mutex::new(exporter),
            spans: Mutex::new(SpanRingBuffer::new(max_queue_size)),
            is_shutdown: AtomicBool::new(false),
            dropped_count: AtomicUsize::new(0),
            max_batch_size,
        }
    }
}

impl<E> SpanProcessor for WorkerSpanProcessor<E>
where
    E: SpanExporter + std::fmt::Debug,
{
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // No-op, spans are only processed on end.
    }

    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("processor is shut down, dropping span");
            return;
        }

        // Buffered regardless of the sampled flag; the sampling override at
        // send time owns the delivery decision.
        if let Ok(mut spans) = self.spans.lock() {
            if !spans.push(span) {
                let previous = self.dropped_count.fetch_add(1, Ordering::Relaxed);
                if previous == 0 || previous % 100 == 0 {
                    tracing::warn!(
                        dropped_spans = previous + 1,
                        "span buffer is full, dropping span"
                    );
                }
            }
        } else {
            tracing::warn!("failed to acquire span buffer lock in on_end");
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        if let Ok(mut spans) = self.spans.lock() {
            if spans.is_empty() {
                return Ok(());
            }

            let mut exporter = self.exporter.lock().map_err(|_| {
                OTelSdkError::InternalFailure(
                    "failed to acquire exporter lock in force_flush".to_string(),
                )
            })?;

            while !spans.is_empty() {
                let batch = spans.take_batch(self.max_batch_size);
                if !batch.is_empty() {
                    let result = futures_executor::block_on(exporter.export(batch));
                    if let Err(error) = &result {
                        tracing::debug!(?error, "span export failed during flush");
                        return result;
                    }
                }
            }
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(
                "failed to acquire span buffer lock in force_flush".to_string(),
            ))
        }
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.is_shutdown.store(true, Ordering::Relaxed);
        self.force_flush()?;
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.shutdown()
        } else {
            Err(OTelSdkError::InternalFailure(
                "failed to acquire exporter lock in shutdown".to_string(),
            ))
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.set_resource(resource);
        }
    }
}
