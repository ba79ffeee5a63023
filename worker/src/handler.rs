//! Per-message processing with continued-trace span lifecycle.
//!
//! [`run_with_trace`] is the span lifecycle manager: given the parsed trace
//! context of a message, it opens a root `queue.process` span continuing the
//! remote trace, runs the unit of work inside that span's scope, and
//! guarantees the span is closed — with tags and a final status — on every
//! exit path before control returns. A message without a usable trace context
//! still gets processed; the result just carries an explicit
//! `no_trace_context` warning.
//!
//! The built-in unit of work simulates GPU inference: a processing delay plus
//! a nested `gpu.inference` child span.

use crate::config::WorkerConfig;
use crate::poller::Message;
use anyhow::Result;
use opentelemetry::trace::{Span as _, SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use sentry_otel_lite::{SentryBaggage, TelemetryHandle, TraceContext, DESCRIPTION_ATTRIBUTE};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Constant identifier stamped on every result and root span.
pub const WORKER_ID: &str = "gpu-worker";

/// Warning marker for messages processed without trace continuation.
pub const NO_TRACE_CONTEXT: &str = "no_trace_context";

const ROOT_SPAN_NAME: &str = "queue.process";
const INFERENCE_SPAN_NAME: &str = "gpu.inference";
const INFERENCE_MODEL: &str = "athena-turbo";

const SIMULATED_WORK_DELAY: Duration = Duration::from_millis(500);
const INFERENCE_DELAY: Duration = Duration::from_millis(300);

/// Identifiers of the root span a message was processed under.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SpanInfo {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

/// Outcome of one processed message, in the queue's camelCase convention.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResult {
    pub success: bool,
    pub processed_by: &'static str,
    pub processed_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

impl WorkResult {
    fn traced(span: SpanInfo) -> Self {
        Self {
            success: true,
            processed_by: WORKER_ID,
            processed_at: unix_now(),
            span: Some(span),
            warning: None,
        }
    }

    fn untraced() -> Self {
        Self {
            success: true,
            processed_by: WORKER_ID,
            processed_at: unix_now(),
            span: None,
            warning: Some(NO_TRACE_CONTEXT),
        }
    }
}

/// Process one message: parse its trace context, run the simulated GPU work
/// under the span lifecycle, then force delivery of the finished spans with a
/// bounded wait. Flush failures never mask the work result.
pub async fn process_message(
    tracer: &Tracer,
    handle: &TelemetryHandle,
    config: &WorkerConfig,
    message: &Message,
) -> Result<WorkResult> {
    tracing::info!(
        message_id = %message.id,
        has_trace = message.sentry_trace.is_some(),
        has_baggage = message.baggage.is_some(),
        "processing message"
    );

    let context =
        TraceContext::parse(message.sentry_trace.as_deref(), message.baggage.as_deref());
    if let Some(context) = &context {
        tracing::debug!(
            trace_id = %context.trace_id,
            parent_span_id = ?context.parent_span_id,
            sampled = context.sampled,
            "parsed trace header"
        );
    }
    let task_type = message
        .task_type
        .clone()
        .unwrap_or_else(|| "unknown".to_owned());

    let work_tracer = tracer.clone();
    let result = run_with_trace(tracer, context, &task_type, move |cx| {
        simulate_inference(work_tracer, cx)
    })
    .await;

    let flushed = handle.flush(config.flush_timeout).await;
    tracing::debug!(flushed, "telemetry flush attempted");

    result
}

/// Run `work` under a root span continuing `context`.
///
/// With a usable context, the root span reuses the remote trace id and parents
/// itself on the remote span id; the span is closed with its final status on
/// every exit path — normal return or fault — before this function returns.
/// Without one, `work` still runs and the result is marked [`NO_TRACE_CONTEXT`].
///
/// On a fault the span records an `exception` event, is closed with status
/// `error`, and the fault propagates to the caller.
pub async fn run_with_trace<F, Fut>(
    tracer: &Tracer,
    context: Option<TraceContext>,
    task_type: &str,
    work: F,
) -> Result<WorkResult>
where
    F: FnOnce(Option<Context>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let remote = context.as_ref().and_then(TraceContext::span_context);
    let Some(remote) = remote else {
        if context.is_some() {
            tracing::warn!("trace header present but unusable, processing untraced");
        } else {
            tracing::warn!("no trace context in message, processing untraced");
        }
        work(None).await?;
        return Ok(WorkResult::untraced());
    };

    let mut parent_cx = Context::new().with_remote_span_context(remote);
    if let Some(baggage) = context.as_ref().and_then(|c| c.baggage.clone()) {
        parent_cx = parent_cx.with_value(SentryBaggage(baggage));
    }

    let span = tracer
        .span_builder(ROOT_SPAN_NAME)
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &parent_cx);
    let cx = parent_cx.with_span(span);

    // If `work` unwinds, dropping `cx` still ends the root span.
    let outcome = work(Some(cx.clone())).await;

    let span = cx.span();
    span.set_attribute(KeyValue::new("task.type", task_type.to_owned()));
    span.set_attribute(KeyValue::new("processed.by", WORKER_ID));

    let span_info = {
        let span_context = span.span_context();
        SpanInfo {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            parent_span_id: context.as_ref().and_then(|c| c.parent_span_id.clone()),
        }
    };

    match outcome {
        Ok(()) => {
            span.set_status(Status::Ok);
            span.end();
            Ok(WorkResult::traced(span_info))
        }
        Err(error) => {
            span.add_event(
                "exception",
                vec![KeyValue::new("exception.message", error.to_string())],
            );
            span.set_status(Status::error(error.to_string()));
            span.end();
            Err(error)
        }
    }
}

/// The simulated unit of GPU work: a processing delay, then an inference pass
/// under a nested child span when a trace scope is available.
async fn simulate_inference(tracer: Tracer, cx: Option<Context>) -> Result<()> {
    tokio::time::sleep(SIMULATED_WORK_DELAY).await;
    match cx {
        Some(cx) => {
            let mut span = tracer
                .span_builder(INFERENCE_SPAN_NAME)
                .with_attributes(vec![KeyValue::new(DESCRIPTION_ATTRIBUTE, INFERENCE_MODEL)])
                .start_with_context(&tracer, &cx);
            tracing::debug!(model = INFERENCE_MODEL, "running gpu inference");
            tokio::time::sleep(INFERENCE_DELAY).await;
            span.end();
        }
        None => tokio::time::sleep(INFERENCE_DELAY).await,
    }
    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceId};
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::{SpanData, SpanExporter};
    use sentry_otel_lite::{init_telemetry, TelemetryConfig, WorkerSpanProcessor};
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const PARENT_ID: &str = "00f067aa0ba902b7";

    #[derive(Debug)]
    struct CapturingExporter {
        spans: Arc<Mutex<Vec<SpanData>>>,
    }

    impl SpanExporter for CapturingExporter {
        fn export(
            &self,
            batch: Vec<SpanData>,
        ) -> Pin<Box<dyn Future<Output = OTelSdkResult> + Send>> {
            self.spans.lock().unwrap().extend(batch);
            Box::pin(std::future::ready(Ok(())))
        }

        fn shutdown(&mut self) -> OTelSdkResult {
            Ok(())
        }
    }

    fn test_telemetry() -> (Tracer, TelemetryHandle, Arc<Mutex<Vec<SpanData>>>) {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let exporter = CapturingExporter {
            spans: spans.clone(),
        };
        let processor = WorkerSpanProcessor::builder().exporter(exporter).build();
        let (tracer, handle) = init_telemetry(
            TelemetryConfig::builder()
                .with_span_processor(processor)
                .set_global_provider(false)
                .build(),
        );
        (tracer, handle, spans)
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            queue_api_url: "http://localhost:3002".to_owned(),
            queue_name: "gpu-worker-queue".to_owned(),
            max_messages: 1,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(2),
        }
    }

    fn message(sentry_trace: Option<&str>) -> Message {
        Message {
            id: "m1".to_owned(),
            task_type: Some("infer".to_owned()),
            sentry_trace: sentry_trace.map(str::to_owned),
            baggage: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_continues_remote_trace() {
        let (tracer, handle, spans) = test_telemetry();
        let header = format!("{TRACE_ID}-{PARENT_ID}-1");

        let result = process_message(&tracer, &handle, &test_config(), &message(Some(&header)))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.processed_by, WORKER_ID);
        assert_eq!(result.warning, None);
        let span_info = result.span.unwrap();
        assert_eq!(span_info.trace_id, TRACE_ID);
        assert_eq!(span_info.parent_span_id.as_deref(), Some(PARENT_ID));

        let exported = spans.lock().unwrap();
        assert_eq!(exported.len(), 2);

        let root = exported
            .iter()
            .find(|s| s.name == ROOT_SPAN_NAME)
            .expect("root span exported");
        let child = exported
            .iter()
            .find(|s| s.name == INFERENCE_SPAN_NAME)
            .expect("child span exported");

        // Every span of the trace shares the remote trace id; the root is
        // parented on the remote span id.
        let remote_trace = TraceId::from_hex(TRACE_ID).unwrap();
        assert_eq!(root.span_context.trace_id(), remote_trace);
        assert_eq!(child.span_context.trace_id(), remote_trace);
        assert_eq!(root.parent_span_id, SpanId::from_hex(PARENT_ID).unwrap());
        assert_eq!(child.parent_span_id, root.span_context.span_id());

        assert_eq!(root.status, Status::Ok);
        assert!(root
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "task.type"
                && kv.value == opentelemetry::Value::from("infer")));
        assert!(root
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "processed.by"
                && kv.value == opentelemetry::Value::from(WORKER_ID)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_without_trace_degrades() {
        let (tracer, handle, spans) = test_telemetry();

        let result = process_message(&tracer, &handle, &test_config(), &message(None))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.warning, Some(NO_TRACE_CONTEXT));
        assert_eq!(result.span, None);
        assert!(spans.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_with_malformed_trace_degrades() {
        let (tracer, handle, spans) = test_telemetry();

        let result = process_message(
            &tracer,
            &handle,
            &test_config(),
            &message(Some("not-hex!-1")),
        )
        .await
        .unwrap();

        assert!(result.success);
        assert_eq!(result.warning, Some(NO_TRACE_CONTEXT));
        assert!(spans.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fault_sets_error_status_and_propagates() {
        let (tracer, handle, spans) = test_telemetry();
        let header = format!("{TRACE_ID}-{PARENT_ID}-1");
        let context = TraceContext::parse(Some(&header), None);

        let outcome = run_with_trace(&tracer, context, "infer", |_cx| async {
            anyhow::bail!("gpu meltdown")
        })
        .await;
        assert!(outcome.is_err());

        assert!(handle.flush(Duration::from_secs(2)).await);
        let exported = spans.lock().unwrap();
        let root = exported
            .iter()
            .find(|s| s.name == ROOT_SPAN_NAME)
            .expect("root span exported despite fault");
        assert!(matches!(root.status, Status::Error { .. }));
        assert!(root.events.events.iter().any(|e| e.name == "exception"));
        assert!(root
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "processed.by"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fault_without_trace_context_propagates() {
        let (tracer, _handle, spans) = test_telemetry();

        let outcome = run_with_trace(&tracer, None, "infer", |_cx| async {
            anyhow::bail!("gpu meltdown")
        })
        .await;
        assert!(outcome.is_err());
        assert!(spans.lock().unwrap().is_empty());
    }

    #[test]
    fn test_work_result_serialization_shape() {
        let result = WorkResult::traced(SpanInfo {
            trace_id: TRACE_ID.to_owned(),
            span_id: "0100000000000001".to_owned(),
            parent_span_id: Some(PARENT_ID.to_owned()),
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["processedBy"], serde_json::json!(WORKER_ID));
        assert!(value["processedAt"].is_f64());
        assert_eq!(value["span"]["trace_id"], serde_json::json!(TRACE_ID));
        assert!(value.get("warning").is_none());

        let untraced = serde_json::to_value(WorkResult::untraced()).unwrap();
        assert_eq!(untraced["warning"], serde_json::json!(NO_TRACE_CONTEXT));
        assert!(untraced.get("span").is_none());
    }
}
