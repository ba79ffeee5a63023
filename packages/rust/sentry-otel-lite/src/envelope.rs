//! Conversion of finished spans into Sentry transaction events and envelopes.
//!
//! A batch handed to the exporter contains whole traces: one root span per
//! processed message plus its children. Each trace becomes a single
//! transaction event; the envelope wire format is newline-delimited JSON — an
//! envelope header, then an item header and payload per event.

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::{SpanId, Status, TraceId};
use opentelemetry::Value as OtelValue;
use opentelemetry_sdk::trace::SpanData;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Attribute key used to carry a span's human-readable description.
pub const DESCRIPTION_ATTRIBUTE: &str = "description";

/// Build one transaction event per trace in the batch.
///
/// The root of a trace is the first span whose parent is not in the batch;
/// every other span of the trace lands in the event's `spans` array. The
/// event's `sampled` flag is seeded from the root's trace flags — the
/// sampling override at send time is what guarantees it ends up `true`.
pub(crate) fn build_transaction_events(batch: &[SpanData], environment: &str) -> Vec<Value> {
    let mut groups: Vec<(TraceId, Vec<&SpanData>)> = Vec::new();
    for span in batch {
        let trace_id = span.span_context.trace_id();
        match groups.iter_mut().find(|(id, _)| *id == trace_id) {
            Some((_, spans)) => spans.push(span),
            None => groups.push((trace_id, vec![span])),
        }
    }

    groups
        .into_iter()
        .map(|(_, spans)| transaction_event(&spans, environment))
        .collect()
}

fn transaction_event(trace_spans: &[&SpanData], environment: &str) -> Value {
    let span_ids: HashSet<SpanId> = trace_spans
        .iter()
        .map(|s| s.span_context.span_id())
        .collect();
    let root = trace_spans
        .iter()
        .find(|s| {
            s.parent_span_id == SpanId::INVALID || !span_ids.contains(&s.parent_span_id)
        })
        .unwrap_or(&trace_spans[0]);
    let root_span_id = root.span_context.span_id();

    let children: Vec<Value> = trace_spans
        .iter()
        .filter(|s| s.span_context.span_id() != root_span_id)
        .map(|s| child_span(s))
        .collect();

    let mut tags = Map::new();
    for attribute in &root.attributes {
        tags.insert(
            attribute.key.to_string(),
            Value::String(attribute_string(&attribute.value)),
        );
    }

    let mut trace = Map::new();
    trace.insert(
        "trace_id".to_owned(),
        json!(root.span_context.trace_id().to_string()),
    );
    trace.insert("span_id".to_owned(), json!(root_span_id.to_string()));
    if root.parent_span_id != SpanId::INVALID {
        trace.insert(
            "parent_span_id".to_owned(),
            json!(root.parent_span_id.to_string()),
        );
    }
    trace.insert("op".to_owned(), json!(root.name));
    if let Some(status) = status_string(&root.status) {
        trace.insert("status".to_owned(), json!(status));
    }

    let mut event = json!({
        "type": "transaction",
        "event_id": Uuid::new_v4().simple().to_string(),
        "platform": "rust",
        "environment": environment,
        "transaction": root.name,
        "start_timestamp": unix_timestamp(root.start_time),
        "timestamp": unix_timestamp(root.end_time),
        "sampled": root.span_context.is_sampled(),
        "tags": tags,
        "contexts": {"trace": trace},
        "spans": children,
    });

    // Span events (e.g. recorded exceptions) ride along as breadcrumbs.
    let breadcrumbs: Vec<Value> = root
        .events
        .events
        .iter()
        .map(|e| {
            json!({
                "timestamp": unix_timestamp(e.timestamp),
                "category": e.name,
                "message": e
                    .attributes
                    .iter()
                    .find(|kv| kv.key.as_str() == "exception.message")
                    .map(|kv| attribute_string(&kv.value))
                    .unwrap_or_default(),
            })
        })
        .collect();
    if !breadcrumbs.is_empty() {
        event["breadcrumbs"] = Value::Array(breadcrumbs);
    }

    event
}

fn child_span(span: &SpanData) -> Value {
    let mut child = json!({
        "span_id": span.span_context.span_id().to_string(),
        "parent_span_id": span.parent_span_id.to_string(),
        "trace_id": span.span_context.trace_id().to_string(),
        "op": span.name,
        "start_timestamp": unix_timestamp(span.start_time),
        "timestamp": unix_timestamp(span.end_time),
    });
    if let Some(description) = span
        .attributes
        .iter()
        .find(|kv| kv.key.as_str() == DESCRIPTION_ATTRIBUTE)
    {
        child["description"] = json!(attribute_string(&description.value));
    }
    if let Some(status) = status_string(&span.status) {
        child["status"] = json!(status);
    }
    child
}

/// Serialize events into one envelope body.
pub(crate) fn serialize_envelope(events: &[Value], sent_at: DateTime<Utc>) -> String {
    let mut body = String::new();
    body.push_str(
        &json!({"sent_at": sent_at.to_rfc3339_opts(SecondsFormat::Micros, true)}).to_string(),
    );
    body.push('\n');
    for event in events {
        body.push_str(&json!({"type": "transaction"}).to_string());
        body.push('\n');
        body.push_str(&event.to_string());
        body.push('\n');
    }
    body
}

fn status_string(status: &Status) -> Option<&'static str> {
    match status {
        Status::Ok => Some("ok"),
        Status::Error { .. } => Some("error"),
        _ => None,
    }
}

fn unix_timestamp(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn attribute_string(value: &OtelValue) -> String {
    match value {
        OtelValue::Bool(v) => v.to_string(),
        OtelValue::I64(v) => v.to_string(),
        OtelValue::F64(v) => v.to_string(),
        OtelValue::String(v) => v.to_string(),
        other => format!("{other:?}"),
    }
}
