//! Sampling override applied to every event leaving the process.
//!
//! The upstream sampling decision is probabilistic. This worker's contract is
//! that every transaction it produces reaches the backend, so the send path
//! runs each outgoing event through [`force_transaction_sampling`]: any
//! trace-bearing event has its `sampled` flag coerced to `true` before
//! transmission. Events that carry no trace data pass through unmodified.
//!
//! The filter is a pure function over JSON events and is composed into the
//! exporter via [`BeforeSend`], so it can be tested (and replaced) without any
//! transport in the picture.

use serde_json::Value;
use std::sync::Arc;

/// Hook applied to every event immediately before transmission.
pub type BeforeSend = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// The default [`BeforeSend`]: [`force_transaction_sampling`].
pub fn default_before_send() -> BeforeSend {
    Arc::new(force_transaction_sampling)
}

/// Coerce `sampled` to `true` for trace-bearing events.
///
/// An event is trace-bearing when its `type` is `"transaction"`, or it has a
/// `transaction` key, or it has a `spans` key. For such events a missing
/// `sampled` flag, or any value other than exactly `true`, is rewritten to
/// `true`. Everything else is returned unchanged.
pub fn force_transaction_sampling(mut event: Value) -> Value {
    let trace_bearing = event.get("type").and_then(Value::as_str) == Some("transaction")
        || event.get("transaction").is_some()
        || event.get("spans").is_some();
    if !trace_bearing {
        return event;
    }

    if event.get("sampled").and_then(Value::as_bool) != Some(true) {
        if let Some(fields) = event.as_object_mut() {
            fields.insert("sampled".to_owned(), Value::Bool(true));
        }
    }
    event
}
