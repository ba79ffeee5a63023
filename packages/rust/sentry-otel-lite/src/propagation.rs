//! Trace continuation for the `sentry-trace` header format.
//!
//! An upstream caller hands each queue message a `sentry-trace` header and an
//! optional `baggage` string. This module parses that header into a
//! [`TraceContext`], converts it into a remote OpenTelemetry span context, and
//! provides a [`TextMapPropagator`] so the same format can be extracted from or
//! injected into any carrier.
//!
//! The header is a hyphen-joined triple `traceId-parentSpanId-sampledFlag`,
//! where a literal `"1"` in the third segment means sampled. Parsing is
//! deliberately forgiving: missing segments resolve to absent fields and a
//! malformed header never raises — the caller processes the message untraced
//! instead.

use once_cell::sync::Lazy;
use opentelemetry::{
    propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator},
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};

/// Carrier key for the trace continuation header.
pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";

/// Carrier key for vendor propagation metadata, forwarded verbatim.
pub const BAGGAGE_HEADER: &str = "baggage";

static PROPAGATOR_FIELDS: Lazy<[String; 2]> =
    Lazy::new(|| [SENTRY_TRACE_HEADER.to_owned(), BAGGAGE_HEADER.to_owned()]);

/// Opaque baggage string carried through a [`Context`] so that `inject` can
/// re-emit it unchanged. The content is never parsed or validated.
#[derive(Debug, Clone)]
pub struct SentryBaggage(pub String);

/// Trace continuation data parsed from an inbound message.
///
/// Fields are kept as opaque strings; conversion to OpenTelemetry types
/// happens in [`TraceContext::span_context`] and degrades to `None` when the
/// ids are not valid hex rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// Trace identifier shared by every span continuing this trace.
    pub trace_id: String,
    /// Span id of the upstream caller; the new root span's parent.
    pub parent_span_id: Option<String>,
    /// Upstream sampling decision, `"1"` meaning sampled.
    pub sampled: bool,
    /// Verbatim baggage string, if the message carried one.
    pub baggage: Option<String>,
}

impl TraceContext {
    /// Parse the `sentry-trace` and `baggage` values from a message.
    ///
    /// Returns `None` when the trace header is absent or empty. Fewer than two
    /// segments leave `parent_span_id` absent; anything other than a literal
    /// `"1"` in the third segment means unsampled. Segments past the third are
    /// ignored. No input raises an error.
    pub fn parse(sentry_trace: Option<&str>, baggage: Option<&str>) -> Option<Self> {
        let header = sentry_trace?.trim();
        if header.is_empty() {
            return None;
        }

        let mut segments = header.split('-');
        let trace_id = segments.next().unwrap_or_default().to_owned();
        let parent_span_id = segments.next().map(str::to_owned);
        let sampled = segments.next() == Some("1");

        Some(Self {
            trace_id,
            parent_span_id,
            sampled,
            baggage: baggage.map(str::to_owned),
        })
    }

    /// Convert into a remote OpenTelemetry span context.
    ///
    /// Requires both ids to be valid non-zero hex; anything else yields `None`
    /// and the message is processed without trace continuation.
    pub fn span_context(&self) -> Option<SpanContext> {
        let trace_id = TraceId::from_hex(&self.trace_id).ok()?;
        let span_id = SpanId::from_hex(self.parent_span_id.as_deref()?).ok()?;
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        let span_context = SpanContext::new(trace_id, span_id, flags, true, TraceState::default());
        span_context.is_valid().then_some(span_context)
    }
}

/// A [`TextMapPropagator`] for the `sentry-trace` and `baggage` carrier keys.
///
/// `extract` produces a context holding the remote span context plus the
/// verbatim baggage string; `inject` writes the active span back out in the
/// same triple format and re-emits the stored baggage untouched.
#[derive(Debug, Default)]
pub struct SentryTracePropagator;

impl SentryTracePropagator {
    pub fn new() -> Self {
        Self
    }
}

impl TextMapPropagator for SentryTracePropagator {
    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(PROPAGATOR_FIELDS.as_ref())
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let parsed = TraceContext::parse(
            extractor.get(SENTRY_TRACE_HEADER),
            extractor.get(BAGGAGE_HEADER),
        );
        let Some(trace_context) = parsed else {
            return cx.clone();
        };

        let mut cx = cx.clone();
        if let Some(baggage) = &trace_context.baggage {
            cx = cx.with_value(SentryBaggage(baggage.clone()));
        }
        match trace_context.span_context() {
            Some(span_context) => cx.with_remote_span_context(span_context),
            None => cx,
        }
    }

    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            let flag = if span_context.is_sampled() { "1" } else { "0" };
            injector.set(
                SENTRY_TRACE_HEADER,
                format!(
                    "{}-{}-{}",
                    span_context.trace_id(),
                    span_context.span_id(),
                    flag
                ),
            );
        }
        if let Some(baggage) = cx.get::<SentryBaggage>() {
            injector.set(BAGGAGE_HEADER, baggage.0.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const PARENT_ID: &str = "00f067aa0ba902b7";

    #[test]
    fn test_parse_full_header() {
        let context = TraceContext::parse(Some("abc-def-1"), None).unwrap();
        assert_eq!(context.trace_id, "abc");
        assert_eq!(context.parent_span_id.as_deref(), Some("def"));
        assert!(context.sampled);
        assert!(context.baggage.is_none());
    }

    #[test]
    fn test_parse_unsampled_header() {
        let context = TraceContext::parse(Some("abc-def-0"), None).unwrap();
        assert!(!context.sampled);

        // Anything other than a literal "1" means unsampled.
        let context = TraceContext::parse(Some("abc-def-true"), None).unwrap();
        assert!(!context.sampled);
    }

    #[test]
    fn test_parse_trace_id_only() {
        let context = TraceContext::parse(Some("abc"), None).unwrap();
        assert_eq!(context.trace_id, "abc");
        assert_eq!(context.parent_span_id, None);
        assert!(!context.sampled);
    }

    #[test]
    fn test_parse_absent_or_empty() {
        assert_eq!(TraceContext::parse(None, None), None);
        assert_eq!(TraceContext::parse(Some(""), None), None);
        assert_eq!(TraceContext::parse(Some("   "), None), None);
    }

    #[test]
    fn test_parse_ignores_extra_segments() {
        let context = TraceContext::parse(Some("abc-def-1-extra"), None).unwrap();
        assert_eq!(context.trace_id, "abc");
        assert_eq!(context.parent_span_id.as_deref(), Some("def"));
        assert!(context.sampled);
    }

    #[test]
    fn test_parse_keeps_baggage_verbatim() {
        let baggage = "sentry-environment=prod,sentry-release=1.2.3";
        let context = TraceContext::parse(Some("abc-def-1"), Some(baggage)).unwrap();
        assert_eq!(context.baggage.as_deref(), Some(baggage));
    }

    #[test]
    fn test_span_context_from_valid_ids() {
        let header = format!("{TRACE_ID}-{PARENT_ID}-1");
        let context = TraceContext::parse(Some(&header), None).unwrap();
        let span_context = context.span_context().unwrap();
        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert!(span_context.is_sampled());
        assert_eq!(span_context.trace_id(), TraceId::from_hex(TRACE_ID).unwrap());
        assert_eq!(span_context.span_id(), SpanId::from_hex(PARENT_ID).unwrap());
    }

    #[test]
    fn test_span_context_degrades_on_bad_ids() {
        // Not hex at all.
        let context = TraceContext::parse(Some("xyz-!!-1"), None).unwrap();
        assert_eq!(context.span_context(), None);

        // Zero ids are structurally hex but invalid as a trace reference.
        let context =
            TraceContext::parse(Some("00000000000000000000000000000000-0000000000000000-1"), None)
                .unwrap();
        assert_eq!(context.span_context(), None);

        // Missing parent span id means nothing to continue from.
        let context = TraceContext::parse(Some(TRACE_ID), None).unwrap();
        assert_eq!(context.span_context(), None);
    }

    #[test]
    fn test_propagator_extract_and_inject_round_trip() {
        let baggage = "sentry-public_key=abc123";
        let carrier = HashMap::from([
            (
                SENTRY_TRACE_HEADER.to_string(),
                format!("{TRACE_ID}-{PARENT_ID}-1"),
            ),
            (BAGGAGE_HEADER.to_string(), baggage.to_string()),
        ]);

        let propagator = SentryTracePropagator::new();
        let cx = propagator.extract(&carrier);
        assert!(cx.span().span_context().is_valid());
        assert_eq!(cx.get::<SentryBaggage>().unwrap().0, baggage);

        let mut injected = HashMap::<String, String>::new();
        propagator.inject_context(&cx, &mut injected);
        assert_eq!(
            injected.get(SENTRY_TRACE_HEADER).unwrap(),
            &format!("{TRACE_ID}-{PARENT_ID}-1")
        );
        assert_eq!(injected.get(BAGGAGE_HEADER).unwrap(), baggage);
    }

    #[test]
    fn test_propagator_extract_with_malformed_header() {
        let carrier = HashMap::from([(SENTRY_TRACE_HEADER.to_string(), "not-hex-1".to_string())]);
        let propagator = SentryTracePropagator::new();
        let cx = propagator.extract(&carrier);
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_propagator_fields() {
        let propagator = SentryTracePropagator::new();
        let fields: Vec<_> = propagator.fields().collect();
        assert_eq!(fields, vec![SENTRY_TRACE_HEADER, BAGGAGE_HEADER]);
    }
}
