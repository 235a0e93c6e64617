//! OpenTelemetry interop

use super::context::{SpanId, TraceContext, TraceId};
use opentelemetry::trace::{self as otel, SpanContext, TraceFlags, TraceState};

impl From<&TraceContext> for SpanContext {
    /// Carried contexts always come from another process, so the result is
    /// remote and sampled.
    fn from(ctx: &TraceContext) -> Self {
        SpanContext::new(
            otel::TraceId::from_bytes(ctx.trace_id.as_u128().to_be_bytes()),
            otel::SpanId::from_bytes(ctx.span_id.as_u64().to_be_bytes()),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        )
    }
}

/// Reads the ids back out of an OpenTelemetry span context. Returns `None`
/// for the invalid (all-zero) context.
pub fn from_otel(span_context: &SpanContext) -> Option<TraceContext> {
    if !span_context.is_valid() {
        return None;
    }
    Some(TraceContext::new(
        TraceId::from_u128(u128::from_be_bytes(span_context.trace_id().to_bytes())),
        SpanId::from_u64(u64::from_be_bytes(span_context.span_id().to_bytes())),
        None,
    ))
}
