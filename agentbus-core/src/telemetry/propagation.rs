//! Context propagation through message identifiers
//!
//! The bus has no header channel, so the emitting side folds the trace
//! context into the message key and the receiving side reads it back out of
//! the bound selector. Payload bytes pass through untouched.

use super::context::TraceContext;
use crate::error::{FormatError, Result};
use crate::logging::TelemetryDegradedEvent;
use crate::message::{BusMessage, MessageIdentifier};
use crate::topic::{BoundSelector, TopicSelector};
use bytes::Bytes;

/// Everything the bus needs for one outgoing message, plus the context the
/// emit span must use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub selector: TopicSelector,
    pub identifier: MessageIdentifier,
    pub payload: Bytes,
    pub context: TraceContext,
}

impl OutboundEnvelope {
    pub fn bound_selector(&self) -> BoundSelector {
        self.selector.bind(&self.identifier)
    }

    pub fn into_bus_message(self) -> BusMessage {
        BusMessage {
            selector: self.selector,
            key: self.identifier,
            payload: self.payload,
        }
    }
}

/// Builds outgoing identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeBuilder {
    attach_context: bool,
}

impl EnvelopeBuilder {
    /// Identifiers carry the trace context (7 groups).
    pub fn traced() -> Self {
        Self { attach_context: true }
    }

    /// Identifiers are bare UUIDs (5 groups); used when tracing is off.
    pub fn untraced() -> Self {
        Self { attach_context: false }
    }

    pub fn attaches_context(&self) -> bool {
        self.attach_context
    }

    /// Picks the context for a new emit and wraps the payload.
    ///
    /// With no `parent` this is the first hop of a request and a new trace is
    /// started. Otherwise the trace id is reused and the new span is parented
    /// on `parent.span_id`.
    pub fn build(&self, selector: TopicSelector, payload: Bytes, parent: Option<&TraceContext>) -> OutboundEnvelope {
        let context = match parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(),
        };
        let identifier = if self.attach_context {
            MessageIdentifier::traced(context)
        } else {
            MessageIdentifier::new()
        };
        OutboundEnvelope {
            selector,
            identifier,
            payload,
            context,
        }
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::traced()
    }
}

/// What the receiving side learned from a bound selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundContext {
    pub base_selector: String,
    pub identifier: Option<MessageIdentifier>,
    pub parent: Option<TraceContext>,
}

impl InboundContext {
    fn without_context(base_selector: &str) -> Self {
        Self {
            base_selector: base_selector.to_string(),
            identifier: None,
            parent: None,
        }
    }
}

/// Reads parent contexts out of bound selectors
#[derive(Debug, Clone, Copy, Default)]
pub struct InboundContextExtractor;

impl InboundContextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Strict variant: any malformed identifier is an error.
    pub fn try_extract(&self, bound_selector: &str) -> std::result::Result<InboundContext, FormatError> {
        let (base, raw_identifier) = BoundSelector::split(bound_selector)?;
        let identifier: MessageIdentifier = raw_identifier.parse()?;
        Ok(InboundContext {
            base_selector: base.trim_matches('.').to_string(),
            parent: identifier.trace_context().copied(),
            identifier: Some(identifier),
        })
    }

    /// Never fails: a malformed identifier costs the trace link, not the
    /// message. The problem is logged and the span becomes a trace root.
    pub fn extract(&self, bound_selector: &str) -> InboundContext {
        match self.try_extract(bound_selector) {
            Ok(inbound) => inbound,
            Err(err) => {
                let base = BoundSelector::split(bound_selector)
                    .map(|(base, _)| base)
                    .unwrap_or(bound_selector)
                    .trim_matches('.');
                let event = TelemetryDegradedEvent::new(bound_selector, &err);
                tracing::warn!(target: crate::TRACE_LOGGER_NAME, "{}", event);
                InboundContext::without_context(base)
            }
        }
    }

    /// Parses the selector as a [`BoundSelector`], validating the base too.
    pub fn parse_bound(&self, bound_selector: &str) -> Result<BoundSelector> {
        bound_selector.parse()
    }
}
