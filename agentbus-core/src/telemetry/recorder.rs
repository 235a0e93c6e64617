//! Span recorder
//!
//! Opens message spans for one agent and fills in their attributes. The
//! recorder is cheap to clone and shares its exporter with every span it opens.

use super::context::TraceContext;
use super::exporter::SpanExporter;
use super::propagation::InboundContext;
use super::span::{ActiveSpan, MessageAttributes, MessagingOperation, SpanKind};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct SpanRecorder {
    agent_name: String,
    exporter: Arc<dyn SpanExporter>,
    max_attribute_len: usize,
}

impl SpanRecorder {
    pub fn new(agent_name: impl Into<String>, exporter: Arc<dyn SpanExporter>, max_attribute_len: usize) -> Self {
        Self {
            agent_name: agent_name.into(),
            exporter,
            max_attribute_len,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn exporter(&self) -> &Arc<dyn SpanExporter> {
        &self.exporter
    }

    pub fn max_attribute_len(&self) -> usize {
        self.max_attribute_len
    }

    /// Opens a span with an explicit context.
    pub fn open(&self, name: impl Into<String>, kind: SpanKind, context: TraceContext) -> ActiveSpan {
        ActiveSpan::start(name, kind, context, self.exporter.clone())
    }

    /// Opens a span that starts a new trace.
    pub fn open_root(&self, name: impl Into<String>, kind: SpanKind) -> ActiveSpan {
        self.open(name, kind, TraceContext::new_root())
    }

    /// Opens a span parented on a (usually remote) context.
    pub fn open_child(&self, name: impl Into<String>, kind: SpanKind, parent: &TraceContext) -> ActiveSpan {
        self.open(name, kind, parent.child())
    }

    fn attributes(&self, selector: &str, serialized_payload: &str) -> MessageAttributes {
        MessageAttributes::new(self.agent_name.as_str())
            .selector(selector)
            .data(serialized_payload, self.max_attribute_len)
    }

    /// Opens the `emit_message` span for an outgoing message whose context was
    /// already chosen by the envelope builder.
    pub fn start_emit(&self, context: TraceContext, selector: &str, serialized_payload: &str) -> Result<ActiveSpan> {
        let operation = MessagingOperation::Emit;
        let mut span = self.open(operation.span_name(), operation.span_kind(), context);
        self.attributes(selector, serialized_payload).record_into(&mut span)?;
        Ok(span)
    }

    /// Opens the `process_message` span for an inbound message: a child of the
    /// carried context when there is one, a trace root otherwise.
    pub fn start_process(&self, inbound: &InboundContext, serialized_payload: &str) -> Result<ActiveSpan> {
        let operation = MessagingOperation::Process;
        let mut span = match &inbound.parent {
            Some(parent) => self.open_child(operation.span_name(), operation.span_kind(), parent),
            None => self.open_root(operation.span_name(), operation.span_kind()),
        };
        self.attributes(&inbound.base_selector, serialized_payload)
            .record_into(&mut span)?;
        Ok(span)
    }
}

impl fmt::Debug for SpanRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanRecorder")
            .field("agent_name", &self.agent_name)
            .field("destination", &self.exporter.destination())
            .field("max_attribute_len", &self.max_attribute_len)
            .finish()
    }
}
