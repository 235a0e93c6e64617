//! Spans and their exported records
//!
//! An [`ActiveSpan`] is open from the moment the recorder hands it out until
//! `close()` is called once. Closing stamps the end time and passes an
//! immutable [`SpanRecord`] to the exporter. Anything after that is an
//! invalid-state error.

use super::context::{SpanId, TraceContext, TraceId};
use super::exporter::SpanExporter;
use super::truncate::truncate;
use crate::error::{Result, SpanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute key for the emitting or processing agent
pub const ATTR_AGENT_NAME: &str = "agent.name";
/// Attribute key for the base topic selector
pub const ATTR_MESSAGE_SELECTOR: &str = "message.selector";
/// Attribute key for the truncated serialized payload
pub const ATTR_MESSAGE_DATA: &str = "message.data";

/// Role of a span relative to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Producer,
    Consumer,
    Internal,
}

/// The two message actions that produce spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingOperation {
    Emit,
    Process,
}

impl MessagingOperation {
    pub fn span_name(&self) -> &'static str {
        match self {
            MessagingOperation::Emit => "emit_message",
            MessagingOperation::Process => "process_message",
        }
    }

    pub fn span_kind(&self) -> SpanKind {
        match self {
            MessagingOperation::Emit => SpanKind::Producer,
            MessagingOperation::Process => SpanKind::Consumer,
        }
    }
}

impl fmt::Display for MessagingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.span_name())
    }
}

/// Trace and span id pair as written in exported records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContextRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// A finished span, as handed to exporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    pub context: SpanContextRecord,
    pub parent_id: Option<SpanId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

impl SpanRecord {
    pub fn trace_context(&self) -> TraceContext {
        TraceContext::new(self.context.trace_id, self.context.span_id, self.parent_id)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanState {
    Open,
    Closed,
}

/// A span owned by exactly one recorder call site
pub struct ActiveSpan {
    name: String,
    kind: SpanKind,
    context: TraceContext,
    start_time: DateTime<Utc>,
    attributes: BTreeMap<String, String>,
    state: SpanState,
    exporter: Arc<dyn SpanExporter>,
}

impl ActiveSpan {
    pub(crate) fn start(
        name: impl Into<String>,
        kind: SpanKind,
        context: TraceContext,
        exporter: Arc<dyn SpanExporter>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            context,
            start_time: Utc::now(),
            attributes: BTreeMap::new(),
            state: SpanState::Open,
            exporter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn is_open(&self) -> bool {
        self.state == SpanState::Open
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Sets an attribute. Only valid while the span is open.
    pub fn record_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.state == SpanState::Closed {
            return Err(SpanError::WriteAfterClose {
                span: self.name.clone(),
                key,
            }
            .into());
        }
        self.attributes.insert(key, value.into());
        Ok(())
    }

    /// Closes the span and exports it. A second call fails with
    /// [`SpanError::AlreadyClosed`] and exports nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SpanState::Closed {
            return Err(SpanError::AlreadyClosed {
                span: self.name.clone(),
            }
            .into());
        }
        self.state = SpanState::Closed;

        let record = SpanRecord {
            name: self.name.clone(),
            kind: self.kind,
            context: SpanContextRecord {
                trace_id: self.context.trace_id,
                span_id: self.context.span_id,
            },
            parent_id: self.context.parent_span_id,
            start_time: self.start_time,
            end_time: Utc::now(),
            attributes: std::mem::take(&mut self.attributes),
        };
        self.exporter.export(record)
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("context", &self.context)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if self.state == SpanState::Open {
            tracing::warn!(
                target: crate::TRACE_LOGGER_NAME,
                span = %self.name,
                trace_id = %self.context.trace_id,
                span_id = %self.context.span_id,
                "span dropped while open, it will not be exported"
            );
        }
    }
}

/// The fixed attribute set carried by message spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttributes {
    agent_name: String,
    selector: String,
    data: String,
}

impl MessageAttributes {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            selector: String::new(),
            data: String::new(),
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Stores a bounded copy of the serialized payload.
    pub fn data(mut self, serialized: &str, max_len: usize) -> Self {
        self.data = truncate(serialized, max_len).into_owned();
        self
    }

    pub fn data_value(&self) -> &str {
        &self.data
    }

    pub fn record_into(self, span: &mut ActiveSpan) -> Result<()> {
        span.record_attribute(ATTR_AGENT_NAME, self.agent_name)?;
        span.record_attribute(ATTR_MESSAGE_SELECTOR, self.selector)?;
        span.record_attribute(ATTR_MESSAGE_DATA, self.data)?;
        Ok(())
    }
}
