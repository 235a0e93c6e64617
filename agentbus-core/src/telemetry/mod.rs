//! Distributed tracing for bus messages
//!
//! Trace contexts travel inside message identifiers ([`codec`],
//! [`propagation`]), spans are recorded per emit and per process
//! ([`recorder`], [`span`]) and handed to an exporter ([`exporter`]).

pub mod codec;
pub mod context;
pub mod exporter;
#[cfg(feature = "otel")]
pub mod otel;
pub mod propagation;
pub mod recorder;
pub mod span;
pub mod truncate;

pub use context::{SpanId, TraceContext, TraceId};
#[cfg(feature = "http")]
pub use exporter::CollectorSpanWriter;
pub use exporter::{
    init_exporter, BatchExporter, FileSpanWriter, InMemoryExporter, SpanExporter, SpanWriter,
};
pub use propagation::{EnvelopeBuilder, InboundContext, InboundContextExtractor, OutboundEnvelope};
pub use recorder::SpanRecorder;
pub use span::{
    ActiveSpan, MessageAttributes, MessagingOperation, SpanContextRecord, SpanKind, SpanRecord,
    ATTR_AGENT_NAME, ATTR_MESSAGE_DATA, ATTR_MESSAGE_SELECTOR,
};
pub use truncate::{truncate, TRUNCATION_MARKER};
