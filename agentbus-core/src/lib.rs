//! # agentbus-core
//!
//! Distributed tracing for agents that talk exclusively over a topic bus with
//! no header channel. The trace context travels inside the message
//! identifier, so a chain of agents produces one connected trace while the
//! payload bytes reach every agent exactly as they were emitted.
//!
//! ## Features
//!
//! - **Context in identifiers**: `<uuid>-<trace hex>-<span hex>` message keys
//! - **Emit and process spans**: bounded attributes, explicit open/closed state
//! - **Flushable exporters**: file, HTTP collector and in-memory sinks
//! - **Replica persistence**: shared sets, strings and hashes for deduplication
//!
//! ## Quick Start
//!
//! ```rust
//! use agentbus_core::{InboundContextExtractor, MessageIdentifier, TopicSelector, TraceContext};
//!
//! let selector = TopicSelector::new("v3.report.vulnerability").unwrap();
//! let identifier = MessageIdentifier::traced(TraceContext::remote(12345u128, 99998u64));
//! let bound = selector.bind(&identifier).to_string();
//!
//! let inbound = InboundContextExtractor::new().extract(&bound);
//! assert_eq!(inbound.base_selector, "v3.report.vulnerability");
//! assert_eq!(inbound.parent.unwrap().trace_id.as_u128(), 12345);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

// Error types (must be first for other modules to use)
pub mod error;

pub mod config;
pub mod logging;
pub mod message;
pub mod serialization;
pub mod store;
pub mod telemetry;
pub mod topic;

pub mod agent;

pub use agent::{AgentContext, MessageProcessor, TracedAgent, TracedAgentBuilder};
pub use config::{AgentDefinition, AgentSettings, TelemetryConfig};
pub use error::{AgentBusError, Result};
pub use logging::init_logging;
pub use message::{BusMessage, InMemoryBus, Message, MessageBus, MessageIdentifier};
pub use serialization::{JsonPayloadSerializer, PayloadSerializer};
pub use store::{connect_store, InMemoryPersistStore, PersistStore, StoreError};
pub use telemetry::{
    init_exporter, EnvelopeBuilder, InMemoryExporter, InboundContext, InboundContextExtractor,
    SpanExporter, SpanRecord, SpanRecorder, TraceContext,
};
pub use topic::{BoundSelector, TopicSelector};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Root logger target
pub const ROOT_LOGGER_NAME: &str = "agentbus_core";

/// Target for structured message events
pub const EVENT_LOGGER_NAME: &str = "agentbus_core.events";

/// Target for telemetry diagnostics
pub const TRACE_LOGGER_NAME: &str = "agentbus_core.trace";
