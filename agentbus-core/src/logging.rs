//! Structured log events
//!
//! Events serialize to one JSON object and are logged through `tracing` via
//! their `Display` implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

use crate::error::{AgentBusError, Result};

/// Which side of the bus a message event was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "MessageKind.EMIT")]
    Emit,
    #[serde(rename = "MessageKind.PROCESS")]
    Process,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Emit => write!(f, "MessageKind.EMIT"),
            MessageKind::Process => write!(f, "MessageKind.PROCESS"),
        }
    }
}

/// Delivery stages for message events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStage {
    #[serde(rename = "DeliveryStage.SEND")]
    Send,
    #[serde(rename = "DeliveryStage.DELIVER")]
    Deliver,
}

impl std::fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStage::Send => write!(f, "DeliveryStage.SEND"),
            DeliveryStage::Deliver => write!(f, "DeliveryStage.DELIVER"),
        }
    }
}

/// Event for logging messages
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub agent: String,
    pub selector: String,
    pub identifier: Option<String>,
    pub payload_size: usize,
    pub kind: MessageKind,
    pub delivery_stage: DeliveryStage,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl MessageEvent {
    pub fn new(
        agent: &str,
        selector: &str,
        identifier: Option<String>,
        payload_size: usize,
        kind: MessageKind,
        delivery_stage: DeliveryStage,
    ) -> Self {
        Self {
            event_type: "Message".to_string(),
            agent: agent.to_string(),
            selector: selector.to_string(),
            identifier,
            payload_size,
            kind,
            delivery_stage,
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: String, value: Value) -> Self {
        self.extra.insert(key, value);
        self
    }
}

impl std::fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "MessageEvent serialization error"),
        }
    }
}

/// Event for logging message processor failures
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageHandlerExceptionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub handling_agent: String,
    pub selector: String,
    pub exception: String,
}

impl MessageHandlerExceptionEvent {
    pub fn new(handling_agent: &str, selector: &str, exception: String) -> Self {
        Self {
            event_type: "MessageHandlerException".to_string(),
            handling_agent: handling_agent.to_string(),
            selector: selector.to_string(),
            exception,
        }
    }
}

impl std::fmt::Display for MessageHandlerExceptionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "MessageHandlerExceptionEvent serialization error"),
        }
    }
}

/// Event for logging telemetry that was lost or degraded without affecting
/// message delivery
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryDegradedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub selector: String,
    pub reason: String,
}

impl TelemetryDegradedEvent {
    pub fn new(selector: &str, reason: &dyn std::fmt::Display) -> Self {
        Self {
            event_type: "TelemetryDegraded".to_string(),
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for TelemetryDegradedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "TelemetryDegradedEvent serialization error"),
        }
    }
}

/// Installs a global fmt subscriber filtered by `filter`
/// (e.g. `"info,agentbus_core.trace=debug"`).
pub fn init_logging(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| AgentBusError::with_source(format!("invalid log filter '{}'", filter), e))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| AgentBusError::other(format!("failed to install log subscriber: {}", e)))
}
