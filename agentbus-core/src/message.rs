//! Bus messages and their identifiers
//!
//! The bus itself is an external collaborator reached through [`MessageBus`].
//! This module defines what travels on it: a selector, a unique key and opaque
//! payload bytes that nothing here ever rewrites.

use crate::error::{FormatError, Result};
use crate::telemetry::{codec, TraceContext};
use crate::topic::TopicSelector;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Number of hyphen-separated groups in an identifier without trace context
pub const UNTRACED_GROUPS: usize = 5;
/// Number of hyphen-separated groups in an identifier carrying trace context
pub const TRACED_GROUPS: usize = 7;

/// Unique per-message key, optionally carrying a trace context
///
/// Serialized as a hyphenated UUID (5 groups), followed by
/// `-<trace hex>-<span hex>` when a context is attached (7 groups).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageIdentifier {
    instance: Uuid,
    trace: Option<TraceContext>,
}

impl MessageIdentifier {
    /// Fresh identifier without trace context
    pub fn new() -> Self {
        Self {
            instance: Uuid::new_v4(),
            trace: None,
        }
    }

    /// Fresh identifier carrying `context`. Only the trace and span ids are
    /// kept; the parent link does not travel.
    pub fn traced(context: TraceContext) -> Self {
        Self {
            instance: Uuid::new_v4(),
            trace: Some(context.without_parent()),
        }
    }

    pub fn from_parts(instance: Uuid, trace: Option<TraceContext>) -> Self {
        Self {
            instance,
            trace: trace.map(|ctx| ctx.without_parent()),
        }
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn group_count(&self) -> usize {
        if self.trace.is_some() {
            TRACED_GROUPS
        } else {
            UNTRACED_GROUPS
        }
    }
}

impl Default for MessageIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance.hyphenated())?;
        if let Some(ctx) = &self.trace {
            write!(f, "{}{}", codec::FIELD_SEPARATOR, codec::encode(ctx))?;
        }
        Ok(())
    }
}

impl FromStr for MessageIdentifier {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, FormatError> {
        let groups: Vec<&str> = s.split('-').collect();
        let trace = match groups.len() {
            UNTRACED_GROUPS => None,
            TRACED_GROUPS => Some(codec::decode_fields(groups[5], groups[6])?),
            found => {
                return Err(FormatError::InvalidGroupCount {
                    identifier: s.to_string(),
                    found,
                })
            }
        };

        let uuid_text = groups[..UNTRACED_GROUPS].join("-");
        let instance = Uuid::try_parse(&uuid_text).map_err(|_| FormatError::InvalidUuid {
            value: uuid_text.clone(),
        })?;
        Ok(Self { instance, trace })
    }
}

/// A message as handed to the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub selector: TopicSelector,
    pub key: MessageIdentifier,
    pub payload: Bytes,
}

impl BusMessage {
    /// `<selector>.<key>`, the form receivers see
    pub fn bound_selector(&self) -> String {
        self.selector.bind(&self.key).to_string()
    }
}

/// A message as handed to a processor
///
/// `selector` is the base selector as received. It is not validated, since a
/// badly formed selector must not keep the payload from its processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub selector: String,
    pub identifier: Option<MessageIdentifier>,
    pub data: Bytes,
}

/// Outbound side of the bus
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, message: BusMessage) -> Result<()>;
}

/// Records every message it is given; used to observe what reached the bus.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBus {
    messages: Arc<Mutex<Vec<BusMessage>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_messages(&self) -> Vec<BusMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<BusMessage> {
        self.raw_messages().pop()
    }

    pub fn len(&self) -> usize {
        self.raw_messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send(&self, message: BusMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
        Ok(())
    }
}
