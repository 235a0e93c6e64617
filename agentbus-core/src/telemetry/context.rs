//! Trace and span identifiers
//!
//! Ids are plain integers: 128 bits for traces, 64 bits for spans. Freshly
//! generated ids are never zero, which keeps them valid for exporters that
//! treat an all-zero id as "absent".

use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 128-bit trace identifier, shared by every span of one request chain
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Random, non-zero trace id
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1..=u128::MAX))
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

/// 64-bit span identifier, unique per span within a trace
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Random, non-zero span id
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(1..=u64::MAX))
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:032x})", self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:032x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

// Exported records carry ids as "0x"-prefixed, zero-padded hex strings.

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        u128::from_str_radix(strip_hex_prefix(&raw), 16)
            .map(TraceId)
            .map_err(|e| de::Error::custom(format!("invalid trace id '{}': {}", raw, e)))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        u64::from_str_radix(strip_hex_prefix(&raw), 16)
            .map(SpanId)
            .map_err(|e| de::Error::custom(format!("invalid span id '{}': {}", raw, e)))
    }
}

/// Position of one span inside a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, parent_span_id: Option<SpanId>) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
        }
    }

    /// Context as seen on the far side of the bus: no parent link.
    pub fn remote(trace_id: impl Into<TraceId>, span_id: impl Into<SpanId>) -> Self {
        Self::new(trace_id.into(), span_id.into(), None)
    }

    /// First hop of a request: fresh trace, fresh span, no parent.
    pub fn new_root() -> Self {
        Self::new(TraceId::random(), SpanId::random(), None)
    }

    /// Same trace, fresh span id, parented on `self`.
    pub fn child(&self) -> Self {
        Self::new(self.trace_id, SpanId::random(), Some(self.span_id))
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Drops the parent link, keeping what travels on the wire.
    pub fn without_parent(&self) -> Self {
        Self::new(self.trace_id, self.span_id, None)
    }
}
