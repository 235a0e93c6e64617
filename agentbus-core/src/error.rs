//! Error handling for agentbus-core

use std::fmt;

use crate::store::StoreError;

/// Result type alias for agentbus operations
pub type Result<T> = std::result::Result<T, AgentBusError>;

/// Main error type for the agentbus-core library
#[derive(Debug)]
pub enum AgentBusError {
    /// Malformed message identifier or trace context suffix
    Format(FormatError),
    /// Span lifecycle violations
    Span(SpanError),
    /// Configuration errors
    Config(ConfigError),
    /// Span export errors
    Export(ExportError),
    /// Persistence store errors
    Store(StoreError),
    /// Message-related errors
    Message(MessageError),
    /// Runtime-related errors
    Runtime(RuntimeError),
    /// Serialization/deserialization errors
    Serialization(SerializationError),
    /// Validation errors
    Validation(ValidationError),
    /// I/O errors
    Io(std::io::Error),
    /// Generic errors with context
    Other {
        /// Error message
        message: String,
        /// Optional source error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors raised while decoding identifiers and context suffixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Identifier does not have 5 or 7 hyphen-separated groups
    InvalidGroupCount { identifier: String, found: usize },
    /// Context suffix does not have exactly two fields
    InvalidFieldCount { suffix: String, found: usize },
    /// A field is empty
    EmptyField { field: &'static str },
    /// A field is not a valid hexadecimal number of the expected width
    InvalidHex { field: &'static str, value: String },
    /// The leading groups do not form a UUID
    InvalidUuid { value: String },
    /// Selector carries no identifier segment
    MissingIdentifier { selector: String },
}

/// Span state machine violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanError {
    /// `close` called on a span that is already closed
    AlreadyClosed { span: String },
    /// Attribute written after the span was closed
    WriteAfterClose { span: String, key: String },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Missing required configuration
    MissingRequired { key: String },
    /// Invalid configuration value
    InvalidValue { key: String, value: String, expected: String },
    /// URL scheme has no matching implementation
    UnsupportedScheme { key: String, scheme: String },
    /// Configuration file not found
    FileNotFound { path: String },
    /// Configuration parsing failed
    ParsingFailed { path: String, reason: String },
}

/// Span export errors
#[derive(Debug)]
pub enum ExportError {
    /// Flush did not complete in time
    FlushTimeout { timeout_ms: u64 },
    /// Exporter was shut down or its worker is gone
    Closed,
    /// Destination rejected or failed to persist a batch
    WriteFailed { destination: String, reason: String },
}

/// Message-related errors
#[derive(Debug)]
pub enum MessageError {
    /// Bus send failed
    SendFailed { selector: String, reason: String },
    /// Selector is not declared by the agent definition
    UndeclaredSelector { agent: String, selector: String },
}

/// Runtime-related errors
#[derive(Debug)]
pub enum RuntimeError {
    /// No async runtime available to host background work
    NotInitialized,
}

/// Serialization/deserialization errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization failed
    JsonSerialization { details: String },
    /// JSON deserialization failed
    JsonDeserialization { details: String },
}

/// Validation errors
#[derive(Debug)]
pub enum ValidationError {
    /// Invalid format
    InvalidFormat { field: String, value: String, expected_format: String },
}

impl fmt::Display for AgentBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentBusError::Format(err) => write!(f, "Format error: {}", err),
            AgentBusError::Span(err) => write!(f, "Invalid span state: {}", err),
            AgentBusError::Config(err) => write!(f, "Configuration error: {}", err),
            AgentBusError::Export(err) => write!(f, "Export error: {}", err),
            AgentBusError::Store(err) => write!(f, "Store error: {}", err),
            AgentBusError::Message(err) => write!(f, "Message error: {}", err),
            AgentBusError::Runtime(err) => write!(f, "Runtime error: {}", err),
            AgentBusError::Serialization(err) => write!(f, "Serialization error: {}", err),
            AgentBusError::Validation(err) => write!(f, "Validation error: {}", err),
            AgentBusError::Io(err) => write!(f, "I/O error: {}", err),
            AgentBusError::Other { message, .. } => write!(f, "{}", message),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::InvalidGroupCount { identifier, found } => write!(
                f,
                "identifier '{}' has {} groups (expected 5 or 7)",
                identifier, found
            ),
            FormatError::InvalidFieldCount { suffix, found } => {
                write!(f, "context suffix '{}' has {} fields (expected 2)", suffix, found)
            }
            FormatError::EmptyField { field } => write!(f, "empty {} field", field),
            FormatError::InvalidHex { field, value } => {
                write!(f, "invalid hexadecimal {} '{}'", field, value)
            }
            FormatError::InvalidUuid { value } => write!(f, "invalid instance uuid '{}'", value),
            FormatError::MissingIdentifier { selector } => {
                write!(f, "selector '{}' carries no message identifier", selector)
            }
        }
    }
}

impl fmt::Display for SpanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanError::AlreadyClosed { span } => write!(f, "span '{}' is already closed", span),
            SpanError::WriteAfterClose { span, key } => {
                write!(f, "attribute '{}' written after span '{}' was closed", key, span)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired { key } => write!(f, "Missing required configuration: {}", key),
            ConfigError::InvalidValue { key, value, expected } => {
                write!(f, "Invalid value for '{}': '{}' (expected: {})", key, value, expected)
            }
            ConfigError::UnsupportedScheme { key, scheme } => {
                write!(f, "Unsupported scheme '{}' for '{}'", scheme, key)
            }
            ConfigError::FileNotFound { path } => write!(f, "Configuration file not found: {}", path),
            ConfigError::ParsingFailed { path, reason } => {
                write!(f, "Failed to parse configuration file '{}': {}", path, reason)
            }
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::FlushTimeout { timeout_ms } => {
                write!(f, "Flush did not complete within {} ms", timeout_ms)
            }
            ExportError::Closed => write!(f, "Exporter is closed"),
            ExportError::WriteFailed { destination, reason } => {
                write!(f, "Failed to write spans to '{}': {}", destination, reason)
            }
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::SendFailed { selector, reason } => {
                write!(f, "Failed to send message on '{}': {}", selector, reason)
            }
            MessageError::UndeclaredSelector { agent, selector } => {
                write!(f, "Agent '{}' does not declare selector '{}'", agent, selector)
            }
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NotInitialized => write!(f, "Runtime not initialized"),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::JsonSerialization { details } => {
                write!(f, "JSON serialization failed: {}", details)
            }
            SerializationError::JsonDeserialization { details } => {
                write!(f, "JSON deserialization failed: {}", details)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidFormat { field, value, expected_format } => {
                write!(f, "Invalid format for field '{}': '{}' (expected: {})", field, value, expected_format)
            }
        }
    }
}

impl std::error::Error for AgentBusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentBusError::Io(err) => Some(err),
            AgentBusError::Store(err) => Some(err),
            AgentBusError::Other { source, .. } => {
                source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl std::error::Error for FormatError {}

impl std::error::Error for SpanError {}

impl From<std::io::Error> for AgentBusError {
    fn from(err: std::io::Error) -> Self {
        AgentBusError::Io(err)
    }
}

// serde_json reports I/O failures while writing; every other category comes
// from reading input.
impl From<serde_json::Error> for AgentBusError {
    fn from(err: serde_json::Error) -> Self {
        let details = err.to_string();
        let err = match err.classify() {
            serde_json::error::Category::Io => SerializationError::JsonSerialization { details },
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => SerializationError::JsonDeserialization { details },
        };
        AgentBusError::Serialization(err)
    }
}

impl From<FormatError> for AgentBusError {
    fn from(err: FormatError) -> Self {
        AgentBusError::Format(err)
    }
}

impl From<SpanError> for AgentBusError {
    fn from(err: SpanError) -> Self {
        AgentBusError::Span(err)
    }
}

impl From<ConfigError> for AgentBusError {
    fn from(err: ConfigError) -> Self {
        AgentBusError::Config(err)
    }
}

impl From<ExportError> for AgentBusError {
    fn from(err: ExportError) -> Self {
        AgentBusError::Export(err)
    }
}

impl From<StoreError> for AgentBusError {
    fn from(err: StoreError) -> Self {
        AgentBusError::Store(err)
    }
}

impl AgentBusError {
    /// Create a generic error with a message
    pub fn other<S: Into<String>>(message: S) -> Self {
        AgentBusError::Other {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic error wrapping a source error
    pub fn with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        AgentBusError::Other {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Formatting problems and export hiccups only cost telemetry; span state
    /// violations and configuration errors do not go away on retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentBusError::Format(_) => true,
            AgentBusError::Export(ExportError::FlushTimeout { .. }) => true,
            AgentBusError::Export(ExportError::WriteFailed { .. }) => true,
            AgentBusError::Message(MessageError::SendFailed { .. }) => true,
            _ => false,
        }
    }

    /// True for double close and write-after-close
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, AgentBusError::Span(_))
    }

    /// True when a flush gave up waiting
    pub fn is_flush_timeout(&self) -> bool {
        matches!(self, AgentBusError::Export(ExportError::FlushTimeout { .. }))
    }

    /// True for configuration problems detected at construction time
    pub fn is_configuration(&self) -> bool {
        matches!(self, AgentBusError::Config(_))
    }
}
