//! Error path tests for agentbus-core
//!
//! These tests verify that error conditions are classified and surfaced
//! where they belong.


use agentbus_core::error::{ConfigError, ExportError, FormatError};
use agentbus_core::telemetry::codec;
use agentbus_core::*;
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;

/// Test malformed identifiers are format errors
#[test]
fn test_identifier_format_errors() {
    for bad in [
        "",
        "0f0c4c1e-6bd0-4a34-9a3c",
        "0f0c4c1e-6bd0-4a34-9a3c-1a2b3c4d5e6f-3039",
        "0f0c4c1e-6bd0-4a34-9a3c-1a2b3c4d5e6f-1-2-3",
    ] {
        let err = bad.parse::<MessageIdentifier>().unwrap_err();
        assert!(matches!(err, FormatError::InvalidGroupCount { .. }), "{}", bad);
        assert!(AgentBusError::from(err).is_recoverable());
    }
}

/// Test codec rejects signs, whitespace and overflow
#[test]
fn test_codec_rejects_bad_fields() {
    for bad in ["+3039-1", "3039- 1", "-1", "3039", "3039-1-2", "g-1"] {
        assert!(codec::decode(bad).is_err(), "{}", bad);
    }
    let too_wide = format!("{}-1", "f".repeat(33));
    assert!(codec::decode(&too_wide).is_err());
    let span_too_wide = format!("1-{}", "f".repeat(17));
    assert!(codec::decode(&span_too_wide).is_err());
}

/// Test configuration problems surface when building the agent
#[tokio::test]
async fn test_configuration_errors_at_construction() {
    let bus = InMemoryBus::new();
    let build = |settings: AgentSettings| {
        TracedAgent::builder(AgentDefinition::new("A"), settings)
            .bus(Arc::new(bus.clone()))
            .build()
    };

    let err = build(AgentSettings::new("k").with_tracing_collector_url("gopher://collector")).unwrap_err();
    assert!(matches!(err, AgentBusError::Config(ConfigError::UnsupportedScheme { .. })));

    let err = build(AgentSettings::new("k").with_tracing_collector_url("file:///nonexistent-dir/x/spans.json"))
        .unwrap_err();
    assert!(err.is_configuration());

    let err = build(AgentSettings::new("")).unwrap_err();
    assert!(err.is_configuration());
}

/// Test exporter errors after shutdown
#[tokio::test]
async fn test_export_after_shutdown_is_closed() {
    let exporter = Arc::new(InMemoryExporter::new());
    let agent = traced_agent("A", &InMemoryBus::new(), exporter.clone(), None);
    agent.shutdown().await.unwrap();

    // Delivery still succeeds; only the span is lost.
    let bus_result = agent.emit(VULNERABILITY, &serde_json::json!({})).await;
    assert!(bus_result.is_ok());
    assert!(exporter.finished_spans().is_empty());

    let recorder = SpanRecorder::new("A", exporter, 16);
    let mut span = recorder.start_emit(TraceContext::new_root(), VULNERABILITY, "{}").unwrap();
    let err = span.close().unwrap_err();
    assert!(matches!(err, AgentBusError::Export(ExportError::Closed)));
}

/// Test flush timeout is recoverable
#[test]
fn test_flush_timeout_classification() {
    let err = AgentBusError::from(ExportError::FlushTimeout {
        timeout_ms: Duration::from_millis(10).as_millis() as u64,
    });
    assert!(err.is_flush_timeout());
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("10"));
}

/// Test store type errors reach the caller
#[tokio::test]
async fn test_store_wrong_type() {
    let store = InMemoryPersistStore::new();
    store.add("k", bytes::Bytes::from_static(b"v")).await.unwrap();
    let err = AgentBusError::from(store.set_len("k").await.unwrap_err());
    assert!(matches!(err, AgentBusError::Store(StoreError::WrongType { .. })));
    assert!(std::error::Error::source(&err).is_some());
}
