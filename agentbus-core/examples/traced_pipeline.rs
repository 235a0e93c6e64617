//! Two agents connected by an in-memory bus, producing one trace.
//!
//! Run with `cargo run --example traced_pipeline`.

use agentbus_core::agent::{AgentContext, MessageProcessor};
use agentbus_core::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct Vulnerability {
    title: String,
    technical_detail: String,
    risk_rating: String,
}

/// Turns vulnerabilities into one-line summaries
struct Summarizer {
    serializer: JsonPayloadSerializer,
}

#[async_trait]
impl MessageProcessor for Summarizer {
    async fn process(&self, ctx: &AgentContext<'_>, message: Message) -> Result<()> {
        let vulnerability: Vulnerability = self.serializer.from_bytes(&message.data)?;
        let summary = format!("[{}] {}", vulnerability.risk_rating, vulnerability.title);
        ctx.emit("v3.report.summary", &summary).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info,agentbus_core.trace=debug")?;

    let bus = InMemoryBus::new();
    let exporter = Arc::new(InMemoryExporter::new());

    let scanner = TracedAgent::builder(
        AgentDefinition::new("scanner").with_out_selector(TopicSelector::new("v3.report.vulnerability")?),
        AgentSettings::new("agent/scanner").with_tracing_collector_url("memory://"),
    )
    .bus(Arc::new(bus.clone()))
    .with_exporter(exporter.clone())
    .build()?;

    let summarizer = TracedAgent::builder(
        AgentDefinition::new("summarizer")
            .with_in_selector(TopicSelector::new("v3.report.vulnerability")?)
            .with_out_selector(TopicSelector::new("v3.report.summary")?),
        AgentSettings::new("agent/summarizer").with_tracing_collector_url("memory://"),
    )
    .bus(Arc::new(bus.clone()))
    .processor(Arc::new(Summarizer {
        serializer: JsonPayloadSerializer::new(),
    }))
    .with_exporter(exporter.clone())
    .build()?;

    scanner
        .emit(
            "v3.report.vulnerability",
            &Vulnerability {
                title: "Outdated TLS".to_string(),
                technical_detail: "TLS 1.0 accepted".to_string(),
                risk_rating: "MEDIUM".to_string(),
            },
        )
        .await?;

    // Deliver what the scanner sent.
    if let Some(sent) = bus.last() {
        summarizer
            .process_message(&sent.bound_selector(), sent.payload.clone())
            .await?;
    }

    scanner.flush_exporter(None).await?;
    for span in exporter.finished_spans() {
        println!(
            "{:<16} trace={} span={} parent={:?} agent={}",
            span.name,
            span.context.trace_id,
            span.context.span_id,
            span.parent_id,
            span.attribute(telemetry::ATTR_AGENT_NAME).unwrap_or("-")
        );
    }

    for message in bus.raw_messages() {
        println!("{} -> {} bytes", message.bound_selector(), message.payload.len());
    }
    Ok(())
}
