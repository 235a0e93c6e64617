//! Traced agents
//!
//! A [`TracedAgent`] sends and receives messages over a [`MessageBus`] and
//! records one span per emit and per processed message. Telemetry is a side
//! channel: a failure to record or export a span is logged and never stops a
//! message from being delivered.

use crate::config::{AgentDefinition, AgentSettings};
use crate::error::{AgentBusError, ConfigError, MessageError, Result, SerializationError};
use crate::logging::{
    DeliveryStage, MessageEvent, MessageHandlerExceptionEvent, MessageKind, TelemetryDegradedEvent,
};
use crate::message::{Message, MessageBus, MessageIdentifier};
use crate::serialization::{JsonPayloadSerializer, PayloadSerializer};
use crate::store::{connect_store, PersistStore};
use crate::telemetry::{
    init_exporter, ActiveSpan, EnvelopeBuilder, InboundContextExtractor, SpanExporter, SpanRecorder,
    TraceContext,
};
use crate::topic::TopicSelector;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Application logic run for every inbound message
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, ctx: &AgentContext<'_>, message: Message) -> Result<()>;
}

/// Handed to a [`MessageProcessor`] while it handles one message.
///
/// Messages emitted through the context join the trace of the message being
/// processed, as children of its process span.
pub struct AgentContext<'a> {
    agent: &'a TracedAgent,
    parent: Option<TraceContext>,
}

impl<'a> AgentContext<'a> {
    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    /// Context of the process span, when tracing is enabled
    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.parent.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn PersistStore>> {
        self.agent.store()
    }

    pub async fn emit<T>(&self, selector: &str, message: &T) -> Result<MessageIdentifier>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = self.agent.serialize(message)?;
        self.agent.send(selector, payload, self.parent.as_ref()).await
    }

    pub async fn emit_raw(&self, selector: &str, payload: Bytes) -> Result<MessageIdentifier> {
        self.agent.send(selector, payload, self.parent.as_ref()).await
    }
}

/// Agent wired to a bus, an optional span exporter and an optional store
pub struct TracedAgent {
    definition: AgentDefinition,
    settings: AgentSettings,
    bus: Arc<dyn MessageBus>,
    processor: Option<Arc<dyn MessageProcessor>>,
    serializer: Arc<dyn PayloadSerializer>,
    recorder: Option<SpanRecorder>,
    envelopes: EnvelopeBuilder,
    extractor: InboundContextExtractor,
    store: Option<Arc<dyn PersistStore>>,
}

impl TracedAgent {
    pub fn builder(definition: AgentDefinition, settings: AgentSettings) -> TracedAgentBuilder {
        TracedAgentBuilder::new(definition, settings)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn tracing_enabled(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn recorder(&self) -> Option<&SpanRecorder> {
        self.recorder.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn PersistStore>> {
        self.store.as_ref()
    }

    /// Serializes `message` and sends it as a new request (a new trace when
    /// tracing is enabled).
    pub async fn emit<T>(&self, selector: &str, message: &T) -> Result<MessageIdentifier>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = self.serialize(message)?;
        self.send(selector, payload, None).await
    }

    /// Sends already serialized payload bytes as a new request.
    pub async fn emit_raw(&self, selector: &str, payload: Bytes) -> Result<MessageIdentifier> {
        self.send(selector, payload, None).await
    }

    fn serialize<T>(&self, message: &T) -> Result<Bytes>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(message).map_err(|e| {
            AgentBusError::Serialization(SerializationError::JsonSerialization {
                details: e.to_string(),
            })
        })?;
        self.serializer.serialize(&value)
    }

    async fn send(&self, selector: &str, payload: Bytes, parent: Option<&TraceContext>) -> Result<MessageIdentifier> {
        let selector = TopicSelector::new(selector)?;
        if !self.definition.out_selectors.is_empty() && !self.definition.may_emit(&selector) {
            return Err(AgentBusError::Message(MessageError::UndeclaredSelector {
                agent: self.definition.name.clone(),
                selector: selector.to_string(),
            }));
        }

        let envelope = self.envelopes.build(selector, payload, parent);
        let mut span = self.recorder.as_ref().and_then(|recorder| {
            let rendered = self.serializer.render(&envelope.payload);
            let span = recorder.start_emit(envelope.context, envelope.selector.as_str(), &rendered);
            self.keep_span(envelope.selector.as_str(), span)
        });

        let identifier = envelope.identifier.clone();
        let event = MessageEvent::new(
            self.name(),
            envelope.selector.as_str(),
            Some(identifier.to_string()),
            envelope.payload.len(),
            MessageKind::Emit,
            DeliveryStage::Send,
        );
        let bound = envelope.bound_selector().to_string();

        let sent = self.bus.send(envelope.into_bus_message()).await;
        if let Some(span) = span.as_mut() {
            self.close_span(&bound, span);
        }

        match sent {
            Ok(()) => {
                info!(target: crate::EVENT_LOGGER_NAME, "{}", event);
                Ok(identifier)
            }
            Err(e) => Err(AgentBusError::Message(MessageError::SendFailed {
                selector: bound,
                reason: e.to_string(),
            })),
        }
    }

    /// Handles one inbound message addressed to `bound_selector`
    /// (`<selector>.<identifier>`).
    ///
    /// A malformed identifier or selector only costs the trace link. The
    /// payload reaches the processor byte for byte. Processor errors are logged and returned
    /// after the process span is closed.
    pub async fn process_message(&self, bound_selector: &str, raw: Bytes) -> Result<()> {
        let inbound = self.extractor.extract(bound_selector);
        if let Err(e) = TopicSelector::new(inbound.base_selector.as_str()) {
            warn!(target: crate::TRACE_LOGGER_NAME, "{}", TelemetryDegradedEvent::new(bound_selector, &e));
        }

        let mut span = self.recorder.as_ref().and_then(|recorder| {
            let rendered = self.serializer.render(&raw);
            let span = recorder.start_process(&inbound, &rendered);
            self.keep_span(bound_selector, span)
        });

        info!(
            target: crate::EVENT_LOGGER_NAME,
            "{}",
            MessageEvent::new(
                self.name(),
                &inbound.base_selector,
                inbound.identifier.as_ref().map(|id| id.to_string()),
                raw.len(),
                MessageKind::Process,
                DeliveryStage::Deliver,
            )
        );

        let ctx = AgentContext {
            agent: self,
            parent: span.as_ref().map(|span| *span.context()),
        };
        let message = Message {
            selector: inbound.base_selector.clone(),
            identifier: inbound.identifier,
            data: raw,
        };

        let outcome = match &self.processor {
            Some(processor) => processor.process(&ctx, message).await,
            None => {
                debug!(agent = %self.name(), "no processor registered, message dropped");
                Ok(())
            }
        };

        if let Err(e) = &outcome {
            error!(
                target: crate::EVENT_LOGGER_NAME,
                "{}",
                MessageHandlerExceptionEvent::new(self.name(), &inbound.base_selector, e.to_string())
            );
        }
        if let Some(span) = span.as_mut() {
            self.close_span(bound_selector, span);
        }
        outcome
    }

    /// Waits until every span recorded so far reached the exporter's
    /// destination. Uses the configured timeout when `timeout` is `None`.
    pub async fn flush_exporter(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.recorder {
            Some(recorder) => {
                let timeout = timeout.unwrap_or_else(|| self.settings.telemetry.flush_timeout());
                recorder.exporter().flush(Some(timeout)).await
            }
            None => Ok(()),
        }
    }

    /// Flushes and stops the exporter.
    pub async fn shutdown(&self) -> Result<()> {
        match &self.recorder {
            Some(recorder) => recorder.exporter().shutdown().await,
            None => Ok(()),
        }
    }

    fn keep_span(&self, selector: &str, span: Result<ActiveSpan>) -> Option<ActiveSpan> {
        match span {
            Ok(span) => Some(span),
            Err(e) => {
                warn!(target: crate::TRACE_LOGGER_NAME, "{}", TelemetryDegradedEvent::new(selector, &e));
                None
            }
        }
    }

    fn close_span(&self, selector: &str, span: &mut ActiveSpan) {
        if let Err(e) = span.close() {
            warn!(target: crate::TRACE_LOGGER_NAME, "{}", TelemetryDegradedEvent::new(selector, &e));
        }
    }
}

impl fmt::Debug for TracedAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedAgent")
            .field("definition", &self.definition)
            .field("settings", &self.settings)
            .field("recorder", &self.recorder)
            .field("has_processor", &self.processor.is_some())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Builder for [`TracedAgent`]
pub struct TracedAgentBuilder {
    definition: AgentDefinition,
    settings: AgentSettings,
    bus: Option<Arc<dyn MessageBus>>,
    processor: Option<Arc<dyn MessageProcessor>>,
    serializer: Arc<dyn PayloadSerializer>,
    exporter: Option<Arc<dyn SpanExporter>>,
    persistence: bool,
}

impl TracedAgentBuilder {
    pub fn new(definition: AgentDefinition, settings: AgentSettings) -> Self {
        Self {
            definition,
            settings,
            bus: None,
            processor: None,
            serializer: Arc::new(JsonPayloadSerializer::new()),
            exporter: None,
            persistence: false,
        }
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Uses `exporter` instead of the one named by
    /// `tracing_collector_url`, and enables tracing.
    pub fn with_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Connects the store named by `store_url` at build time.
    pub fn with_persistence(mut self) -> Self {
        self.persistence = true;
        self
    }

    /// Validates the settings and connects every configured collaborator.
    /// Configuration problems surface here, not on the first message.
    pub fn build(self) -> Result<TracedAgent> {
        self.settings.validate()?;

        let bus = self.bus.ok_or_else(|| ConfigError::MissingRequired { key: "bus".to_string() })?;

        let exporter = match (self.exporter, &self.settings.tracing_collector_url) {
            (Some(exporter), _) => Some(exporter),
            (None, Some(url)) => Some(init_exporter(url, &self.settings.telemetry)?),
            (None, None) => None,
        };
        let recorder = exporter.map(|exporter| {
            SpanRecorder::new(
                self.definition.name.clone(),
                exporter,
                self.settings.telemetry.max_attribute_len,
            )
        });
        let envelopes = if recorder.is_some() {
            EnvelopeBuilder::traced()
        } else {
            EnvelopeBuilder::untraced()
        };

        let store = if self.persistence {
            Some(connect_store(&self.settings)?)
        } else {
            None
        };

        debug!(
            agent = %self.definition.name,
            tracing = recorder.is_some(),
            persistence = store.is_some(),
            "agent built"
        );

        Ok(TracedAgent {
            definition: self.definition,
            settings: self.settings,
            bus,
            processor: self.processor,
            serializer: self.serializer,
            recorder,
            envelopes,
            extractor: InboundContextExtractor::new(),
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InMemoryBus, MockMessageBus};
    use crate::telemetry::{InMemoryExporter, ATTR_MESSAGE_DATA};
    use serde_json::json;
    use std::sync::Mutex;

    fn definition() -> AgentDefinition {
        AgentDefinition::new("A").with_out_selector(TopicSelector::new("v3.report").unwrap())
    }

    fn traced_agent(bus: Arc<dyn MessageBus>) -> (TracedAgent, Arc<InMemoryExporter>) {
        let exporter = Arc::new(InMemoryExporter::new());
        let agent = TracedAgent::builder(definition(), AgentSettings::new("k"))
            .bus(bus)
            .with_exporter(exporter.clone())
            .build()
            .unwrap();
        (agent, exporter)
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageProcessor for Recording {
        async fn process(&self, _ctx: &AgentContext<'_>, message: Message) -> Result<()> {
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl MessageProcessor for Failing {
        async fn process(&self, _ctx: &AgentContext<'_>, _message: Message) -> Result<()> {
            Err(AgentBusError::other("boom"))
        }
    }

    #[tokio::test]
    async fn test_emit_sends_once_with_traced_key() {
        let mut bus = MockMessageBus::new();
        bus.expect_send()
            .withf(|message| message.key.group_count() == 7 && message.selector.as_str() == "v3.report.vulnerability")
            .times(1)
            .returning(|_| Ok(()));
        let (agent, exporter) = traced_agent(Arc::new(bus));

        agent.emit("v3.report.vulnerability", &json!({"title": "t"})).await.unwrap();
        agent.flush_exporter(None).await.unwrap();

        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "emit_message");
        assert_eq!(spans[0].attribute(ATTR_MESSAGE_DATA), Some(r#"{"title":"t"}"#));
    }

    #[tokio::test]
    async fn test_bus_failure_still_exports_span() {
        let mut bus = MockMessageBus::new();
        bus.expect_send()
            .times(1)
            .returning(|_| Err(AgentBusError::other("bus down")));
        let (agent, exporter) = traced_agent(Arc::new(bus));

        let err = agent.emit("v3.report.vulnerability", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentBusError::Message(MessageError::SendFailed { .. })));
        agent.flush_exporter(None).await.unwrap();
        assert_eq!(exporter.finished_spans().len(), 1);
    }

    #[tokio::test]
    async fn test_undeclared_selector_is_rejected() {
        let bus = InMemoryBus::new();
        let (agent, _exporter) = traced_agent(Arc::new(bus.clone()));

        let err = agent.emit("v3.asset.ip", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentBusError::Message(MessageError::UndeclaredSelector { .. })));
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_tracing_disabled_without_collector_url() {
        let bus = InMemoryBus::new();
        let agent = TracedAgent::builder(definition(), AgentSettings::new("k"))
            .bus(Arc::new(bus.clone()))
            .build()
            .unwrap();

        assert!(!agent.tracing_enabled());
        agent.emit("v3.report.vulnerability", &json!({})).await.unwrap();
        assert_eq!(bus.last().unwrap().key.group_count(), 5);
        agent.flush_exporter(None).await.unwrap();
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unserializable_message_is_a_serialization_error() {
        let bus = InMemoryBus::new();
        let agent = TracedAgent::builder(definition(), AgentSettings::new("k"))
            .bus(Arc::new(bus.clone()))
            .build()
            .unwrap();

        let mut keyed = std::collections::BTreeMap::new();
        keyed.insert((1u8, 2u8), "tuple keys have no JSON form");
        let err = agent.emit("v3.report.vulnerability", &keyed).await.unwrap_err();
        assert!(matches!(
            err,
            AgentBusError::Serialization(SerializationError::JsonSerialization { .. })
        ));
        assert!(bus.last().is_none());
    }

    #[tokio::test]
    async fn test_process_passes_payload_unchanged() {
        let processor = Arc::new(Recording::default());
        let exporter = Arc::new(InMemoryExporter::new());
        let agent = TracedAgent::builder(AgentDefinition::new("B"), AgentSettings::new("k"))
            .bus(Arc::new(InMemoryBus::new()))
            .processor(processor.clone())
            .with_exporter(exporter.clone())
            .build()
            .unwrap();

        let raw = Bytes::from(vec![b'x'; 3000]);
        agent
            .process_message("v3.report.vulnerability.0f0c4c1e-6bd0-4a34-9a3c-1a2b3c4d5e6f", raw.clone())
            .await
            .unwrap();

        let seen = processor.seen.lock().unwrap();
        assert_eq!(seen[0].data, raw);
        assert_eq!(seen[0].selector.as_str(), "v3.report.vulnerability");
        assert!(seen[0].identifier.is_some());
    }

    #[tokio::test]
    async fn test_processor_error_is_returned_and_span_closed() {
        let exporter = Arc::new(InMemoryExporter::new());
        let agent = TracedAgent::builder(AgentDefinition::new("B"), AgentSettings::new("k"))
            .bus(Arc::new(InMemoryBus::new()))
            .processor(Arc::new(Failing))
            .with_exporter(exporter.clone())
            .build()
            .unwrap();

        assert!(agent.process_message("v3.control.bad-id", Bytes::new()).await.is_err());
        agent.flush_exporter(None).await.unwrap();
        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_root());
    }

    #[test]
    fn test_build_fails_fast_on_bad_configuration() {
        let missing_bus = TracedAgent::builder(definition(), AgentSettings::new("k")).build();
        assert!(missing_bus.unwrap_err().is_configuration());

        let missing_store = TracedAgent::builder(definition(), AgentSettings::new("k"))
            .bus(Arc::new(InMemoryBus::new()))
            .with_persistence()
            .build();
        assert!(missing_store.unwrap_err().is_configuration());

        let bad_scheme = TracedAgent::builder(
            definition(),
            AgentSettings::new("k").with_tracing_collector_url("ftp://collector"),
        )
        .bus(Arc::new(InMemoryBus::new()))
        .build();
        assert!(bad_scheme.unwrap_err().is_configuration());
    }
}
