//! Span exporters
//!
//! `export` only enqueues; `flush` is the barrier. Once a flush returns `Ok`,
//! every span exported before the call is fully written at the destination.

use super::span::SpanRecord;
use crate::config::TelemetryConfig;
use crate::error::{AgentBusError, ConfigError, ExportError, Result, RuntimeError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use url::Url;

/// Destination for finished spans
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Queues a finished span. Never blocks on the destination.
    fn export(&self, span: SpanRecord) -> Result<()>;

    /// Waits until every previously exported span is visible at the
    /// destination, or until `timeout` elapses.
    async fn flush(&self, timeout: Option<Duration>) -> Result<()>;

    /// Flushes what is pending and stops accepting spans.
    async fn shutdown(&self) -> Result<()>;

    /// Human-readable destination, used in logs and errors
    fn destination(&self) -> String;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps spans in memory; flushed spans become visible through
/// [`InMemoryExporter::finished_spans`].
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    pending: Mutex<Vec<SpanRecord>>,
    finished: Mutex<Vec<SpanRecord>>,
    closed: Mutex<bool>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Removes and returns spans that were exported but not yet flushed.
    pub fn take_pending(&self) -> Vec<SpanRecord> {
        std::mem::take(&mut *lock(&self.pending))
    }

    pub fn finished_spans(&self) -> Vec<SpanRecord> {
        lock(&self.finished).clone()
    }

    pub fn clear(&self) {
        lock(&self.pending).clear();
        lock(&self.finished).clear();
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    fn export(&self, span: SpanRecord) -> Result<()> {
        if *lock(&self.closed) {
            return Err(ExportError::Closed.into());
        }
        lock(&self.pending).push(span);
        Ok(())
    }

    async fn flush(&self, _timeout: Option<Duration>) -> Result<()> {
        // Both locks are held so a concurrent flush cannot observe a gap.
        let mut pending = lock(&self.pending);
        let mut finished = lock(&self.finished);
        finished.append(&mut pending);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.flush(None).await?;
        *lock(&self.closed) = true;
        Ok(())
    }

    fn destination(&self) -> String {
        "memory://".to_string()
    }
}

/// Writes a batch of spans durably to one destination
#[async_trait]
pub trait SpanWriter: Send {
    async fn write_batch(&mut self, spans: &[SpanRecord]) -> Result<()>;

    fn destination(&self) -> String;
}

enum Command {
    Export(SpanRecord),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Feeds spans to a background writer task, batching up to
/// `max_batch_size` spans between writes.
pub struct BatchExporter {
    sender: mpsc::UnboundedSender<Command>,
    destination: String,
}

impl BatchExporter {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(writer: Box<dyn SpanWriter>, max_batch_size: usize) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| AgentBusError::Runtime(RuntimeError::NotInitialized))?;
        let destination = writer.destination();
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_writer(writer, receiver, max_batch_size.max(1)));
        debug!(destination = %destination, "span exporter started");
        Ok(Self {
            sender,
            destination,
        })
    }

    async fn request(&self, command: fn(oneshot::Sender<Result<()>>) -> Command, timeout: Option<Duration>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .map_err(|_| AgentBusError::Export(ExportError::Closed))?;

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, response).await.map_err(|_| {
                AgentBusError::Export(ExportError::FlushTimeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            })?,
            None => response.await,
        };
        outcome.map_err(|_| AgentBusError::Export(ExportError::Closed))?
    }
}

impl fmt::Debug for BatchExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExporter")
            .field("destination", &self.destination)
            .finish()
    }
}

#[async_trait]
impl SpanExporter for BatchExporter {
    fn export(&self, span: SpanRecord) -> Result<()> {
        self.sender
            .send(Command::Export(span))
            .map_err(|_| AgentBusError::Export(ExportError::Closed))
    }

    async fn flush(&self, timeout: Option<Duration>) -> Result<()> {
        self.request(Command::Flush, timeout).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown, None).await
    }

    fn destination(&self) -> String {
        self.destination.clone()
    }
}

async fn write_pending(writer: &mut dyn SpanWriter, pending: &mut Vec<SpanRecord>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    writer.write_batch(pending).await?;
    pending.clear();
    Ok(())
}

/// Batches of spans kept in memory while the destination refuses writes
const RETAINED_BATCHES: usize = 4;

// Commands are handled in channel order, so a flush is answered only after
// every export sent before it has been written. After a failed write, spans
// are only retried by the next flush and the oldest ones are dropped once
// RETAINED_BATCHES batches are waiting.
async fn run_writer(
    mut writer: Box<dyn SpanWriter>,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    max_batch_size: usize,
) {
    let retain_limit = max_batch_size.saturating_mul(RETAINED_BATCHES);
    let mut pending = Vec::with_capacity(max_batch_size);
    let mut write_failed = false;
    let mut dropped = 0usize;
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Export(span) => {
                pending.push(span);
                if pending.len() > retain_limit {
                    let excess = pending.len() - retain_limit;
                    pending.drain(..excess);
                    if dropped == 0 {
                        warn!(
                            destination = %writer.destination(),
                            retained = retain_limit,
                            "span buffer full, dropping oldest spans"
                        );
                    }
                    dropped += excess;
                }
                if !write_failed && pending.len() >= max_batch_size {
                    if let Err(e) = write_pending(writer.as_mut(), &mut pending).await {
                        write_failed = true;
                        warn!(
                            destination = %writer.destination(),
                            pending = pending.len(),
                            "batch write failed, retrying at the next flush: {}",
                            e
                        );
                    }
                }
            }
            Command::Flush(reply) => {
                report_dropped(writer.as_ref(), &mut dropped);
                let result = write_pending(writer.as_mut(), &mut pending).await;
                write_failed = result.is_err();
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                report_dropped(writer.as_ref(), &mut dropped);
                let result = write_pending(writer.as_mut(), &mut pending).await;
                let _ = reply.send(result);
                break;
            }
        }
    }
    debug!(destination = %writer.destination(), "span exporter stopped");
}

fn report_dropped(writer: &dyn SpanWriter, dropped: &mut usize) {
    if *dropped > 0 {
        warn!(destination = %writer.destination(), dropped = *dropped, "spans dropped while the destination was failing");
        *dropped = 0;
    }
}

/// Appends one JSON document per line to a local file
pub struct FileSpanWriter {
    path: PathBuf,
    file: tokio::fs::File,
}

impl FileSpanWriter {
    /// Opens (creating if needed) the file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AgentBusError::Config(ConfigError::InvalidValue {
                    key: "tracing_collector_url".to_string(),
                    value: path.display().to_string(),
                    expected: format!("a writable file path ({})", e),
                })
            })?;
        Ok(Self {
            path,
            file: tokio::fs::File::from_std(file),
        })
    }
}

#[async_trait]
impl SpanWriter for FileSpanWriter {
    async fn write_batch(&mut self, spans: &[SpanRecord]) -> Result<()> {
        let mut buffer = Vec::new();
        for span in spans {
            serde_json::to_writer(&mut buffer, span)?;
            buffer.push(b'\n');
        }
        self.file.write_all(&buffer).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    fn destination(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

/// Posts span batches as JSON to a collector endpoint
#[cfg(feature = "http")]
pub struct CollectorSpanWriter {
    client: reqwest::Client,
    endpoint: Url,
    request_timeout: Duration,
}

#[cfg(feature = "http")]
impl CollectorSpanWriter {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            request_timeout,
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl SpanWriter for CollectorSpanWriter {
    async fn write_batch(&mut self, spans: &[SpanRecord]) -> Result<()> {
        let body = serde_json::json!({ "spans": spans });
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExportError::WriteFailed {
                destination: self.endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExportError::WriteFailed {
                destination: self.endpoint.to_string(),
                reason: format!("collector returned {}", response.status()),
            }
            .into());
        }
        debug!(endpoint = %self.endpoint, count = spans.len(), "spans sent to collector");
        Ok(())
    }

    fn destination(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Builds the exporter selected by `url`.
///
/// `file://<absolute path>` appends JSON lines, `http(s)://` posts to a
/// collector (feature `http`), `memory://` keeps spans in process.
pub fn init_exporter(url: &str, config: &TelemetryConfig) -> Result<Arc<dyn SpanExporter>> {
    let parsed = Url::parse(url).map_err(|e| {
        AgentBusError::Config(ConfigError::InvalidValue {
            key: "tracing_collector_url".to_string(),
            value: url.to_string(),
            expected: format!("a URL ({})", e),
        })
    })?;

    match parsed.scheme() {
        "file" => {
            let path = parsed.to_file_path().map_err(|_| {
                AgentBusError::Config(ConfigError::InvalidValue {
                    key: "tracing_collector_url".to_string(),
                    value: url.to_string(),
                    expected: "file://<absolute path>".to_string(),
                })
            })?;
            let writer = FileSpanWriter::open(path)?;
            Ok(Arc::new(BatchExporter::spawn(Box::new(writer), config.max_batch_size)?))
        }
        #[cfg(feature = "http")]
        "http" | "https" => {
            let writer = CollectorSpanWriter::new(parsed, config.flush_timeout());
            Ok(Arc::new(BatchExporter::spawn(Box::new(writer), config.max_batch_size)?))
        }
        "memory" => Ok(Arc::new(InMemoryExporter::new())),
        other => Err(AgentBusError::Config(ConfigError::UnsupportedScheme {
            key: "tracing_collector_url".to_string(),
            scheme: other.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::TraceContext;
    use crate::telemetry::span::{SpanContextRecord, SpanKind};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str) -> SpanRecord {
        let ctx = TraceContext::new_root();
        SpanRecord {
            name: name.to_string(),
            kind: SpanKind::Internal,
            context: SpanContextRecord {
                trace_id: ctx.trace_id,
                span_id: ctx.span_id,
            },
            parent_id: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    fn read_records(path: &Path) -> Vec<SpanRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Never finishes a write, to exercise the flush timeout.
    struct StalledWriter;

    #[async_trait]
    impl SpanWriter for StalledWriter {
        async fn write_batch(&mut self, _spans: &[SpanRecord]) -> Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        fn destination(&self) -> String {
            "stalled://".to_string()
        }
    }

    /// Rejects every batch and remembers how often and how much it was asked to write.
    #[derive(Clone, Default)]
    struct FailingWriter {
        attempts: Arc<AtomicUsize>,
        largest_batch: Arc<AtomicUsize>,
        spans_written: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpanWriter for FailingWriter {
        async fn write_batch(&mut self, spans: &[SpanRecord]) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.largest_batch.fetch_max(spans.len(), Ordering::SeqCst);
            self.spans_written.fetch_add(spans.len(), Ordering::SeqCst);
            Err(AgentBusError::Export(ExportError::WriteFailed {
                destination: self.destination(),
                reason: "collector down".to_string(),
            }))
        }

        fn destination(&self) -> String {
            "failing://".to_string()
        }
    }

    #[tokio::test]
    async fn test_in_memory_flush_moves_pending() {
        let exporter = InMemoryExporter::new();
        exporter.export(record("a")).unwrap();
        exporter.export(record("b")).unwrap();
        assert!(exporter.finished_spans().is_empty());

        exporter.flush(None).await.unwrap();
        let names: Vec<_> = exporter.finished_spans().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(exporter.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_after_shutdown() {
        let exporter = InMemoryExporter::new();
        exporter.export(record("a")).unwrap();
        exporter.shutdown().await.unwrap();
        assert_eq!(exporter.finished_spans().len(), 1);
        assert!(exporter.export(record("b")).is_err());
    }

    #[tokio::test]
    async fn test_file_exporter_flush_is_a_barrier() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = FileSpanWriter::open(file.path()).unwrap();
        let exporter = BatchExporter::spawn(Box::new(writer), 512).unwrap();

        for i in 0..10 {
            exporter.export(record(&format!("span-{}", i))).unwrap();
        }
        exporter.flush(Some(Duration::from_secs(5))).await.unwrap();

        let records = read_records(file.path());
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].name, "span-0");
        assert_eq!(records[9].name, "span-9");
    }

    #[tokio::test]
    async fn test_file_exporter_writes_full_batches_early() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = FileSpanWriter::open(file.path()).unwrap();
        let exporter = BatchExporter::spawn(Box::new(writer), 2).unwrap();

        exporter.export(record("a")).unwrap();
        exporter.export(record("b")).unwrap();
        exporter.export(record("c")).unwrap();
        exporter.flush(None).await.unwrap();

        assert_eq!(read_records(file.path()).len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_exports_are_not_lost_or_duplicated() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = FileSpanWriter::open(file.path()).unwrap();
        let exporter: Arc<dyn SpanExporter> =
            Arc::new(BatchExporter::spawn(Box::new(writer), 16).unwrap());

        let mut tasks = Vec::new();
        for replica in 0..8 {
            let exporter = exporter.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    exporter.export(record(&format!("{}-{}", replica, i))).unwrap();
                }
                exporter.flush(Some(Duration::from_secs(5))).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut names: Vec<_> = read_records(file.path()).into_iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 200);
    }

    #[tokio::test]
    async fn test_failing_destination_keeps_buffer_bounded() {
        let writer = FailingWriter::default();
        let exporter = BatchExporter::spawn(Box::new(writer.clone()), 2).unwrap();

        for i in 0..1000 {
            exporter.export(record(&format!("span-{}", i))).unwrap();
        }
        assert!(exporter.flush(Some(Duration::from_secs(5))).await.is_err());

        // One failed size-triggered write, then the flush.
        assert_eq!(writer.attempts.load(Ordering::SeqCst), 2);
        assert!(writer.largest_batch.load(Ordering::SeqCst) <= 2 * RETAINED_BATCHES);
        assert!(writer.spans_written.load(Ordering::SeqCst) <= 2 + 2 * RETAINED_BATCHES);

        // A failed flush keeps size-triggered writes off until the next flush.
        exporter.export(record("late")).unwrap();
        exporter.export(record("later")).unwrap();
        assert!(exporter.flush(Some(Duration::from_secs(5))).await.is_err());
        assert_eq!(writer.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_flush_timeout_is_recoverable() {
        let exporter = BatchExporter::spawn(Box::new(StalledWriter), 512).unwrap();
        exporter.export(record("stuck")).unwrap();

        let err = exporter.flush(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(err.is_flush_timeout());
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_export_after_shutdown_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = FileSpanWriter::open(file.path()).unwrap();
        let exporter = BatchExporter::spawn(Box::new(writer), 512).unwrap();
        exporter.export(record("last")).unwrap();
        exporter.shutdown().await.unwrap();

        assert_eq!(read_records(file.path()).len(), 1);
        // The worker exits after shutdown; give it a moment to drop the receiver.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(exporter.export(record("late")).is_err());
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = FileSpanWriter::open(file.path()).unwrap();
        let err = BatchExporter::spawn(Box::new(writer), 1).unwrap_err();
        assert!(matches!(err, AgentBusError::Runtime(RuntimeError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_init_exporter_selects_by_scheme() {
        let config = TelemetryConfig::default();
        let file = tempfile::NamedTempFile::new().unwrap();
        let url = format!("file://{}", file.path().display());

        let exporter = init_exporter(&url, &config).unwrap();
        assert!(exporter.destination().starts_with("file://"));
        assert_eq!(init_exporter("memory://", &config).unwrap().destination(), "memory://");
    }

    #[tokio::test]
    async fn test_init_exporter_rejects_bad_urls() {
        let config = TelemetryConfig::default();
        assert!(init_exporter("not a url", &config).err().unwrap().is_configuration());
        assert!(init_exporter("ftp://example.com/spans", &config).err().unwrap().is_configuration());
    }
}
