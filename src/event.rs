//! Change events and their delivery to listeners.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Column name to value mapping for one row image.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOperation,
    pub ts_ms: i64,
    pub before: Option<Row>,
    pub after: Option<Row>,
    pub source: SourceMetadata,
}

impl ChangeEvent {
    /// Builds an event, placing `row` in `before` for deletes and in
    /// `after` otherwise.
    pub fn from_row(
        table: impl Into<String>,
        op: ChangeOperation,
        row: Row,
        source: SourceMetadata,
    ) -> Self {
        let (before, after) = match op {
            ChangeOperation::Delete => (Some(row), None),
            ChangeOperation::Insert | ChangeOperation::Update => (None, Some(row)),
        };
        Self {
            table: table.into(),
            op,
            ts_ms: Utc::now().timestamp_millis(),
            before,
            after,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub version: String,
    pub connector: String,
    pub ts_ms: i64,
    pub db: Option<String>,
    /// Binlog `file:offset` or polling page; absent when not applicable
    pub position: Option<String>,
}

impl SourceMetadata {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            connector: connector.into(),
            ts_ms: Utc::now().timestamp_millis(),
            db: None,
            position: None,
        }
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }
}

/// Failure report delivered when an extraction run aborts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source: String,
    pub message: String,
    pub ts_ms: i64,
}

impl ErrorEvent {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            ts_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Receives change events from an extractor.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()>;

    async fn on_error(&self, event: &ErrorEvent) {
        warn!("Extraction error from {}: {}", event.source, event.message);
    }
}

/// Fans events out to registered listeners in registration order.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn ChangeListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers `event` to every listener; a failing listener does not
    /// stop delivery to the rest.
    pub async fn emit(&self, event: &ChangeEvent) {
        debug!("Dispatching {} on {}", event.op.as_str(), event.table);
        for listener in &self.listeners {
            if let Err(e) = listener.on_change(event).await {
                warn!("Listener failed on {} {}: {}", event.op.as_str(), event.table, e);
            }
        }
    }

    pub async fn emit_error(&self, event: &ErrorEvent) {
        for listener in &self.listeners {
            listener.on_error(event).await;
        }
    }
}

/// Logs every event at info level.
#[derive(Debug, Default)]
pub struct LoggingListener;

#[async_trait]
impl ChangeListener for LoggingListener {
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        info!(
            table = %event.table,
            op = event.op.as_str(),
            position = event.source.position.as_deref().unwrap_or(""),
            "Change captured"
        );
        Ok(())
    }
}

/// Writes each event as one JSON line to the wrapped writer.
pub struct JsonLinesListener<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesListener<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChangeListener for JsonLinesListener<W> {
    async fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn on_error(&self, event: &ErrorEvent) {
        let mut writer = self.writer.lock().await;
        let line = match serde_json::to_vec(&serde_json::json!({ "error": event })) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize error event: {}", e);
                return;
            }
        };
        if let Err(e) = writer.write_all(&line).await {
            warn!("Failed to write error event: {}", e);
            return;
        }
        let _ = writer.write_all(b"\n").await;
        let _ = writer.flush().await;
    }
}
