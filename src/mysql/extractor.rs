use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info};

use super::decoder::{BinlogDecoder, DecodedEvent, EventFramer};
use super::event::BinlogEvent;
use super::packet::{BinlogPacket, PacketFramer};
use super::rows::{RowImage, RowsEvent, RowsKind};
use crate::event::{ChangeEvent, ChangeOperation, ErrorEvent, EventDispatcher, Row, SourceMetadata};
use crate::{Error, Result};

const READ_CHUNK_SIZE: usize = 8192;
const CONNECTOR_NAME: &str = "mysql-binlog";

/// How the byte stream is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// A binlog file: magic header followed by raw events.
    File,
    /// `COM_BINLOG_DUMP` responses: one event per wire packet.
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BinlogPosition {
    pub file: String,
    pub offset: u64,
}

impl std::fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub events: u64,
    pub changes: u64,
}

enum Framer {
    File(EventFramer),
    Network(PacketFramer),
}

/// Turns a binlog byte stream into change events.
pub struct BinlogExtractor {
    decoder: BinlogDecoder,
    dispatcher: Arc<EventDispatcher>,
    position: BinlogPosition,
    format: StreamFormat,
    stats: ExtractStats,
}

impl BinlogExtractor {
    pub fn new(format: StreamFormat, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            decoder: BinlogDecoder::new(),
            dispatcher,
            position: BinlogPosition::default(),
            format,
            stats: ExtractStats::default(),
        }
    }

    /// Starts position tracking from a known file, e.g. the dump request's.
    pub fn with_position(mut self, file: impl Into<String>, offset: u64) -> Self {
        self.position = BinlogPosition {
            file: file.into(),
            offset,
        };
        self
    }

    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }

    pub fn stats(&self) -> ExtractStats {
        self.stats
    }

    /// Reads `reader` to its end (or to the server's EOF packet).
    ///
    /// Any decode failure is reported to the listeners as an error event
    /// and returned.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, reader: R) -> Result<ExtractStats> {
        match self.consume(reader).await {
            Ok(()) => {
                info!(
                    "Binlog stream finished at {}: {} events, {} changes",
                    self.position, self.stats.events, self.stats.changes
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!("Binlog extraction failed at {}: {}", self.position, e);
                self.dispatcher
                    .emit_error(&ErrorEvent::new(CONNECTOR_NAME, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn consume<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> Result<()> {
        let mut framer = match self.format {
            StreamFormat::File => Framer::File(EventFramer::for_file()),
            StreamFormat::Network => Framer::Network(PacketFramer::new()),
        };
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return match &framer {
                    Framer::File(f) => f.finish(),
                    Framer::Network(f) if f.buffered() > 0 => Err(Error::TruncatedStream {
                        needed: f.buffered() + 1,
                        available: f.buffered(),
                    }),
                    Framer::Network(_) => Ok(()),
                };
            }

            match &mut framer {
                Framer::File(f) => {
                    f.feed(&chunk[..n]);
                    while let Some(event) = f.next_event()? {
                        self.handle_event(&event).await?;
                    }
                }
                Framer::Network(f) => {
                    f.feed(&chunk[..n]);
                    while let Some(packet) = f.next_packet()? {
                        match BinlogPacket::parse(&packet)? {
                            BinlogPacket::Event(event) => self.handle_event(&event).await?,
                            BinlogPacket::Eof => {
                                debug!("Server sent EOF");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, data: &[u8]) -> Result<()> {
        let DecodedEvent { header, event } = self.decoder.decode(data)?;
        self.stats.events += 1;

        match &event {
            BinlogEvent::Rotate(rotate) => {
                info!("Rotating to {}:{}", rotate.next_binlog, rotate.position);
                self.position = BinlogPosition {
                    file: rotate.next_binlog.clone(),
                    offset: rotate.position,
                };
                return Ok(());
            }
            BinlogEvent::Rows(rows) => self.dispatch_rows(rows).await?,
            _ => {}
        }

        if header.next_position > 0 {
            self.position.offset = header.next_position as u64;
        }
        Ok(())
    }

    async fn dispatch_rows(&mut self, rows: &RowsEvent) -> Result<()> {
        let table = self
            .decoder
            .table(rows.table_id)
            .ok_or(Error::UnknownTable(rows.table_id))?;
        let (schema, table_name) = (table.schema.clone(), table.table.clone());
        let op = match rows.kind {
            RowsKind::Write => ChangeOperation::Insert,
            RowsKind::Update => ChangeOperation::Update,
            RowsKind::Delete => ChangeOperation::Delete,
        };

        for change in &rows.rows {
            let source = SourceMetadata::new(CONNECTOR_NAME)
                .with_db(schema.clone())
                .with_position(self.position.to_string());
            let mut event = ChangeEvent::from_row(table_name.clone(), op, Row::new(), source);
            event.before = change.before.as_ref().map(image_to_row);
            event.after = change.after.as_ref().map(image_to_row);
            self.dispatcher.emit(&event).await;
            self.stats.changes += 1;
        }
        Ok(())
    }
}

/// Names columns positionally (`@1`, `@2`, ...); absent columns are skipped.
fn image_to_row(image: &RowImage) -> Row {
    image
        .iter()
        .enumerate()
        .filter_map(|(i, value)| {
            value
                .as_ref()
                .map(|v| (format!("@{}", i + 1), v.to_json()))
        })
        .collect()
}
