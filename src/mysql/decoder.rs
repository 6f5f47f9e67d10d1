//! Stateful binlog event decoding.
//!
//! [`BinlogDecoder`] remembers what earlier events told it: the checksum
//! algorithm announced by the format description and every table map seen,
//! which row events need to interpret their column images.

use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace};

use super::event::{BinlogEvent, FormatDescriptionEvent, CHECKSUM_LENGTH};
use super::header::{EventHeader, EventType};
use super::io::{BinlogReader, BinlogWriter};
use super::rows::TableMapEvent;
use crate::{Error, Result};

/// Every binlog file starts with these four bytes.
pub const BINLOG_MAGIC: [u8; 4] = [0xFE, b'b', b'i', b'n'];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    pub header: EventHeader,
    pub event: BinlogEvent,
}

#[derive(Debug, Default)]
pub struct BinlogDecoder {
    tables: HashMap<u64, TableMapEvent>,
    format: Option<FormatDescriptionEvent>,
    checksum: bool,
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one complete event: header, body and optional checksum.
    pub fn decode(&mut self, data: &[u8]) -> Result<DecodedEvent> {
        let mut reader = BinlogReader::new(data);
        let header = EventHeader::decode(&mut reader)?;

        let event_length = header.event_length as usize;
        if data.len() < event_length {
            return Err(Error::TruncatedStream {
                needed: event_length,
                available: data.len(),
            });
        }
        if data.len() > event_length {
            return Err(Error::TrailingBytes {
                context: "binlog event",
                remaining: data.len() - event_length,
            });
        }

        let mut body = &data[EventHeader::SIZE..event_length];
        let strip = match header.event_type {
            EventType::FormatDescription => FormatDescriptionEvent::body_has_checksum_field(body),
            _ => self.checksum,
        };
        if strip {
            if body.len() < CHECKSUM_LENGTH {
                return Err(Error::TruncatedStream {
                    needed: CHECKSUM_LENGTH,
                    available: body.len(),
                });
            }
            // Checksums are not verified
            body = &body[..body.len() - CHECKSUM_LENGTH];
        }

        let event = BinlogEvent::decode_body(header.event_type, body, &self.tables)?;
        trace!("Decoded {:?} at position {}", header.event_type, header.position());

        match &event {
            BinlogEvent::FormatDescription(fde) => {
                self.checksum = fde.has_crc32();
                debug!(
                    "Format description: server {} binlog v{} checksum={}",
                    fde.server_version, fde.binlog_version, self.checksum
                );
                self.format = Some(fde.clone());
            }
            BinlogEvent::TableMap(map) => {
                self.tables.insert(map.table_id, map.clone());
            }
            _ => {}
        }

        Ok(DecodedEvent { header, event })
    }

    pub fn table(&self, table_id: u64) -> Option<&TableMapEvent> {
        self.tables.get(&table_id)
    }

    pub fn format(&self) -> Option<&FormatDescriptionEvent> {
        self.format.as_ref()
    }

    pub fn checksum_enabled(&self) -> bool {
        self.checksum
    }
}

/// Serializes a non-row event behind `header`, fixing up `event_length`.
///
/// Returns `None` for table map and row events, which are decode-only.
/// No checksum trailer is written.
pub fn encode_event(header: &EventHeader, event: &BinlogEvent) -> Result<Option<Bytes>> {
    let Some(body) = event.encode_body()? else {
        return Ok(None);
    };
    let mut header = header.clone();
    header.event_length = (EventHeader::SIZE + body.len()) as u32;

    let mut w = BinlogWriter::with_capacity(header.event_length as usize);
    header.encode(&mut w);
    w.write_bytes(&body);
    Ok(Some(w.freeze()))
}

/// Splits a binlog file byte stream into whole events.
///
/// Bytes may arrive in arbitrary chunks; an event is only released once
/// `event_length` bytes are buffered.
#[derive(Debug)]
pub struct EventFramer {
    buffer: BytesMut,
    expect_magic: bool,
}

impl EventFramer {
    /// Framer for a file that still begins with the magic header.
    pub fn for_file() -> Self {
        Self {
            buffer: BytesMut::new(),
            expect_magic: true,
        }
    }

    /// Framer for a stream that starts directly at an event.
    pub fn for_events() -> Self {
        Self {
            buffer: BytesMut::new(),
            expect_magic: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_event(&mut self) -> Result<Option<Bytes>> {
        if self.expect_magic {
            if self.buffer.len() < BINLOG_MAGIC.len() {
                return Ok(None);
            }
            if self.buffer[..BINLOG_MAGIC.len()] != BINLOG_MAGIC {
                return Err(Error::InvalidMessage {
                    message: "Stream does not start with the binlog magic".to_string(),
                });
            }
            self.buffer.advance(BINLOG_MAGIC.len());
            self.expect_magic = false;
        }

        if self.buffer.len() < EventHeader::SIZE {
            return Ok(None);
        }
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&self.buffer[9..13]);
        let event_length = u32::from_le_bytes(length_bytes) as usize;
        if event_length < EventHeader::SIZE {
            return Err(Error::InvalidMessage {
                message: format!("Event length {} shorter than its header", event_length),
            });
        }
        if self.buffer.len() < event_length {
            return Ok(None);
        }
        Ok(Some(self.buffer.split_to(event_length).freeze()))
    }

    /// Call at end of input; leftover bytes mean the last event was cut off.
    pub fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let needed = if self.expect_magic {
            BINLOG_MAGIC.len()
        } else if self.buffer.len() < EventHeader::SIZE {
            EventHeader::SIZE
        } else {
            let mut length_bytes = [0u8; 4];
            length_bytes.copy_from_slice(&self.buffer[9..13]);
            u32::from_le_bytes(length_bytes) as usize
        };
        Err(Error::TruncatedStream {
            needed,
            available: self.buffer.len(),
        })
    }
}
