//! MySQL packet framing.
//!
//! Every packet on the wire is `[length: 3 LE][sequence: 1][body: length]`.
//! [`PacketFramer`] accepts arbitrary chunks from a non-seekable stream and
//! only hands out a packet once its whole body has arrived.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use super::io::{BinlogReader, BinlogWriter};
use crate::{Error, Result};

pub const PACKET_HEADER_SIZE: usize = 4;
pub const MAX_PACKET_SIZE: usize = 16_777_215;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub length: usize,
    pub sequence: u8,
    pub body: Bytes,
}

impl Packet {
    pub fn new(sequence: u8, body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        if body.len() > MAX_PACKET_SIZE {
            return Err(Error::InvalidMessage {
                message: format!("Packet too large: {} bytes", body.len()),
            });
        }
        Ok(Self {
            length: body.len(),
            sequence,
            body,
        })
    }

    /// Parses one complete packet; the buffer must hold exactly one.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = BinlogReader::new(data);
        let length = reader.read_int(3)? as usize;
        let sequence = reader.read_u8()?;
        let body = Bytes::copy_from_slice(reader.read_bytes(length)?);
        reader.finish("packet")?;
        Ok(Self {
            length,
            sequence,
            body,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut w = BinlogWriter::with_capacity(PACKET_HEADER_SIZE + self.body.len());
        w.write_int(self.length as u64, 3);
        w.write_u8(self.sequence);
        w.write_bytes(&self.body);
        w.freeze()
    }
}

/// Reassembles packets from partial deliveries.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: BytesMut,
    expected_sequence: Option<u8>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next whole packet, or `None` until more bytes arrive.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.buffer.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let length = (self.buffer[0] as usize)
            | ((self.buffer[1] as usize) << 8)
            | ((self.buffer[2] as usize) << 16);
        if self.buffer.len() < PACKET_HEADER_SIZE + length {
            return Ok(None);
        }

        let sequence = self.buffer[3];
        if let Some(expected) = self.expected_sequence {
            if sequence != expected {
                return Err(Error::InvalidMessage {
                    message: format!(
                        "Packet sequence out of order: expected {}, got {}",
                        expected, sequence
                    ),
                });
            }
        }
        self.expected_sequence = Some(sequence.wrapping_add(1));

        self.buffer.advance(PACKET_HEADER_SIZE);
        let body = self.buffer.split_to(length).freeze();
        trace!("Framed packet seq={} len={}", sequence, length);

        Ok(Some(Packet {
            length,
            sequence,
            body,
        }))
    }

    /// Forgets the sequence counter, e.g. when a new command starts.
    pub fn reset_sequence(&mut self) {
        self.expected_sequence = None;
    }
}

/// Payload carried by one packet of a `COM_BINLOG_DUMP` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinlogPacket {
    /// An OK-prefixed packet holding one binlog event.
    Event(Bytes),
    /// End of the stream (non-blocking dump finished).
    Eof,
}

impl BinlogPacket {
    pub fn parse(packet: &Packet) -> Result<Self> {
        let mut reader = BinlogReader::new(&packet.body);
        match reader.read_u8()? {
            0x00 => Ok(BinlogPacket::Event(packet.body.slice(1..))),
            0xFE if packet.length < 9 => Ok(BinlogPacket::Eof),
            0xFF => {
                let code = reader.read_u16()?;
                let rest = reader.read_rest();
                // Protocol 4.1 error packets carry '#' + 5 byte SQL state
                let message = if rest.first() == Some(&b'#') && rest.len() >= 6 {
                    &rest[6..]
                } else {
                    rest
                };
                Err(Error::Server {
                    code,
                    message: String::from_utf8_lossy(message).into_owned(),
                })
            }
            other => Err(Error::InvalidMessage {
                message: format!("Unexpected binlog packet status: {:#04x}", other),
            }),
        }
    }
}

/// Text protocol result set row: one length-coded string per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetRowPacket {
    pub sequence: u8,
    pub columns: Vec<Option<String>>,
}

impl ResultSetRowPacket {
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let mut reader = BinlogReader::new(&packet.body);
        let mut columns = Vec::new();
        while !reader.is_empty() {
            columns.push(reader.read_lenenc_string()?);
        }
        Ok(Self {
            sequence: packet.sequence,
            columns,
        })
    }

    pub fn packet_body(&self) -> Bytes {
        let mut w = BinlogWriter::with_capacity(1024);
        for column in &self.columns {
            w.write_lenenc_string(column.as_deref());
        }
        w.freeze()
    }

    pub fn to_packet(&self) -> Result<Packet> {
        Packet::new(self.sequence, self.packet_body())
    }
}
