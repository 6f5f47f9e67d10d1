use serde::Serialize;

use super::io::{BinlogReader, BinlogWriter};
use crate::{Error, Result};

/// Binlog event type codes understood by the decoder.
///
/// The catalog is closed: a code without a variant is rejected with
/// [`Error::UnknownEventType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EventType {
    Query = 2,
    Stop = 3,
    Rotate = 4,
    Intvar = 5,
    Rand = 13,
    FormatDescription = 15,
    Xid = 16,
    TableMap = 19,
    WriteRowsV1 = 23,
    UpdateRowsV1 = 24,
    DeleteRowsV1 = 25,
    Incident = 26,
    Heartbeat = 27,
    RowsQuery = 29,
    WriteRowsV2 = 30,
    UpdateRowsV2 = 31,
    DeleteRowsV2 = 32,
    Gtid = 33,
    AnonymousGtid = 34,
    PreviousGtids = 35,
}

impl EventType {
    pub fn from_code(code: u8) -> Result<Self> {
        let event_type = match code {
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            5 => EventType::Intvar,
            13 => EventType::Rand,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            26 => EventType::Incident,
            27 => EventType::Heartbeat,
            29 => EventType::RowsQuery,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => return Err(Error::UnknownEventType(other)),
        };
        Ok(event_type)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_rows_v2(self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV2 | EventType::UpdateRowsV2 | EventType::DeleteRowsV2
        )
    }
}

/// Binlog v4 event header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    /// Length of the whole event, header and checksum included
    pub event_length: u32,
    /// Offset of the next event in the binlog file
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn decode(reader: &mut BinlogReader<'_>) -> Result<Self> {
        let timestamp = reader.read_u32()?;
        let event_type = EventType::from_code(reader.read_u8()?)?;
        let server_id = reader.read_u32()?;
        let event_length = reader.read_u32()?;
        let next_position = reader.read_u32()?;
        let flags = reader.read_u16()?;

        if (event_length as usize) < Self::SIZE {
            return Err(Error::InvalidMessage {
                message: format!("Event length {} shorter than its header", event_length),
            });
        }

        Ok(Self {
            timestamp,
            event_type,
            server_id,
            event_length,
            next_position,
            flags,
        })
    }

    pub fn encode(&self, w: &mut BinlogWriter) {
        w.write_u32(self.timestamp);
        w.write_u8(self.event_type.code());
        w.write_u32(self.server_id);
        w.write_u32(self.event_length);
        w.write_u32(self.next_position);
        w.write_u16(self.flags);
    }

    /// Position of this event in its binlog file.
    pub fn position(&self) -> u32 {
        self.next_position.saturating_sub(self.event_length)
    }
}
