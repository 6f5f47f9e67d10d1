//! Typed binlog event bodies.
//!
//! Each body struct decodes from, and where the protocol allows encodes
//! back to, the bytes that follow the 19-byte event header (checksum
//! already removed). Fixed-layout bodies must be consumed exactly.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

use super::header::EventType;
use super::io::{BinlogReader, BinlogWriter};
use super::rows::{RowsEvent, TableMapEvent};
use super::status::StatusVariable;
use crate::{Error, Result};

pub const SERVER_VERSION_LENGTH: usize = 50;
pub const CHECKSUM_ALG_OFF: u8 = 0;
pub const CHECKSUM_ALG_CRC32: u8 = 1;
pub const CHECKSUM_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    pub status_vars: Vec<StatusVariable>,
    pub schema: String,
    pub query: String,
}

impl QueryEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let thread_id = r.read_u32()?;
        let exec_time = r.read_u32()?;
        let schema_len = r.read_u8()? as usize;
        let error_code = r.read_u16()?;
        let status_len = r.read_u16()? as usize;
        let status_vars = StatusVariable::decode_block(r.read_bytes(status_len)?)?;
        let schema = r.read_fixed_string(schema_len)?;
        if r.read_u8()? != 0 {
            return Err(Error::InvalidMessage {
                message: "Query event schema missing NUL terminator".to_string(),
            });
        }
        let query = String::from_utf8_lossy(r.read_rest()).into_owned();
        Ok(Self {
            thread_id,
            exec_time,
            error_code,
            status_vars,
            schema,
            query,
        })
    }

    pub fn encode(&self, w: &mut BinlogWriter) -> Result<()> {
        let status = StatusVariable::encode_block(&self.status_vars)?;
        let status_len = u16::try_from(status.len()).map_err(|_| Error::InvalidMessage {
            message: format!("Status block of {} bytes too long", status.len()),
        })?;
        w.write_u32(self.thread_id);
        w.write_u32(self.exec_time);
        w.write_u8_len(self.schema.len(), "schema")?;
        w.write_u16(self.error_code);
        w.write_u16(status_len);
        w.write_bytes(&status);
        w.write_nul_string(&self.schema);
        w.write_bytes(self.query.as_bytes());
        Ok(())
    }

    pub fn is_transaction_begin(&self) -> bool {
        self.query.eq_ignore_ascii_case("BEGIN")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotateEvent {
    pub position: u64,
    pub next_binlog: String,
}

impl RotateEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let position = r.read_u64()?;
        let next_binlog = String::from_utf8_lossy(r.read_rest()).into_owned();
        Ok(Self {
            position,
            next_binlog,
        })
    }

    pub fn encode(&self, w: &mut BinlogWriter) {
        w.write_u64(self.position);
        w.write_bytes(self.next_binlog.as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntvarEvent {
    /// 1 = LAST_INSERT_ID, 2 = INSERT_ID
    pub kind: u8,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RandEvent {
    pub seed1: u64,
    pub seed2: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XidEvent {
    pub xid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    pub post_header_lengths: Vec<u8>,
    /// Present for servers that write checksum algorithm descriptors
    pub checksum_alg: Option<u8>,
}

impl FormatDescriptionEvent {
    const FIXED_LENGTH: usize = 2 + SERVER_VERSION_LENGTH + 4 + 1;

    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let binlog_version = r.read_u16()?;
        let server_version = read_server_version(r)?;
        let create_timestamp = r.read_u32()?;
        let header_length = r.read_u8()?;
        let rest = r.read_rest();

        let (post_header_lengths, checksum_alg) =
            match (version_has_checksum(&server_version), rest.split_last()) {
                (true, Some((alg, lengths))) => (lengths.to_vec(), Some(*alg)),
                _ => (rest.to_vec(), None),
            };

        Ok(Self {
            binlog_version,
            server_version,
            create_timestamp,
            header_length,
            post_header_lengths,
            checksum_alg,
        })
    }

    /// Servers that know about checksums write the algorithm byte and then
    /// reserve the 4-byte checksum field, even with checksums off. The field
    /// is written as zeros.
    pub fn encode(&self, w: &mut BinlogWriter) -> Result<()> {
        let raw = self.server_version.as_bytes();
        if raw.len() > SERVER_VERSION_LENGTH {
            return Err(Error::InvalidMessage {
                message: format!("Server version {:?} longer than 50 bytes", self.server_version),
            });
        }
        w.write_u16(self.binlog_version);
        let mut version = [0u8; SERVER_VERSION_LENGTH];
        version[..raw.len()].copy_from_slice(raw);
        w.write_bytes(&version);
        w.write_u32(self.create_timestamp);
        w.write_u8(self.header_length);
        w.write_bytes(&self.post_header_lengths);
        if version_has_checksum(&self.server_version) {
            w.write_u8(self.checksum_alg.unwrap_or(CHECKSUM_ALG_OFF));
            w.write_u32(0);
        }
        Ok(())
    }

    pub fn has_crc32(&self) -> bool {
        self.checksum_alg == Some(CHECKSUM_ALG_CRC32)
    }

    /// Whether a raw format description body ends with the checksum field.
    ///
    /// The field is present whatever the algorithm, so only the server
    /// version decides.
    pub fn body_has_checksum_field(body: &[u8]) -> bool {
        if body.len() < Self::FIXED_LENGTH + 1 + CHECKSUM_LENGTH {
            return false;
        }
        let mut r = BinlogReader::new(&body[2..]);
        match read_server_version(&mut r) {
            Ok(version) => version_has_checksum(&version),
            Err(_) => false,
        }
    }
}

fn read_server_version(r: &mut BinlogReader<'_>) -> Result<String> {
    let raw = r.read_bytes(SERVER_VERSION_LENGTH)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Checksums exist from MySQL 5.6.1 and MariaDB 5.3.
fn version_has_checksum(version: &str) -> bool {
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    let (major, minor, patch) = (next(), next(), next());
    if version.contains("MariaDB") {
        return (major, minor) >= (5, 3);
    }
    (major, minor, patch) >= (5, 6, 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidentEvent {
    pub incident: u16,
    pub message: String,
}

impl IncidentEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let incident = r.read_u16()?;
        let message = r.read_u8_string()?;
        Ok(Self { incident, message })
    }

    pub fn encode(&self, w: &mut BinlogWriter) -> Result<()> {
        w.write_u16(self.incident);
        w.write_u8_string(&self.message)
    }

    pub fn message_length(&self) -> usize {
        self.message.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowsQueryEvent {
    pub query: String,
}

impl RowsQueryEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        // The one-byte length is unreliable past 255; the query runs to the end
        let _declared = r.read_u8()?;
        Ok(Self {
            query: String::from_utf8_lossy(r.read_rest()).into_owned(),
        })
    }

    /// The length byte saturates at 255 as servers write it; decoding
    /// reads the query to the end of the body regardless.
    pub fn encode(&self, w: &mut BinlogWriter) {
        w.write_u8(self.query.len().min(u8::MAX as usize) as u8);
        w.write_bytes(self.query.as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalClock {
    pub last_committed: u64,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GtidEvent {
    pub flags: u8,
    pub sid: [u8; 16],
    pub gno: u64,
    pub logical_clock: Option<LogicalClock>,
    /// Commit timestamps and transaction length written by MySQL 8
    pub trailer: Bytes,
}

const LOGICAL_CLOCK_TYPECODE: u8 = 2;

impl GtidEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let flags = r.read_u8()?;
        let sid = r.read_array::<16>()?;
        let gno = r.read_u64()?;
        let logical_clock = if r.is_empty() {
            None
        } else {
            let typecode = r.read_u8()?;
            if typecode != LOGICAL_CLOCK_TYPECODE {
                return Err(Error::InvalidMessage {
                    message: format!("Unexpected GTID logical clock type {}", typecode),
                });
            }
            Some(LogicalClock {
                last_committed: r.read_u64()?,
                sequence_number: r.read_u64()?,
            })
        };
        let trailer = Bytes::copy_from_slice(r.read_rest());
        Ok(Self {
            flags,
            sid,
            gno,
            logical_clock,
            trailer,
        })
    }

    pub fn encode(&self, w: &mut BinlogWriter) {
        w.write_u8(self.flags);
        w.write_bytes(&self.sid);
        w.write_u64(self.gno);
        if let Some(clock) = &self.logical_clock {
            w.write_u8(LOGICAL_CLOCK_TYPECODE);
            w.write_u64(clock.last_committed);
            w.write_u64(clock.sequence_number);
        }
        w.write_bytes(&self.trailer);
    }

    pub fn sid_string(&self) -> String {
        format_uuid(&self.sid)
    }

    pub fn gtid_string(&self) -> String {
        format!("{}:{}", self.sid_string(), self.gno)
    }
}

fn format_uuid(sid: &[u8; 16]) -> String {
    let hex: String = sid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GtidInterval {
    pub start: u64,
    /// Exclusive
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GtidSidSet {
    pub sid: [u8; 16],
    pub intervals: Vec<GtidInterval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousGtidsEvent {
    pub sets: Vec<GtidSidSet>,
}

impl PreviousGtidsEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let sid_count = r.read_u64()?;
        let mut sets = Vec::new();
        for _ in 0..sid_count {
            let sid = r.read_array::<16>()?;
            let interval_count = r.read_u64()?;
            let mut intervals = Vec::new();
            for _ in 0..interval_count {
                intervals.push(GtidInterval {
                    start: r.read_u64()?,
                    end: r.read_u64()?,
                });
            }
            sets.push(GtidSidSet { sid, intervals });
        }
        Ok(Self { sets })
    }

    pub fn encode(&self, w: &mut BinlogWriter) {
        w.write_u64(self.sets.len() as u64);
        for set in &self.sets {
            w.write_bytes(&set.sid);
            w.write_u64(set.intervals.len() as u64);
            for interval in &set.intervals {
                w.write_u64(interval.start);
                w.write_u64(interval.end);
            }
        }
    }

    /// Renders `uuid:1-5:7-9,uuid2:1-3` (ends shown inclusive).
    pub fn gtid_set_string(&self) -> String {
        self.sets
            .iter()
            .map(|set| {
                let mut s = format_uuid(&set.sid);
                for interval in &set.intervals {
                    let last = interval.end.saturating_sub(1);
                    if last == interval.start {
                        s.push_str(&format!(":{}", interval.start));
                    } else {
                        s.push_str(&format!(":{}-{}", interval.start, last));
                    }
                }
                s
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A decoded binlog event body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BinlogEvent {
    Query(QueryEvent),
    Stop,
    Rotate(RotateEvent),
    Intvar(IntvarEvent),
    Rand(RandEvent),
    FormatDescription(FormatDescriptionEvent),
    Xid(XidEvent),
    TableMap(TableMapEvent),
    Rows(RowsEvent),
    Incident(IncidentEvent),
    Heartbeat { log_ident: String },
    RowsQuery(RowsQueryEvent),
    Gtid(GtidEvent),
    AnonymousGtid(GtidEvent),
    PreviousGtids(PreviousGtidsEvent),
}

impl BinlogEvent {
    /// Decodes `body` as an event of `event_type`.
    ///
    /// `tables` supplies the table maps row events refer to.
    pub fn decode_body(
        event_type: EventType,
        body: &[u8],
        tables: &HashMap<u64, TableMapEvent>,
    ) -> Result<Self> {
        let mut r = BinlogReader::new(body);
        let event = match event_type {
            EventType::Query => BinlogEvent::Query(QueryEvent::decode(&mut r)?),
            EventType::Stop => BinlogEvent::Stop,
            EventType::Rotate => BinlogEvent::Rotate(RotateEvent::decode(&mut r)?),
            EventType::Intvar => BinlogEvent::Intvar(IntvarEvent {
                kind: r.read_u8()?,
                value: r.read_u64()?,
            }),
            EventType::Rand => BinlogEvent::Rand(RandEvent {
                seed1: r.read_u64()?,
                seed2: r.read_u64()?,
            }),
            EventType::FormatDescription => {
                BinlogEvent::FormatDescription(FormatDescriptionEvent::decode(&mut r)?)
            }
            EventType::Xid => BinlogEvent::Xid(XidEvent { xid: r.read_u64()? }),
            EventType::TableMap => BinlogEvent::TableMap(TableMapEvent::decode(&mut r)?),
            EventType::WriteRowsV1
            | EventType::UpdateRowsV1
            | EventType::DeleteRowsV1
            | EventType::WriteRowsV2
            | EventType::UpdateRowsV2
            | EventType::DeleteRowsV2 => {
                BinlogEvent::Rows(RowsEvent::decode(event_type, &mut r, tables)?)
            }
            EventType::Incident => BinlogEvent::Incident(IncidentEvent::decode(&mut r)?),
            EventType::Heartbeat => BinlogEvent::Heartbeat {
                log_ident: String::from_utf8_lossy(r.read_rest()).into_owned(),
            },
            EventType::RowsQuery => BinlogEvent::RowsQuery(RowsQueryEvent::decode(&mut r)?),
            EventType::Gtid => BinlogEvent::Gtid(GtidEvent::decode(&mut r)?),
            EventType::AnonymousGtid => BinlogEvent::AnonymousGtid(GtidEvent::decode(&mut r)?),
            EventType::PreviousGtids => {
                BinlogEvent::PreviousGtids(PreviousGtidsEvent::decode(&mut r)?)
            }
        };
        r.finish(event_type_name(event_type))?;
        Ok(event)
    }

    /// Encodes the body; row and table map events are decode-only and
    /// yield `None`. Values that do not fit their wire fields are errors.
    pub fn encode_body(&self) -> Result<Option<Bytes>> {
        let mut w = BinlogWriter::new();
        match self {
            BinlogEvent::Query(e) => e.encode(&mut w)?,
            BinlogEvent::Stop => {}
            BinlogEvent::Rotate(e) => e.encode(&mut w),
            BinlogEvent::Intvar(e) => {
                w.write_u8(e.kind);
                w.write_u64(e.value);
            }
            BinlogEvent::Rand(e) => {
                w.write_u64(e.seed1);
                w.write_u64(e.seed2);
            }
            BinlogEvent::FormatDescription(e) => e.encode(&mut w)?,
            BinlogEvent::Xid(e) => w.write_u64(e.xid),
            BinlogEvent::TableMap(_) | BinlogEvent::Rows(_) => return Ok(None),
            BinlogEvent::Incident(e) => e.encode(&mut w)?,
            BinlogEvent::Heartbeat { log_ident } => w.write_bytes(log_ident.as_bytes()),
            BinlogEvent::RowsQuery(e) => e.encode(&mut w),
            BinlogEvent::Gtid(e) | BinlogEvent::AnonymousGtid(e) => e.encode(&mut w),
            BinlogEvent::PreviousGtids(e) => e.encode(&mut w),
        }
        Ok(Some(w.freeze()))
    }
}

fn event_type_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Query => "query event",
        EventType::Stop => "stop event",
        EventType::Rotate => "rotate event",
        EventType::Intvar => "intvar event",
        EventType::Rand => "rand event",
        EventType::FormatDescription => "format description event",
        EventType::Xid => "xid event",
        EventType::TableMap => "table map event",
        EventType::WriteRowsV1 | EventType::WriteRowsV2 => "write rows event",
        EventType::UpdateRowsV1 | EventType::UpdateRowsV2 => "update rows event",
        EventType::DeleteRowsV1 | EventType::DeleteRowsV2 => "delete rows event",
        EventType::Incident => "incident event",
        EventType::Heartbeat => "heartbeat event",
        EventType::RowsQuery => "rows query event",
        EventType::Gtid => "gtid event",
        EventType::AnonymousGtid => "anonymous gtid event",
        EventType::PreviousGtids => "previous gtids event",
    }
}
