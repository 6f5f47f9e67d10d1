use bytes::{BufMut, Bytes, BytesMut};

use super::decoder::BINLOG_MAGIC;
use super::header::EventType;
use super::packet::Packet;

/// Column value for mock row images over `LONG`/`VARCHAR` tables.
#[derive(Debug, Clone)]
pub enum MockValue {
    Null,
    Long(i32),
    Varchar(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum MockColumn {
    Long,
    Varchar,
}

/// Mock event builder for testing the binlog decoder.
///
/// Tracks `next_position` the way a server would, starting after the magic.
pub struct MockEventBuilder {
    server_id: u32,
    timestamp: u32,
    position: u32,
    checksum: bool,
}

impl MockEventBuilder {
    pub fn new() -> Self {
        Self {
            server_id: 1,
            timestamp: 1_697_369_400, // 2023-10-15 10:30:00 UTC
            position: 4,
            checksum: false,
        }
    }

    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Wraps `body` in a header (and a zeroed CRC32 trailer when enabled).
    pub fn event(&mut self, event_type: EventType, body: &[u8]) -> Bytes {
        let trailer = if self.checksum { 4 } else { 0 };
        let event_length = (19 + body.len() + trailer) as u32;
        self.position += event_length;

        let mut buf = BytesMut::with_capacity(event_length as usize);
        buf.put_u32_le(self.timestamp);
        buf.put_u8(event_type.code());
        buf.put_u32_le(self.server_id);
        buf.put_u32_le(event_length);
        buf.put_u32_le(self.position);
        buf.put_u16_le(0);
        buf.put_slice(body);
        if self.checksum {
            buf.put_u32_le(0xDEAD_BEEF);
        }
        buf.freeze()
    }

    pub fn format_description(&mut self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u16_le(4);
        let mut version = [0u8; 50];
        version[..6].copy_from_slice(b"8.0.34");
        body.put_slice(&version);
        body.put_u32_le(self.timestamp);
        body.put_u8(19);
        body.put_slice(&[
            0x38, 0x0d, 0, 8, 0, 0x12, 0, 4, 4, 4, 4, 0x12, 0, 0, 0x5f, 0, 4, 0x1a, 8, 0, 0, 0, 8,
            8, 8, 2, 0, 0, 0, 0x0a, 0x0a, 0x0a, 0x2a, 0x2a, 0, 0x12, 0x34, 0,
        ]);
        body.put_u8(u8::from(self.checksum));
        if !self.checksum {
            // The checksum field is reserved even when checksums are off
            body.put_u32_le(0);
        }
        self.event(EventType::FormatDescription, &body)
    }

    pub fn query(&mut self, schema: &str, sql: &str) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u32_le(42); // thread id
        body.put_u32_le(0); // exec time
        body.put_u8(schema.len() as u8);
        body.put_u16_le(0); // error code
        // Flags2 + charset
        let status: [u8; 12] = [0, 0, 0, 0, 0, 4, 0x21, 0, 0x21, 0, 0x08, 0];
        body.put_u16_le(status.len() as u16);
        body.put_slice(&status);
        body.put_slice(schema.as_bytes());
        body.put_u8(0);
        body.put_slice(sql.as_bytes());
        self.event(EventType::Query, &body)
    }

    pub fn xid(&mut self, xid: u64) -> Bytes {
        self.event(EventType::Xid, &xid.to_le_bytes())
    }

    pub fn rotate(&mut self, next_binlog: &str, position: u64) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u64_le(position);
        body.put_slice(next_binlog.as_bytes());
        self.event(EventType::Rotate, &body)
    }

    pub fn table_map(&mut self, table_id: u64, schema: &str, table: &str, columns: &[MockColumn]) -> Bytes {
        let mut body = BytesMut::new();
        put_table_id(&mut body, table_id);
        body.put_u16_le(1);
        body.put_u8(schema.len() as u8);
        body.put_slice(schema.as_bytes());
        body.put_u8(0);
        body.put_u8(table.len() as u8);
        body.put_slice(table.as_bytes());
        body.put_u8(0);

        body.put_u8(columns.len() as u8);
        let mut metadata = BytesMut::new();
        for column in columns {
            match column {
                MockColumn::Long => body.put_u8(3),
                MockColumn::Varchar => {
                    body.put_u8(15);
                    metadata.put_u16_le(64);
                }
            }
        }
        body.put_u8(metadata.len() as u8);
        body.put_slice(&metadata);
        // Every column nullable
        body.put_slice(&vec![0xFF; columns.len().div_ceil(8)]);
        self.event(EventType::TableMap, &body)
    }

    pub fn write_rows(&mut self, table_id: u64, rows: &[Vec<MockValue>]) -> Bytes {
        let body = rows_body(table_id, rows, false);
        self.event(EventType::WriteRowsV2, &body)
    }

    pub fn delete_rows(&mut self, table_id: u64, rows: &[Vec<MockValue>]) -> Bytes {
        let body = rows_body(table_id, rows, false);
        self.event(EventType::DeleteRowsV2, &body)
    }

    /// `rows` alternates before and after images.
    pub fn update_rows(&mut self, table_id: u64, rows: &[Vec<MockValue>]) -> Bytes {
        let body = rows_body(table_id, rows, true);
        self.event(EventType::UpdateRowsV2, &body)
    }
}

fn put_table_id(buf: &mut BytesMut, table_id: u64) {
    buf.put_slice(&table_id.to_le_bytes()[..6]);
}

fn rows_body(table_id: u64, rows: &[Vec<MockValue>], update: bool) -> BytesMut {
    let column_count = rows.first().map(|r| r.len()).unwrap_or(0);
    let bitmap = vec![0xFFu8; column_count.div_ceil(8)];

    let mut body = BytesMut::new();
    put_table_id(&mut body, table_id);
    body.put_u16_le(0);
    body.put_u16_le(2); // extra data length, no extra data
    body.put_u8(column_count as u8);
    body.put_slice(&bitmap);
    if update {
        body.put_slice(&bitmap);
    }

    for row in rows {
        let mut nulls = vec![0u8; row.len().div_ceil(8)];
        for (i, value) in row.iter().enumerate() {
            if matches!(value, MockValue::Null) {
                nulls[i / 8] |= 1 << (i % 8);
            }
        }
        body.put_slice(&nulls);
        for value in row {
            match value {
                MockValue::Null => {}
                MockValue::Long(v) => body.put_i32_le(*v),
                MockValue::Varchar(s) => {
                    body.put_u8(s.len() as u8);
                    body.put_slice(s.as_bytes());
                }
            }
        }
    }
    body
}

/// Concatenates events into a binlog file image.
pub fn binlog_file(events: &[Bytes]) -> Vec<u8> {
    let mut file = BINLOG_MAGIC.to_vec();
    for event in events {
        file.extend_from_slice(event);
    }
    file
}

/// Frames events as a dump response: OK-prefixed packets, then EOF.
pub fn dump_stream(events: &[Bytes]) -> Vec<u8> {
    let mut stream = Vec::new();
    let mut sequence = 1u8;
    for event in events {
        let mut body = vec![0x00];
        body.extend_from_slice(event);
        if let Ok(packet) = Packet::new(sequence, body) {
            stream.extend_from_slice(&packet.encode());
        }
        sequence = sequence.wrapping_add(1);
    }
    if let Ok(eof) = Packet::new(sequence, vec![0xFE, 0, 0, 2, 0]) {
        stream.extend_from_slice(&eof.encode());
    }
    stream
}
