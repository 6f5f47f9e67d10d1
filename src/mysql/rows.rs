//! Table map and row image decoding.
//!
//! Row events only carry raw column bytes; their layout comes from the
//! most recent `TABLE_MAP_EVENT` for the same table id.

use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::header::EventType;
use super::io::BinlogReader;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    pub fn from_code(code: u8) -> Result<Self> {
        let column_type = match code {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            20 => ColumnType::TypedArray,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => return Err(Error::UnsupportedColumnType(other)),
        };
        Ok(column_type)
    }

    /// Reads this type's table-map metadata.
    fn read_metadata(self, r: &mut BinlogReader<'_>) -> Result<u16> {
        let meta = match self {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry
            | ColumnType::Time2
            | ColumnType::DateTime2
            | ColumnType::Timestamp2 => r.read_u8()? as u16,
            ColumnType::Varchar | ColumnType::VarString | ColumnType::Bit => r.read_u16()?,
            // Stored as two separate bytes: real type (or precision) first
            ColumnType::NewDecimal
            | ColumnType::String
            | ColumnType::Enum
            | ColumnType::Set => r.read_int_be(2)? as u16,
            _ => 0,
        };
        Ok(meta)
    }
}

/// A decoded column value from a row image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnValue {
    Null,
    Int(i64),
    Float(f32),
    Double(f64),
    Decimal(String),
    Text(String),
    Bytes(Bytes),
    Bit(u64),
    Enum(u64),
    Set(u64),
    Year(u16),
    Date { year: u16, month: u8, day: u8 },
    Time { negative: bool, hours: u32, minutes: u8, seconds: u8, micros: u32 },
    DateTime { year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, micros: u32 },
    Timestamp { seconds: u32, micros: u32 },
}

impl ColumnValue {
    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Null => Value::Null,
            ColumnValue::Int(v) => Value::from(*v),
            ColumnValue::Float(v) => Value::from(*v as f64),
            ColumnValue::Double(v) => Value::from(*v),
            ColumnValue::Decimal(s) | ColumnValue::Text(s) => Value::String(s.clone()),
            ColumnValue::Bytes(b) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            ColumnValue::Bit(v) | ColumnValue::Enum(v) | ColumnValue::Set(v) => Value::from(*v),
            ColumnValue::Year(v) => Value::from(*v),
            ColumnValue::Date { year, month, day } => {
                Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
            }
            ColumnValue::Time {
                negative,
                hours,
                minutes,
                seconds,
                micros,
            } => Value::String(format!(
                "{}{:02}:{:02}:{:02}{}",
                if *negative { "-" } else { "" },
                hours,
                minutes,
                seconds,
                format_micros(*micros)
            )),
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                micros,
            } => Value::String(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
                year,
                month,
                day,
                hour,
                minute,
                second,
                format_micros(*micros)
            )),
            ColumnValue::Timestamp { seconds, micros } => {
                match chrono::DateTime::from_timestamp(*seconds as i64, micros * 1_000) {
                    Some(ts) => Value::String(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()),
                    None => Value::from(*seconds),
                }
            }
        }
    }
}

fn format_micros(micros: u32) -> String {
    if micros == 0 {
        String::new()
    } else {
        format!(".{:06}", micros)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
    pub null_bitmap: Vec<u8>,
    /// Optional metadata block (MySQL 8 `binlog_row_metadata`), kept raw
    #[serde(skip)]
    pub optional_metadata: Bytes,
}

impl TableMapEvent {
    pub fn decode(r: &mut BinlogReader<'_>) -> Result<Self> {
        let table_id = r.read_int(6)?;
        let flags = r.read_u16()?;

        let schema = r.read_u8_string()?;
        expect_nul(r, "schema name")?;
        let table = r.read_u8_string()?;
        expect_nul(r, "table name")?;

        let column_count = r.read_packed_int()? as usize;
        let mut column_types = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            column_types.push(ColumnType::from_code(r.read_u8()?)?);
        }

        let metadata_len = r.read_packed_int()? as usize;
        let mut meta_reader = BinlogReader::new(r.read_bytes(metadata_len)?);
        let mut column_metadata = Vec::with_capacity(column_count);
        for column_type in &column_types {
            column_metadata.push(column_type.read_metadata(&mut meta_reader)?);
        }
        meta_reader.finish("table map metadata")?;

        let null_bitmap = r.read_bytes(column_count.div_ceil(8))?.to_vec();
        let optional_metadata = Bytes::copy_from_slice(r.read_rest());

        Ok(Self {
            table_id,
            flags,
            schema,
            table,
            column_types,
            column_metadata,
            null_bitmap,
            optional_metadata,
        })
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn is_nullable(&self, index: usize) -> bool {
        bit_set(&self.null_bitmap, index)
    }
}

fn expect_nul(r: &mut BinlogReader<'_>, what: &str) -> Result<()> {
    if r.read_u8()? != 0 {
        return Err(Error::InvalidMessage {
            message: format!("Table map {} missing NUL terminator", what),
        });
    }
    Ok(())
}

fn bit_set(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map(|b| b & (1 << (index % 8)) != 0)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// One row image; `None` marks a column absent from the image.
pub type RowImage = Vec<Option<ColumnValue>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowChange {
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsEvent {
    pub kind: RowsKind,
    pub table_id: u64,
    pub flags: u16,
    #[serde(skip)]
    pub extra_data: Bytes,
    pub column_count: usize,
    pub rows: Vec<RowChange>,
}

impl RowsEvent {
    pub fn decode(
        event_type: EventType,
        r: &mut BinlogReader<'_>,
        tables: &HashMap<u64, TableMapEvent>,
    ) -> Result<Self> {
        let kind = match event_type {
            EventType::WriteRowsV1 | EventType::WriteRowsV2 => RowsKind::Write,
            EventType::UpdateRowsV1 | EventType::UpdateRowsV2 => RowsKind::Update,
            EventType::DeleteRowsV1 | EventType::DeleteRowsV2 => RowsKind::Delete,
            other => {
                return Err(Error::InvalidMessage {
                    message: format!("{:?} is not a rows event", other),
                })
            }
        };

        let table_id = r.read_int(6)?;
        let flags = r.read_u16()?;

        let extra_data = if event_type.is_rows_v2() {
            // The length counts its own two bytes
            let extra_len = r.read_u16()? as usize;
            if extra_len < 2 {
                return Err(Error::InvalidMessage {
                    message: format!("Rows event extra data length {} below 2", extra_len),
                });
            }
            Bytes::copy_from_slice(r.read_bytes(extra_len - 2)?)
        } else {
            Bytes::new()
        };

        let table = tables.get(&table_id).ok_or(Error::UnknownTable(table_id))?;

        let column_count = r.read_packed_int()? as usize;
        if column_count != table.column_count() {
            return Err(Error::InvalidMessage {
                message: format!(
                    "Rows event has {} columns, table map for {}.{} has {}",
                    column_count,
                    table.schema,
                    table.table,
                    table.column_count()
                ),
            });
        }

        let bitmap_len = column_count.div_ceil(8);
        let present = r.read_bytes(bitmap_len)?.to_vec();
        let present_after = if kind == RowsKind::Update {
            r.read_bytes(bitmap_len)?.to_vec()
        } else {
            present.clone()
        };

        let mut rows = Vec::new();
        while !r.is_empty() {
            let row = match kind {
                RowsKind::Write => RowChange {
                    before: None,
                    after: Some(decode_row_image(r, table, &present)?),
                },
                RowsKind::Delete => RowChange {
                    before: Some(decode_row_image(r, table, &present)?),
                    after: None,
                },
                RowsKind::Update => RowChange {
                    before: Some(decode_row_image(r, table, &present)?),
                    after: Some(decode_row_image(r, table, &present_after)?),
                },
            };
            rows.push(row);
        }

        Ok(Self {
            kind,
            table_id,
            flags,
            extra_data,
            column_count,
            rows,
        })
    }
}

fn decode_row_image(
    r: &mut BinlogReader<'_>,
    table: &TableMapEvent,
    present: &[u8],
) -> Result<RowImage> {
    let column_count = table.column_count();
    let present_count = (0..column_count).filter(|i| bit_set(present, *i)).count();
    let null_bitmap = r.read_bytes(present_count.div_ceil(8))?;

    let mut image = Vec::with_capacity(column_count);
    let mut ordinal = 0;
    for index in 0..column_count {
        if !bit_set(present, index) {
            image.push(None);
            continue;
        }
        let value = if bit_set(null_bitmap, ordinal) {
            ColumnValue::Null
        } else {
            decode_value(r, table.column_types[index], table.column_metadata[index])?
        };
        ordinal += 1;
        image.push(Some(value));
    }
    Ok(image)
}

fn decode_value(r: &mut BinlogReader<'_>, column_type: ColumnType, meta: u16) -> Result<ColumnValue> {
    let value = match column_type {
        ColumnType::Null => ColumnValue::Null,
        ColumnType::Tiny => ColumnValue::Int(r.read_u8()? as i8 as i64),
        ColumnType::Short => ColumnValue::Int(r.read_u16()? as i16 as i64),
        ColumnType::Int24 => {
            let v = r.read_int(3)? as u32;
            let signed = if v & 0x80_0000 != 0 { (v | 0xFF00_0000) as i32 } else { v as i32 };
            ColumnValue::Int(signed as i64)
        }
        ColumnType::Long => ColumnValue::Int(r.read_u32()? as i32 as i64),
        ColumnType::LongLong => ColumnValue::Int(r.read_u64()? as i64),
        ColumnType::Float => ColumnValue::Float(r.read_f32()?),
        ColumnType::Double => ColumnValue::Double(r.read_f64()?),
        ColumnType::Year => {
            let v = r.read_u8()? as u16;
            ColumnValue::Year(if v == 0 { 0 } else { v + 1900 })
        }
        ColumnType::NewDecimal => {
            ColumnValue::Decimal(decode_decimal(r, (meta >> 8) as u8, (meta & 0xFF) as u8)?)
        }
        ColumnType::Varchar | ColumnType::VarString => {
            let len_width = if meta < 256 { 1 } else { 2 };
            let len = r.read_int(len_width)? as usize;
            text_or_bytes(r.read_bytes(len)?)
        }
        ColumnType::String => {
            let real_type = (meta >> 8) as u8;
            if real_type == ColumnType::Enum as u8 {
                ColumnValue::Enum(r.read_int((meta & 0xFF) as usize)?)
            } else if real_type == ColumnType::Set as u8 {
                ColumnValue::Set(r.read_int((meta & 0xFF) as usize)?)
            } else {
                let max_len = ((((meta >> 4) & 0x300) ^ 0x300) + (meta & 0xFF)) as usize;
                let len_width = if max_len < 256 { 1 } else { 2 };
                let len = r.read_int(len_width)? as usize;
                text_or_bytes(r.read_bytes(len)?)
            }
        }
        ColumnType::Enum => ColumnValue::Enum(r.read_int((meta & 0xFF) as usize)?),
        ColumnType::Set => ColumnValue::Set(r.read_int((meta & 0xFF) as usize)?),
        ColumnType::Bit => {
            let len = (meta >> 8) as usize + usize::from((meta & 0xFF) > 0);
            ColumnValue::Bit(if len == 0 { 0 } else { r.read_int_be(len)? })
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry
        | ColumnType::Json => {
            let len = r.read_int(meta as usize)? as usize;
            ColumnValue::Bytes(Bytes::copy_from_slice(r.read_bytes(len)?))
        }
        ColumnType::Timestamp => ColumnValue::Timestamp {
            seconds: r.read_u32()?,
            micros: 0,
        },
        ColumnType::Timestamp2 => {
            let seconds = r.read_int_be(4)? as u32;
            let micros = read_fraction(r, meta as u8)?;
            ColumnValue::Timestamp { seconds, micros }
        }
        ColumnType::Date | ColumnType::NewDate => {
            let v = r.read_int(3)? as u32;
            ColumnValue::Date {
                year: (v >> 9) as u16,
                month: ((v >> 5) & 0x0F) as u8,
                day: (v & 0x1F) as u8,
            }
        }
        ColumnType::DateTime => {
            let v = r.read_u64()?;
            let date = v / 1_000_000;
            let time = v % 1_000_000;
            ColumnValue::DateTime {
                year: (date / 10_000) as u16,
                month: ((date / 100) % 100) as u8,
                day: (date % 100) as u8,
                hour: (time / 10_000) as u8,
                minute: ((time / 100) % 100) as u8,
                second: (time % 100) as u8,
                micros: 0,
            }
        }
        ColumnType::DateTime2 => {
            let packed = r.read_int_be(5)? as i64 - 0x80_0000_0000;
            let micros = read_fraction(r, meta as u8)?;
            let ymd = packed >> 17;
            let ym = ymd >> 5;
            let hms = packed & 0x1_FFFF;
            ColumnValue::DateTime {
                year: (ym / 13) as u16,
                month: (ym % 13) as u8,
                day: (ymd & 0x1F) as u8,
                hour: (hms >> 12) as u8,
                minute: ((hms >> 6) & 0x3F) as u8,
                second: (hms & 0x3F) as u8,
                micros,
            }
        }
        ColumnType::Time => {
            let v = r.read_int(3)? as u32;
            let signed = if v & 0x80_0000 != 0 { (v | 0xFF00_0000) as i32 } else { v as i32 };
            let abs = signed.unsigned_abs();
            ColumnValue::Time {
                negative: signed < 0,
                hours: abs / 10_000,
                minutes: ((abs / 100) % 100) as u8,
                seconds: (abs % 100) as u8,
                micros: 0,
            }
        }
        ColumnType::Time2 => {
            let packed = r.read_int_be(3)? as i64 - 0x80_0000;
            let micros = read_fraction(r, meta as u8)?;
            let abs = packed.unsigned_abs();
            ColumnValue::Time {
                negative: packed < 0,
                hours: ((abs >> 12) & 0x3FF) as u32,
                minutes: ((abs >> 6) & 0x3F) as u8,
                seconds: (abs & 0x3F) as u8,
                micros,
            }
        }
        ColumnType::Decimal | ColumnType::TypedArray => {
            return Err(Error::UnsupportedColumnType(column_type as u8))
        }
    };
    Ok(value)
}

fn text_or_bytes(raw: &[u8]) -> ColumnValue {
    match std::str::from_utf8(raw) {
        Ok(s) => ColumnValue::Text(s.to_string()),
        Err(_) => ColumnValue::Bytes(Bytes::copy_from_slice(raw)),
    }
}

/// Fractional seconds stored big-endian in `(fsp + 1) / 2` bytes.
fn read_fraction(r: &mut BinlogReader<'_>, fsp: u8) -> Result<u32> {
    if fsp > 6 {
        return Err(Error::InvalidMessage {
            message: format!("Fractional second precision {} exceeds 6", fsp),
        });
    }
    let width = (fsp as usize).div_ceil(2);
    if width == 0 {
        return Ok(0);
    }
    let raw = r.read_int_be(width)? as u32;
    Ok(raw * 10u32.pow(6 - 2 * width as u32))
}

const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const DIGITS_PER_INT: usize = 9;

/// Decodes MySQL's packed binary `DECIMAL(precision, scale)` format.
pub fn decode_decimal(r: &mut BinlogReader<'_>, precision: u8, scale: u8) -> Result<String> {
    let scale = scale as usize;
    let integral = (precision as usize).saturating_sub(scale);
    let (intg0, intg0x) = (integral / DIGITS_PER_INT, integral % DIGITS_PER_INT);
    let (frac0, frac0x) = (scale / DIGITS_PER_INT, scale % DIGITS_PER_INT);
    let size = intg0 * 4 + DIG2BYTES[intg0x] + frac0 * 4 + DIG2BYTES[frac0x];
    if size == 0 {
        return Ok("0".to_string());
    }

    let mut raw = r.read_bytes(size)?.to_vec();
    let positive = raw[0] & 0x80 != 0;
    raw[0] ^= 0x80;
    if !positive {
        raw.iter_mut().for_each(|b| *b = !*b);
    }

    let mut digits = BinlogReader::new(&raw);
    let mut int_part = String::new();
    if intg0x > 0 {
        let v = digits.read_int_be(DIG2BYTES[intg0x])?;
        int_part.push_str(&format!("{:0width$}", v, width = intg0x));
    }
    for _ in 0..intg0 {
        int_part.push_str(&format!("{:09}", digits.read_int_be(4)?));
    }
    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };

    let mut frac_part = String::new();
    for _ in 0..frac0 {
        frac_part.push_str(&format!("{:09}", digits.read_int_be(4)?));
    }
    if frac0x > 0 {
        let v = digits.read_int_be(DIG2BYTES[frac0x])?;
        frac_part.push_str(&format!("{:0width$}", v, width = frac0x));
    }

    let mut out = String::new();
    if !positive {
        out.push('-');
    }
    out.push_str(int_part);
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(out)
}
