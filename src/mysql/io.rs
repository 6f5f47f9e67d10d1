//! Primitive readers and writers for the MySQL wire and binlog formats.
//!
//! All integers are little-endian unless a method says otherwise. Every
//! read checks the remaining length first and fails with
//! [`Error::TruncatedStream`] instead of reading past the end.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Marker byte announcing a NULL length-coded value.
pub const LENENC_NULL: u8 = 0xFB;
const LENENC_U16: u8 = 0xFC;
const LENENC_U24: u8 = 0xFD;
const LENENC_U64: u8 = 0xFE;

/// Cursor over an already-buffered packet or event body.
#[derive(Debug, Clone)]
pub struct BinlogReader<'a> {
    buf: &'a [u8],
}

impl<'a> BinlogReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(Error::TruncatedStream {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self, context: &'static str) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingBytes {
                context,
                remaining: self.buf.remaining(),
            })
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads an unsigned little-endian integer of `width` bytes (1..=8).
    pub fn read_int(&mut self, width: usize) -> Result<u64> {
        check_width(width)?;
        self.ensure(width)?;
        Ok(self.buf.get_uint_le(width))
    }

    /// Reads an unsigned big-endian integer of `width` bytes (1..=8).
    pub fn read_int_be(&mut self, width: usize) -> Result<u64> {
        check_width(width)?;
        self.ensure(width)?;
        Ok(self.buf.get_uint(width))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Takes everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_bytes(len)?).into_owned())
    }

    /// Reads bytes up to a NUL terminator and consumes the terminator.
    pub fn read_nul_string(&mut self) -> Result<String> {
        let end = self.buf.iter().position(|b| *b == 0).ok_or(Error::TruncatedStream {
            needed: self.buf.len() + 1,
            available: self.buf.len(),
        })?;
        let s = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.advance(end + 1);
        Ok(s)
    }

    /// Reads a string prefixed by a one-byte length.
    pub fn read_u8_string(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        self.read_fixed_string(len)
    }

    /// Reads a length-coded integer. `None` is the NULL marker.
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0..=250 => Ok(Some(first as u64)),
            LENENC_NULL => Ok(None),
            LENENC_U16 => self.read_int(2).map(Some),
            LENENC_U24 => self.read_int(3).map(Some),
            LENENC_U64 => self.read_int(8).map(Some),
            other => Err(Error::InvalidMessage {
                message: format!("Invalid length-coded integer marker: {:#04x}", other),
            }),
        }
    }

    /// Length-coded integer where NULL is not allowed.
    pub fn read_packed_int(&mut self) -> Result<u64> {
        self.read_lenenc_int()?.ok_or_else(|| Error::InvalidMessage {
            message: "Unexpected NULL length-coded integer".to_string(),
        })
    }

    /// Reads a length-coded byte string. `None` is the NULL marker.
    pub fn read_lenenc_bytes(&mut self) -> Result<Option<Bytes>> {
        match self.read_lenenc_int()? {
            None => Ok(None),
            Some(len) => {
                let len = usize::try_from(len).map_err(|_| Error::TruncatedStream {
                    needed: usize::MAX,
                    available: self.remaining(),
                })?;
                Ok(Some(Bytes::copy_from_slice(self.read_bytes(len)?)))
            }
        }
    }

    pub fn read_lenenc_string(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_lenenc_bytes()?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }
}

/// Growable output buffer mirroring [`BinlogReader`].
#[derive(Debug, Default)]
pub struct BinlogWriter {
    buf: BytesMut,
}

impl BinlogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Writes the low `width` bytes of `v`, little-endian.
    pub fn write_int(&mut self, v: u64, width: usize) {
        self.buf.put_uint_le(v, width);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_nul_string(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    /// One-byte length prefix; strings longer than 255 bytes are rejected.
    pub fn write_u8_string(&mut self, s: &str) -> Result<()> {
        self.write_u8_len(s.len(), "string")?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Writes a one-byte length or count field.
    pub fn write_u8_len(&mut self, len: usize, field: &str) -> Result<()> {
        let len = u8::try_from(len).map_err(|_| Error::InvalidMessage {
            message: format!("{} of {} bytes does not fit a one-byte length", field, len),
        })?;
        self.buf.put_u8(len);
        Ok(())
    }

    /// Writes the minimal length-coded form of `v`, or the NULL marker.
    pub fn write_lenenc_int(&mut self, v: Option<u64>) {
        match v {
            None => self.buf.put_u8(LENENC_NULL),
            Some(v) if v < 251 => self.buf.put_u8(v as u8),
            Some(v) if v < 1 << 16 => {
                self.buf.put_u8(LENENC_U16);
                self.buf.put_uint_le(v, 2);
            }
            Some(v) if v < 1 << 24 => {
                self.buf.put_u8(LENENC_U24);
                self.buf.put_uint_le(v, 3);
            }
            Some(v) => {
                self.buf.put_u8(LENENC_U64);
                self.buf.put_u64_le(v);
            }
        }
    }

    pub fn write_lenenc_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            None => self.write_lenenc_int(None),
            Some(bytes) => {
                self.write_lenenc_int(Some(bytes.len() as u64));
                self.buf.put_slice(bytes);
            }
        }
    }

    pub fn write_lenenc_string(&mut self, v: Option<&str>) {
        self.write_lenenc_bytes(v.map(str::as_bytes));
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

fn check_width(width: usize) -> Result<()> {
    if (1..=8).contains(&width) {
        Ok(())
    } else {
        Err(Error::InvalidMessage {
            message: format!("Integer width {} outside 1..=8", width),
        })
    }
}
