//! Primitive byte stream.
//!
//! Fixed-width integers are little endian. Variable-length integers use
//! LEB128 (7 payload bits per byte, high bit set on every byte but the
//! last); signed values are zigzag-mapped first so small magnitudes of
//! either sign stay short.
//!
//! [`TypeReader`] is a cursor over shared bytes. Out-of-order reads follow
//! a strict save/seek/restore discipline: callers take
//! [`TypeReader::byte_index`], seek, read, and put back exactly the saved
//! index.

use std::sync::Arc;

/// Malformed or truncated encoding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("read past end of buffer at byte {position}")]
    UnexpectedEnd { position: usize },

    #[error("varint at byte {position} overflows 64 bits")]
    Overflow { position: usize },

    #[error("value {value} at byte {position} does not fit {target}")]
    OutOfRange {
        position: usize,
        value: i128,
        target: &'static str,
    },
}

/// Append-only byte sink.
#[derive(Clone, Debug, Default)]
pub struct TypeWriter {
    bytes: Vec<u8>,
}

impl TypeWriter {
    pub fn new() -> Self {
        TypeWriter::default()
    }

    #[inline]
    pub fn bytes_written(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn put_u1(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn put_u2(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u4(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Unsigned LEB128.
    pub fn put_uv(&mut self, mut value: u64) {
        loop {
            let low = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(low);
                return;
            }
            self.bytes.push(low | 0x80);
        }
    }

    /// Zigzag-mapped signed LEB128.
    pub fn put_sv(&mut self, value: i64) {
        self.put_uv(zigzag_encode(value));
    }

    /// Unsigned LEB128 of a `usize` (lengths, offsets).
    pub fn put_uv_usize(&mut self, value: usize) {
        self.put_uv(value as u64);
    }
}

/// Read cursor over shared encoded bytes.
#[derive(Clone, Debug)]
pub struct TypeReader {
    bytes: Arc<[u8]>,
    position: usize,
}

impl TypeReader {
    pub fn new(bytes: Arc<[u8]>, position: usize) -> Self {
        TypeReader { bytes, position }
    }

    #[inline]
    pub fn byte_index(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn set_byte_index(&mut self, position: usize) {
        self.position = position;
    }

    pub fn get_u1(&mut self) -> Result<u8, StreamError> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or(StreamError::UnexpectedEnd {
                position: self.position,
            })?;
        self.position += 1;
        Ok(byte)
    }

    pub fn get_u2(&mut self) -> Result<u16, StreamError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    pub fn get_u4(&mut self) -> Result<u32, StreamError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_uv(&mut self) -> Result<u64, StreamError> {
        let start = self.position;
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.get_u1()?;
            let payload = u64::from(byte & 0x7f);
            if shift >= 64 || (shift == 63 && payload > 1) {
                return Err(StreamError::Overflow { position: start });
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn get_sv(&mut self) -> Result<i64, StreamError> {
        Ok(zigzag_decode(self.get_uv()?))
    }

    /// Unsigned varint that must fit a `u32` (order ids, table indices).
    pub fn get_uv_u32(&mut self) -> Result<u32, StreamError> {
        let position = self.position;
        let value = self.get_uv()?;
        u32::try_from(value).map_err(|_| StreamError::OutOfRange {
            position,
            value: i128::from(value),
            target: "u32",
        })
    }

    pub fn get_uv_usize(&mut self) -> Result<usize, StreamError> {
        let position = self.position;
        let value = self.get_uv()?;
        usize::try_from(value).map_err(|_| StreamError::OutOfRange {
            position,
            value: i128::from(value),
            target: "usize",
        })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let end = self.position + N;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or(StreamError::UnexpectedEnd {
                position: self.position,
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.position = end;
        Ok(out)
    }
}

#[inline]
#[expect(clippy::cast_sign_loss, reason = "zigzag mapping is a bit reinterpretation")]
fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
#[expect(clippy::cast_possible_wrap, reason = "zigzag mapping is a bit reinterpretation")]
fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests unwrap for brevity")]
mod tests;
