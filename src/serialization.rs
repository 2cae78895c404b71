//! Little-endian and compact-size encoding helpers
//!
//! Decoding is strict: compact sizes must use their shortest form and reads
//! past the end of the buffer fail, so every accepted byte string has exactly
//! one parse.

use crate::error::{ChainError, Result};
use crate::types::Hash;

/// Append a compact-size integer
pub fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Compact-size encoding of `value`
pub fn encode_compact_size(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    write_compact_size(&mut out, value);
    out
}

/// Number of bytes the compact-size encoding of `value` occupies
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Append `bytes` prefixed by their compact-size length
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Cursor over a byte slice
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next byte without consuming it
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Byte `offset` positions ahead without consuming anything
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ChainError::Serialization(format!(
                "unexpected end of data: need {} bytes at offset {}, {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        self.read_array()
    }

    /// Read a compact-size integer, rejecting non-canonical encodings
    pub fn read_compact_size(&mut self) -> Result<u64> {
        let prefix = self.read_u8()?;
        let (value, min) = match prefix {
            0xfd => (self.read_u16_le()? as u64, 0xfd),
            0xfe => (self.read_u32_le()? as u64, 0x1_0000),
            0xff => (self.read_u64_le()?, 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < min {
            return Err(ChainError::Serialization(format!(
                "non-canonical compact size {value} with prefix {prefix:#x}"
            )));
        }
        Ok(value)
    }

    /// Read a compact-size count that cannot exceed the bytes left
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_compact_size()?;
        if count > self.remaining() as u64 {
            return Err(ChainError::Serialization(format!(
                "count {count} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(count as usize)
    }

    /// Read compact-size-prefixed bytes
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_count()?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Fail if any bytes are left
    pub fn finish(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(ChainError::Serialization(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}
