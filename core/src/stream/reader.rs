//! Bounded read cursor

use super::{number_tags, Number, CONTINUATION};
use crate::error::StreamError;

/// Read cursor over a borrowed buffer
#[derive(Debug, Clone)]
pub struct ReadStream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ReadStream<'a> {
    /// Create a cursor at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total length of the underlying buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Slice of the buffer between two positions
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.data[start..end]
    }

    /// Fail unless every byte has been consumed
    pub fn finish(&self) -> Result<(), StreamError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(StreamError::TrailingBytes(n)),
        }
    }

    /// Read `count` bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], StreamError> {
        if count > self.remaining() {
            return Err(StreamError::Exhausted { needed: count, remaining: self.remaining() });
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Read one byte
    pub fn read_byte(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian unsigned integer of `width` bytes
    pub fn read_uint(&mut self, width: usize) -> Result<u64, StreamError> {
        if width == 0 || width > 8 {
            return Err(StreamError::SizeMismatch { expected: 8, actual: width });
        }
        let mut buf = [0u8; 8];
        buf[8 - width..].copy_from_slice(self.read_bytes(width)?);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a two's complement signed integer of `width` bytes
    pub fn read_int(&mut self, width: usize) -> Result<i64, StreamError> {
        let raw = self.read_uint(width)?;
        let shift = 64 - (width as u32) * 8;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Read a variable-length unsigned integer
    pub fn read_varuint(&mut self) -> Result<u64, StreamError> {
        self.read_groups(0, 0)
    }

    /// Read a variable-length signed integer
    pub fn read_varint(&mut self) -> Result<i64, StreamError> {
        let first = self.read_byte()?;
        let negative = first & 0x01 != 0;
        let low = u64::from((first >> 1) & 0x3F);

        let magnitude = if first & CONTINUATION != 0 {
            let high = self.read_groups(0, 0)?;
            if high == 0 {
                return Err(StreamError::NonCanonical("overlong varint"));
            }
            if high >> 58 != 0 {
                return Err(StreamError::Overflow);
            }
            low | (high << 6)
        } else {
            low
        };

        if negative {
            if magnitude == 0 {
                return Err(StreamError::NonCanonical("negative zero"));
            }
            if magnitude > 1u64 << 63 {
                return Err(StreamError::Overflow);
            }
            Ok((-(magnitude as i128)) as i64)
        } else {
            i64::try_from(magnitude).map_err(|_| StreamError::Overflow)
        }
    }

    fn read_groups(&mut self, mut value: u64, mut shift: u32) -> Result<u64, StreamError> {
        loop {
            let byte = self.read_byte()?;
            let group = u64::from(byte & 0x7F);
            if shift >= 64 || (shift > 57 && group >> (64 - shift) != 0) {
                return Err(StreamError::Overflow);
            }
            value |= group << shift;
            if byte & CONTINUATION == 0 {
                if group == 0 && shift > 0 {
                    return Err(StreamError::NonCanonical("overlong varuint"));
                }
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let bytes = self.read_binary()?;
        to_utf8(bytes)
    }

    /// Read a string of exactly `size` bytes
    pub fn read_fixed_string(&mut self, size: usize) -> Result<String, StreamError> {
        let bytes = self.read_bytes(size)?;
        to_utf8(bytes)
    }

    /// Read length-prefixed binary data
    pub fn read_binary(&mut self) -> Result<&'a [u8], StreamError> {
        let length = self.read_varuint()?;
        let length = usize::try_from(length).map_err(|_| StreamError::Overflow)?;
        self.read_bytes(length)
    }

    /// Read a tagged number
    pub fn read_number(&mut self) -> Result<Number, StreamError> {
        match self.read_byte()? {
            number_tags::UNSIGNED => Ok(Number::Integer(i128::from(self.read_varuint()?))),
            number_tags::NEGATIVE => {
                let n = self.read_varint()?;
                if n >= 0 {
                    return Err(StreamError::NonCanonical("non-negative number with negative tag"));
                }
                Ok(Number::Integer(i128::from(n)))
            }
            number_tags::FLOAT => {
                let bytes: [u8; 8] = self
                    .read_bytes(8)?
                    .try_into()
                    .map_err(|_| StreamError::Exhausted { needed: 8, remaining: 0 })?;
                Ok(Number::Float(f64::from_be_bytes(bytes)))
            }
            tag => Err(StreamError::UnknownTag(tag)),
        }
    }
}

fn to_utf8(bytes: &[u8]) -> Result<String, StreamError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| StreamError::InvalidUtf8)
}
