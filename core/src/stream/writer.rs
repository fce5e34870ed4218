//! Append-only write cursor

use bytes::{BufMut, BytesMut};

use super::{number_tags, Number, CONTINUATION};
use crate::error::StreamError;

/// Write cursor appending to a growable buffer
#[derive(Debug, Default, Clone)]
pub struct WriteStream {
    buf: BytesMut,
}

impl WriteStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Current write position
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the stream
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    /// Write one byte
    pub fn write_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Write raw bytes verbatim
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Reserve one byte to be patched later, returning its position
    pub fn reserve_byte(&mut self) -> usize {
        let position = self.position();
        self.buf.put_u8(0);
        position
    }

    /// Overwrite a previously reserved byte
    pub fn patch_byte(&mut self, position: usize, value: u8) {
        self.buf[position] = value;
    }

    /// Write an unsigned integer on exactly `width` bytes, big-endian
    pub fn write_uint(&mut self, value: u64, width: usize) -> Result<(), StreamError> {
        check_width(width)?;
        if width < 8 && value >> (width * 8) != 0 {
            return Err(StreamError::SizeMismatch { expected: width, actual: significant_bytes(value) });
        }
        self.buf.put_slice(&value.to_be_bytes()[8 - width..]);
        Ok(())
    }

    /// Write a two's complement signed integer on exactly `width` bytes
    pub fn write_int(&mut self, value: i64, width: usize) -> Result<(), StreamError> {
        check_width(width)?;
        if width < 8 {
            let bound = 1i64 << (width * 8 - 1);
            if value < -bound || value >= bound {
                return Err(StreamError::SizeMismatch {
                    expected: width,
                    actual: significant_bytes(value.unsigned_abs()) + 1,
                });
            }
        }
        self.buf.put_slice(&value.to_be_bytes()[8 - width..]);
        Ok(())
    }

    /// Write a variable-length unsigned integer
    pub fn write_varuint(&mut self, mut value: u64) {
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.put_u8(group);
                return;
            }
            self.buf.put_u8(group | CONTINUATION);
        }
    }

    /// Write a variable-length signed integer
    ///
    /// The first byte holds the sign in bit 0 and 6 magnitude bits.
    pub fn write_varint(&mut self, value: i64) {
        let mut magnitude = value.unsigned_abs();
        let mut first = (((magnitude & 0x3F) as u8) << 1) | u8::from(value < 0);
        magnitude >>= 6;
        if magnitude == 0 {
            self.buf.put_u8(first);
            return;
        }
        first |= CONTINUATION;
        self.buf.put_u8(first);
        self.write_varuint(magnitude);
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    /// Write a string of exactly `size` bytes, without prefix
    pub fn write_fixed_string(&mut self, value: &str, size: usize) -> Result<(), StreamError> {
        self.write_fixed(value.as_bytes(), size)
    }

    /// Write length-prefixed binary data
    pub fn write_binary(&mut self, bytes: &[u8]) {
        self.write_varuint(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    /// Write a blob that must be exactly `size` bytes long
    pub fn write_fixed(&mut self, bytes: &[u8], size: usize) -> Result<(), StreamError> {
        if bytes.len() != size {
            return Err(StreamError::SizeMismatch { expected: size, actual: bytes.len() });
        }
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Write a number with its smallest tagged representation
    pub fn write_number(&mut self, value: &Number) -> Result<(), StreamError> {
        match *value {
            Number::Integer(n) if n >= 0 => {
                let n = u64::try_from(n).map_err(|_| StreamError::Overflow)?;
                self.write_byte(number_tags::UNSIGNED);
                self.write_varuint(n);
            }
            Number::Integer(n) => {
                let n = i64::try_from(n).map_err(|_| StreamError::Overflow)?;
                self.write_byte(number_tags::NEGATIVE);
                self.write_varint(n);
            }
            Number::Float(f) => {
                self.write_byte(number_tags::FLOAT);
                self.buf.put_f64(f);
            }
        }
        Ok(())
    }
}

fn check_width(width: usize) -> Result<(), StreamError> {
    if width == 0 || width > 8 {
        return Err(StreamError::SizeMismatch { expected: 8, actual: width });
    }
    Ok(())
}

fn significant_bytes(value: u64) -> usize {
    (64 - value.leading_zeros() as usize + 7) / 8
}
