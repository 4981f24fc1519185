//! Message codec: a growable byte buffer with typed read/write primitives
//! and a bit-packed boolean stream.
//!
//! This is the one piece of wire-level machinery the relay owns outright;
//! the *meaning* of application payloads is opaque to it (see
//! `relay_shared::protocol` for the handful of opcode frames the relay
//! itself needs to parse).
//!
//! Contracts:
//! - All multi-byte integers/floats are little-endian.
//! - Strings are an `i32` byte length followed by UTF-8 bytes.
//! - Bool writes accumulate LSB-first into a shared byte; any non-bool
//!   write flushes the accumulator first.
//! - Reads past the logical length are errors, never undefined bytes.

use std::fmt;

/// Errors produced while reading from a `MessageBuffer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read asked for more bytes than remain before the logical length.
    UnexpectedEof { needed: usize, available: usize },
    /// A string or byte slice declared a negative length prefix.
    NegativeLength(i32),
    /// Bytes did not form valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof { needed, available } => write!(
                f,
                "unexpected end of buffer: needed {needed} bytes, {available} available"
            ),
            CodecError::NegativeLength(n) => write!(f, "negative length prefix: {n}"),
            CodecError::InvalidUtf8 => write!(f, "invalid utf-8 in string payload"),
        }
    }
}

impl std::error::Error for CodecError {}

pub type Result<T> = std::result::Result<T, CodecError>;

/// A growable byte buffer with a write cursor, a logical length (the
/// high-water mark of written bytes), and a bit accumulator for packed
/// booleans.
///
/// The same type serves both write mode (`new`) and read mode
/// (`from_bytes`): the cursor tracks the next read position, the
/// logical length is the end of valid data.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    data: Vec<u8>,
    cursor: usize,
    len: usize,
    bit_byte: u8,
    bit_pos: u8,
}

impl MessageBuffer {
    /// Creates an empty write buffer with the given initial capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cursor: 0,
            len: 0,
            bit_byte: 0,
            bit_pos: 0,
        }
    }

    /// Creates a read buffer over existing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            cursor: 0,
            len: bytes.len(),
            bit_byte: 0,
            bit_pos: 0,
        }
    }

    /// Returns a copy of the logical prefix (the bytes actually written).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data[..self.len].to_vec();
        if self.bit_pos > 0 {
            out.push(self.bit_byte);
        }
        out
    }

    /// A view of the underlying buffer (logical prefix only).
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of bytes remaining to read before the logical length.
    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.cursor)
    }

    fn ensure_capacity(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed > self.data.len() {
            let new_cap = needed.max(self.data.len() * 2);
            self.data.resize(new_cap, 0);
        }
    }

    /// Flushes the bit accumulator, if anything has been packed into it,
    /// as a single byte. Called before every non-bool write.
    fn flush_bits(&mut self) {
        if self.bit_pos > 0 {
            self.append_raw(&[self.bit_byte]);
            self.bit_byte = 0;
            self.bit_pos = 0;
        }
    }

    fn append_raw(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.cursor + n > self.len {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                available: self.len - self.cursor,
            });
        }
        let slice = &self.data[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    // ─── bool ───

    /// Packs a bool into the shared bit accumulator, LSB-first, flushing
    /// to a new byte at 8 bits.
    pub fn write_bool(&mut self, value: bool) {
        if value {
            self.bit_byte |= 1 << self.bit_pos;
        }
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.flush_bits();
        }
    }

    /// Reads a bool from the packed bit stream, consuming a fresh byte
    /// when the accumulator is empty.
    pub fn read_bool(&mut self) -> Result<bool> {
        if self.bit_pos == 0 {
            self.bit_byte = self.take(1)?[0];
        }
        let bit = (self.bit_byte >> self.bit_pos) & 1 != 0;
        self.bit_pos = (self.bit_pos + 1) % 8;
        Ok(bit)
    }

    // ─── integers / floats ───

    pub fn write_u8(&mut self, value: u8) {
        self.flush_bits();
        self.append_raw(&[value]);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn write_i16(&mut self, value: i16) {
        self.flush_bits();
        self.append_raw(&value.to_le_bytes());
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn write_i32(&mut self, value: i32) {
        self.flush_bits();
        self.append_raw(&value.to_le_bytes());
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn write_i64(&mut self, value: i64) {
        self.flush_bits();
        self.append_raw(&value.to_le_bytes());
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn write_f32(&mut self, value: f32) {
        self.flush_bits();
        self.append_raw(&value.to_le_bytes());
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn write_f64(&mut self, value: f64) {
        self.flush_bits();
        self.append_raw(&value.to_le_bytes());
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    // ─── strings ───

    /// Writes an `i32` byte length followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.flush_bits();
        self.write_i32(value.len() as i32);
        self.append_raw(value.as_bytes());
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    // ─── byte slices ───

    /// Writes raw bytes, optionally preceded by an `i32` length prefix.
    pub fn write_bytes(&mut self, value: &[u8], with_length_prefix: bool) {
        self.flush_bits();
        if with_length_prefix {
            self.write_i32(value.len() as i32);
        }
        self.append_raw(value);
    }

    /// Reads a length-prefixed byte slice (the prefix was written by
    /// `write_bytes(.., true)`).
    pub fn read_bytes_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Reads an explicit number of raw bytes (no prefix).
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Reads every remaining byte in the logical region.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let rest = self.data[self.cursor..self.len].to_vec();
        self.cursor = self.len;
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut buf = MessageBuffer::new(16);
        buf.write_u8(7);
        buf.write_i16(-1234);
        buf.write_i32(99_999);
        buf.write_i64(-9_000_000_000);
        buf.write_f32(1.5);
        buf.write_f64(2.25);
        buf.write_string("hello");
        buf.write_bytes(&[1, 2, 3], true);
        buf.write_bytes(&[9, 9], false);

        let bytes = buf.to_bytes();
        let mut read = MessageBuffer::from_bytes(&bytes);
        assert_eq!(read.read_u8().unwrap(), 7);
        assert_eq!(read.read_i16().unwrap(), -1234);
        assert_eq!(read.read_i32().unwrap(), 99_999);
        assert_eq!(read.read_i64().unwrap(), -9_000_000_000);
        assert_eq!(read.read_f32().unwrap(), 1.5);
        assert_eq!(read.read_f64().unwrap(), 2.25);
        assert_eq!(read.read_string().unwrap(), "hello");
        assert_eq!(read.read_bytes_prefixed().unwrap(), vec![1, 2, 3]);
        assert_eq!(read.read_bytes(2).unwrap(), vec![9, 9]);
    }

    #[test]
    fn bool_stream_packs_lsb_first_and_flushes_on_scalar() {
        let mut buf = MessageBuffer::new(4);
        buf.write_bool(true);
        buf.write_bool(false);
        buf.write_bool(true);
        // Non-bool write flushes the partial byte (0b0000_0101) before
        // appending the i32.
        buf.write_i32(42);

        let bytes = buf.to_bytes();
        assert_eq!(bytes[0], 0b0000_0101);
        assert_eq!(i32::from_le_bytes(bytes[1..5].try_into().unwrap()), 42);

        let mut read = MessageBuffer::from_bytes(&bytes);
        assert!(read.read_bool().unwrap());
        assert!(!read.read_bool().unwrap());
        assert!(read.read_bool().unwrap());
        assert_eq!(read.read_i32().unwrap(), 42);
    }

    #[test]
    fn nine_bools_overflow_to_second_byte() {
        let mut buf = MessageBuffer::new(4);
        for i in 0..9 {
            buf.write_bool(i % 2 == 0);
        }
        let bytes = buf.to_bytes();
        assert_eq!(bytes.len(), 2);

        let mut read = MessageBuffer::from_bytes(&bytes);
        for i in 0..9 {
            assert_eq!(read.read_bool().unwrap(), i % 2 == 0);
        }
    }

    #[test]
    fn read_past_logical_length_is_an_error() {
        let mut buf = MessageBuffer::new(4);
        buf.write_u8(1);
        let bytes = buf.to_bytes();
        let mut read = MessageBuffer::from_bytes(&bytes);
        read.read_u8().unwrap();
        assert!(read.read_u8().is_err());
        assert!(read.read_i32().is_err());
    }

    #[test]
    fn growth_reallocates_to_double_or_needed() {
        let mut buf = MessageBuffer::new(1);
        for i in 0..100u8 {
            buf.write_u8(i);
        }
        assert_eq!(buf.data().len(), 100);
    }

    #[test]
    fn negative_length_prefix_is_rejected() {
        // Hand-craft a buffer whose i32 length prefix is negative.
        let mut raw = MessageBuffer::new(8);
        raw.write_i32(-1);
        let bytes = raw.to_bytes();
        let mut read = MessageBuffer::from_bytes(&bytes);
        assert_eq!(read.read_string(), Err(CodecError::NegativeLength(-1)));
    }
}
