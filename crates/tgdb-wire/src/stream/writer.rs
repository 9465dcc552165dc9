//! Growable output buffer with backpatching.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::config::DEFAULT_BUFFER_CAPACITY;
use crate::error::{WireError, WireResult};
use crate::stream::{MAX_UTF_LENGTH, U64_NULL, U64_PACKED_NULL};

/// Requests above this size grow by a fixed headroom instead of doubling.
const LARGE_WRITE_THRESHOLD: usize = 100_000;

/// Headroom added for large single writes.
const LARGE_WRITE_HEADROOM: usize = 2048;

/// Growable output buffer.
///
/// The backing buffer is zero-filled up to its capacity; `count` tracks how
/// much of it has been written. Absolute-offset writes may only touch the
/// written region.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: BytesMut,
    count: usize,
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteWriter {
    /// Creates a writer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Creates a writer with the given starting capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(capacity),
            count: 0,
        }
    }

    /// Bytes written so far.
    pub fn length(&self) -> usize {
        self.count
    }

    /// Write cursor. Always equal to [`length`](Self::length).
    pub fn position(&self) -> usize {
        self.count
    }

    /// Current capacity of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The written prefix of the backing buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buf[..self.count]
    }

    /// Copies the written bytes out.
    pub fn to_byte_array(&self) -> Vec<u8> {
        self.buffer().to_vec()
    }

    /// Consumes the writer and returns the written bytes.
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.truncate(self.count);
        self.buf.freeze()
    }

    fn ensure_capacity(&mut self, needed: usize) {
        let required = self.count + needed;
        if required <= self.buf.len() {
            return;
        }
        let new_len = if needed > LARGE_WRITE_THRESHOLD {
            required + LARGE_WRITE_HEADROOM
        } else {
            required * 2
        };
        trace!(from = self.buf.len(), to = new_len, "growing write buffer");
        self.buf.resize(new_len, 0);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.buf[self.count..self.count + bytes.len()].copy_from_slice(bytes);
        self.count += bytes.len();
    }

    fn put_at(&mut self, pos: usize, bytes: &[u8]) -> WireResult<()> {
        let end = pos.checked_add(bytes.len());
        match end {
            Some(end) if end <= self.count => {
                self.buf[pos..end].copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(WireError::io(format!(
                "invalid offset {pos} for {} bytes, {} written",
                bytes.len(),
                self.count
            ))),
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.put(&[u8::from(value)]);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_short(&mut self, value: i16) {
        self.put(&value.to_be_bytes());
    }

    /// Writes a single UTF-16 code unit.
    pub fn write_char(&mut self, value: u16) {
        self.put(&value.to_be_bytes());
    }

    pub fn write_int(&mut self, value: i32) {
        self.put(&value.to_be_bytes());
    }

    pub fn write_long(&mut self, value: i64) {
        self.put(&value.to_be_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_int(value.to_bits() as i32);
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_long(value.to_bits() as i64);
    }

    /// Writes bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    /// Writes an `i32` length prefix followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> WireResult<()> {
        let len = i32::try_from(bytes.len()).map_err(|_| {
            WireError::malformed(format!("blob of {} bytes is too long", bytes.len()))
        })?;
        self.ensure_capacity(4 + bytes.len());
        self.write_int(len);
        self.put(bytes);
        Ok(())
    }

    /// Writes the low byte of each UTF-16 code unit of `s`.
    pub fn write_bytes_from_str(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.write_byte(unit as u8);
        }
    }

    /// Writes each UTF-16 code unit of `s` as two bytes.
    pub fn write_chars(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.write_char(unit);
        }
    }

    /// Writes a modified UTF-8 string.
    ///
    /// Fails without writing anything if the encoded body exceeds 65535 bytes.
    pub fn write_utf(&mut self, s: &str) -> WireResult<()> {
        let utf_len: usize = s.encode_utf16().map(encoded_width).sum();
        if utf_len > MAX_UTF_LENGTH {
            return Err(WireError::malformed(format!(
                "input string is too long: {utf_len} encoded bytes"
            )));
        }

        self.ensure_capacity(2 + utf_len);
        self.write_short(utf_len as u16 as i16);
        for c in s.encode_utf16() {
            if (0x0001..=0x007F).contains(&c) {
                self.write_byte(c as u8);
            } else if c > 0x07FF {
                self.write_byte(0xE0 | ((c >> 12) & 0x0F) as u8);
                self.write_byte(0x80 | ((c >> 6) & 0x3F) as u8);
                self.write_byte(0x80 | (c & 0x3F) as u8);
            } else {
                self.write_byte(0xC0 | ((c >> 6) & 0x1F) as u8);
                self.write_byte(0x80 | (c & 0x3F) as u8);
            }
        }
        Ok(())
    }

    /// Writes a packed variable-length long.
    pub fn write_varlong(&mut self, value: i64) -> WireResult<()> {
        if value == U64_NULL {
            self.write_byte(U64_PACKED_NULL);
            return Ok(());
        }
        if value < 0 {
            return Err(WireError::malformed(format!(
                "can not pack negative long value {value}"
            )));
        }

        if value <= 0x7F {
            self.write_byte(value as u8);
        } else if value <= 0x3FFF {
            self.put(&((value as u16) | 0x8000).to_be_bytes());
        } else if value <= 0x1FFF_FFFF {
            self.put(&((value as u32) | 0xC000_0000).to_be_bytes());
        } else {
            let significant = 8 - (value.leading_zeros() / 8) as usize;
            let bytes = value.to_be_bytes();
            self.ensure_capacity(1 + significant);
            self.write_byte(0xE0 | significant as u8);
            self.put(&bytes[8 - significant..]);
        }
        Ok(())
    }

    /// Reserves `n` zeroed bytes and returns the offset where they start.
    pub fn skip_n_bytes(&mut self, n: usize) -> usize {
        let start = self.count;
        self.ensure_capacity(n);
        self.buf[start..start + n].fill(0);
        self.count += n;
        start
    }

    // ========================================================================
    // Absolute-offset writes
    // ========================================================================

    pub fn write_bool_at(&mut self, pos: usize, value: bool) -> WireResult<()> {
        self.put_at(pos, &[u8::from(value)])
    }

    pub fn write_byte_at(&mut self, pos: usize, value: u8) -> WireResult<()> {
        self.put_at(pos, &[value])
    }

    pub fn write_short_at(&mut self, pos: usize, value: i16) -> WireResult<()> {
        self.put_at(pos, &value.to_be_bytes())
    }

    pub fn write_int_at(&mut self, pos: usize, value: i32) -> WireResult<()> {
        self.put_at(pos, &value.to_be_bytes())
    }

    pub fn write_long_at(&mut self, pos: usize, value: i64) -> WireResult<()> {
        self.put_at(pos, &value.to_be_bytes())
    }

    pub fn write_float_at(&mut self, pos: usize, value: f32) -> WireResult<()> {
        self.write_int_at(pos, value.to_bits() as i32)
    }

    pub fn write_double_at(&mut self, pos: usize, value: f64) -> WireResult<()> {
        self.write_long_at(pos, value.to_bits() as i64)
    }

    /// Overwrites bytes at `pos` with the low byte of each code unit of `s`.
    pub fn write_bytes_at(&mut self, pos: usize, s: &str) -> WireResult<()> {
        let bytes: Vec<u8> = s.encode_utf16().map(|unit| unit as u8).collect();
        self.put_at(pos, &bytes)
    }

    /// Overwrites bytes at `pos` with each code unit of `s` as two bytes.
    pub fn write_chars_at(&mut self, pos: usize, s: &str) -> WireResult<()> {
        let bytes: Vec<u8> = s.encode_utf16().flat_map(u16::to_be_bytes).collect();
        self.put_at(pos, &bytes)
    }
}

fn encoded_width(c: u16) -> usize {
    match c {
        0x0001..=0x007F => 1,
        0x0800.. => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod writer_tests {
    use super::*;
    use crate::stream::ByteReader;

    #[test]
    fn test_write_fixed_width_big_endian() {
        let mut writer = ByteWriter::new();
        writer.write_bool(true);
        writer.write_byte(0xAB);
        writer.write_short(-2);
        writer.write_int(0x0102_0304);
        writer.write_long(-1);

        assert_eq!(
            writer.buffer(),
            &[
                0x01, 0xAB, 0xFF, 0xFE, 0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF, 0xFF
            ]
        );
        assert_eq!(writer.length(), 16);
        assert_eq!(writer.position(), 16);
    }

    #[test]
    fn test_growth_doubles_small_requests() {
        let mut writer = ByteWriter::with_capacity(4);
        writer.write_long(1);
        assert_eq!(writer.capacity(), 16);
        assert_eq!(writer.length(), 8);
    }

    #[test]
    fn test_growth_adds_headroom_for_large_requests() {
        let mut writer = ByteWriter::with_capacity(4);
        writer.write_raw(&vec![7u8; 200_000]);
        assert_eq!(writer.capacity(), 200_000 + 2048);
        assert_eq!(writer.length(), 200_000);
    }

    #[test]
    fn test_write_bytes_prefixes_length() {
        let mut writer = ByteWriter::new();
        writer.write_bytes(b"xyz").unwrap();
        assert_eq!(writer.buffer(), &[0, 0, 0, 3, b'x', b'y', b'z']);
    }

    #[test]
    fn test_write_utf_tiers() {
        let mut writer = ByteWriter::new();
        writer.write_utf("A\u{e9}\u{20ac}\0").unwrap();
        assert_eq!(
            writer.buffer(),
            &[0x00, 0x08, 0x41, 0xC3, 0xA9, 0xE2, 0x82, 0xAC, 0xC0, 0x80]
        );
    }

    #[test]
    fn test_write_utf_supplementary_as_surrogates() {
        let mut writer = ByteWriter::new();
        writer.write_utf("\u{1F600}").unwrap();
        assert_eq!(writer.length(), 2 + 6);

        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_utf().unwrap(), "\u{1F600}");
    }

    #[test]
    fn test_write_utf_too_long_writes_nothing() {
        let mut writer = ByteWriter::new();
        writer.write_int(9);
        let long = "\u{20ac}".repeat(21_846);

        let err = writer.write_utf(&long).unwrap_err();
        assert!(err.to_string().contains("too long"));
        assert_eq!(writer.length(), 4);
    }

    #[test]
    fn test_write_utf_at_limit() {
        let mut writer = ByteWriter::new();
        writer.write_utf(&"a".repeat(65_535)).unwrap();
        assert_eq!(writer.length(), 65_537);
    }

    #[test]
    fn test_write_varlong_tiers() {
        let cases: [(i64, usize); 7] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 4),
            (536_870_911, 4),
            (536_870_912, 5),
        ];
        for (value, width) in cases {
            let mut writer = ByteWriter::new();
            writer.write_varlong(value).unwrap();
            assert_eq!(writer.length(), width, "width of {value}");

            let bytes = writer.into_bytes();
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(reader.read_varlong().unwrap(), value);
        }
    }

    #[test]
    fn test_write_varlong_extended_layout() {
        let mut writer = ByteWriter::new();
        writer.write_varlong(i64::MAX).unwrap();
        assert_eq!(
            writer.buffer(),
            &[0xE8, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_write_varlong_null_and_negative() {
        let mut writer = ByteWriter::new();
        writer.write_varlong(U64_NULL).unwrap();
        assert_eq!(writer.buffer(), &[0xF0]);

        let err = writer.write_varlong(-5).unwrap_err();
        assert!(err.to_string().contains("negative"));
        assert_eq!(writer.length(), 1);
    }

    #[test]
    fn test_backpatch_within_written_region() {
        let mut writer = ByteWriter::new();
        let start = writer.skip_n_bytes(4);
        writer.write_long(77);
        writer.write_int_at(start, 12).unwrap();
        writer.write_long_at(4, 78).unwrap();
        writer.write_short_at(0, 1).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_int().unwrap(), 0x0001_000C);
        assert_eq!(reader.read_long().unwrap(), 78);
    }

    #[test]
    fn test_write_at_past_count_fails() {
        let mut writer = ByteWriter::with_capacity(64);
        writer.write_int(0);
        assert!(writer.write_int_at(1, 5).is_err());
        assert!(writer.write_byte_at(4, 5).is_err());
        assert!(writer.write_bool_at(3, true).is_ok());
    }

    #[test]
    fn test_write_chars_and_bytes_at_use_numeric_values() {
        let mut writer = ByteWriter::new();
        writer.skip_n_bytes(6);
        writer.write_bytes_at(0, "AB").unwrap();
        writer.write_chars_at(2, "hi").unwrap();
        assert_eq!(writer.buffer(), &[0x41, 0x42, 0x00, 0x68, 0x00, 0x69]);
        assert!(writer.write_chars_at(4, "xyz").is_err());
    }

    #[test]
    fn test_write_chars() {
        let mut writer = ByteWriter::new();
        writer.write_chars("ok");
        writer.write_bytes_from_str("ok");
        assert_eq!(writer.buffer(), &[0x00, b'o', 0x00, b'k', b'o', b'k']);
    }
}
