//! Bounds-checked input cursor.

use crate::error::{WireError, WireResult};
use crate::stream::{U64_NULL, U64_PACKED_NULL};

/// Read cursor over an immutable byte buffer.
///
/// Every read either advances the cursor by exactly the width it decoded or
/// fails and leaves the cursor at the start of the failed field.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    mark: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            mark: 0,
        }
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves the cursor to an absolute position.
    pub fn set_position(&mut self, pos: usize) -> WireResult<()> {
        if pos > self.buf.len() {
            return Err(WireError::InvalidMessageLength {
                declared: pos as i64,
                actual: self.buf.len() as i64,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Remembers the current position for a later [`reset`](Self::reset).
    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    /// Returns to the last marked position, or the start if none was marked.
    pub fn reset(&mut self) {
        self.pos = self.mark;
    }

    /// Skips up to `n` bytes and returns how many were skipped.
    pub fn skip(&mut self, n: i64) -> WireResult<usize> {
        if n < 0 {
            return Err(WireError::InvalidMessageLength {
                declared: n,
                actual: self.available() as i64,
            });
        }
        let skipped = usize::try_from(n).unwrap_or(usize::MAX).min(self.available());
        self.pos += skipped;
        Ok(skipped)
    }

    /// The unread tail of the buffer.
    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        if n > self.available() {
            return Err(WireError::EndOfStream {
                needed: n,
                available: self.available(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_unsigned_byte()? != 0)
    }

    pub fn read_byte(&mut self) -> WireResult<i8> {
        Ok(self.read_unsigned_byte()? as i8)
    }

    pub fn read_unsigned_byte(&mut self) -> WireResult<u8> {
        let [b] = self.take_array::<1>()?;
        Ok(b)
    }

    pub fn read_short(&mut self) -> WireResult<i16> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_unsigned_short(&mut self) -> WireResult<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    /// Reads a single UTF-16 code unit.
    pub fn read_char(&mut self) -> WireResult<u16> {
        self.read_unsigned_short()
    }

    pub fn read_int(&mut self) -> WireResult<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Reads a signed 64-bit value as two big-endian ints, high word first.
    pub fn read_long(&mut self) -> WireResult<i64> {
        if self.available() < 8 {
            return Err(WireError::EndOfStream {
                needed: 8,
                available: self.available(),
            });
        }
        let hi = i64::from(self.read_int()?);
        let lo = i64::from(self.read_int()?);
        Ok((hi << 32) | (lo & 0xffff_ffff))
    }

    pub fn read_float(&mut self) -> WireResult<f32> {
        Ok(f32::from_bits(self.read_int()? as u32))
    }

    pub fn read_double(&mut self) -> WireResult<f64> {
        Ok(f64::from_bits(self.read_long()? as u64))
    }

    /// Peeks the next int without moving the cursor.
    pub fn peek_int(&self) -> WireResult<i32> {
        let mut lookahead = self.clone();
        lookahead.read_int()
    }

    /// Fills `out` completely from the stream.
    pub fn read_into(&mut self, out: &mut [u8]) -> WireResult<()> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_raw(&mut self, n: usize) -> WireResult<&'a [u8]> {
        self.take(n)
    }

    /// Reads an `i32` length-prefixed byte blob.
    pub fn read_bytes(&mut self) -> WireResult<Vec<u8>> {
        let start = self.pos;
        let len = self.read_int()?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if len < 0 {
            self.pos = start;
            return Err(WireError::malformed(format!(
                "read data corrupt: blob length {len}"
            )));
        }
        match self.take(len as usize) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Reads `n` UTF-16 code units as a string.
    pub fn read_chars(&mut self, n: usize) -> WireResult<String> {
        let start = self.pos;
        let bytes = self.take(n.saturating_mul(2))?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| {
            self.pos = start;
            WireError::malformed("unpaired surrogate in char sequence")
        })
    }

    /// Reads a modified UTF-8 string.
    ///
    /// On failure the cursor returns to the start of the length prefix.
    pub fn read_utf(&mut self) -> WireResult<String> {
        let start = self.pos;
        let result = self.read_utf_body();
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_utf_body(&mut self) -> WireResult<String> {
        let utf_len = self.read_unsigned_short()? as usize;
        let body = self.take(utf_len)?;
        let mut units = Vec::with_capacity(utf_len);
        let mut i = 0;

        while i < body.len() {
            let b = u16::from(body[i]);
            match b >> 4 {
                0..=7 => {
                    units.push(b);
                    i += 1;
                }
                12 | 13 => {
                    let [b2] = continuation::<1>(body, i)?;
                    units.push(((b & 0x1F) << 6) | (b2 & 0x3F));
                    i += 2;
                }
                14 => {
                    let [b2, b3] = continuation::<2>(body, i)?;
                    units.push(((b & 0x0F) << 12) | ((b2 & 0x3F) << 6) | (b3 & 0x3F));
                    i += 3;
                }
                _ => {
                    return Err(WireError::malformed(format!(
                        "malformed input around byte {i}"
                    )));
                }
            }
        }

        String::from_utf16(&units)
            .map_err(|_| WireError::malformed("unpaired surrogate in string"))
    }

    /// Reads a packed variable-length long.
    pub fn read_varlong(&mut self) -> WireResult<i64> {
        let start = self.pos;
        let result = self.read_varlong_body();
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_varlong_body(&mut self) -> WireResult<i64> {
        let lead = self.read_unsigned_byte()?;
        if lead == U64_PACKED_NULL {
            return Ok(U64_NULL);
        }
        if lead & 0x80 == 0 {
            return Ok(i64::from(lead));
        }
        if lead & 0x40 == 0 {
            let [b1] = self.take_array::<1>()?;
            let value = u16::from_be_bytes([lead, b1]) & 0x3FFF;
            return Ok(i64::from(value));
        }
        if lead & 0x20 == 0 {
            let [b1, b2, b3] = self.take_array::<3>()?;
            let value = u32::from_be_bytes([lead, b1, b2, b3]) & 0x1FFF_FFFF;
            return Ok(i64::from(value));
        }

        let count = usize::from(lead & 0x0F);
        if count > 8 {
            return Err(WireError::malformed(format!(
                "packed long with {count} value bytes"
            )));
        }
        let value = self
            .take(count)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Ok(value as i64)
    }
}

/// Returns the `N` continuation bytes following the lead byte at `i`.
fn continuation<const N: usize>(body: &[u8], i: usize) -> WireResult<[u16; N]> {
    let Some(bytes) = body.get(i + 1..i + 1 + N) else {
        return Err(WireError::malformed("partial character at end"));
    };
    let mut out = [0u16; N];
    for (slot, b) in out.iter_mut().zip(bytes) {
        if b & 0xC0 != 0x80 {
            return Err(WireError::malformed(format!(
                "malformed input around byte {i}"
            )));
        }
        *slot = u16::from(*b);
    }
    Ok(out)
}
