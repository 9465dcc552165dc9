//! Byte-level primitives shared by every message.
//!
//! All integers are big-endian. Strings use the modified UTF-8 layout: a
//! `u16` byte count followed by UTF-16 code units packed as 1, 2 or 3 bytes.
//! Variable-length longs use a five-tier layout keyed by the lead byte:
//!
//! ```text
//! 0xxxxxxx                      7 bits
//! 10xxxxxx xxxxxxxx             14 bits
//! 110xxxxx xxxxxxxx x2          29 bits
//! 1110nnnn <n bytes>            extended, n significant bytes
//! 11110000                      NULL sentinel
//! ```

mod reader;
mod writer;

pub use reader::ByteReader;
pub use writer::ByteWriter;

/// The NULL long, packed as the single byte [`U64_PACKED_NULL`].
pub const U64_NULL: i64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Lead byte of a packed NULL long.
pub const U64_PACKED_NULL: u8 = 0xF0;

/// Largest encoded body of a modified UTF-8 string.
pub const MAX_UTF_LENGTH: usize = u16::MAX as usize;
