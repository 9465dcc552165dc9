//! The fixed 56-byte header shared by every message.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{WireError, WireResult};
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

/// Protocol magic constant.
pub const MAGIC: i32 = 0x0DB2_D1E4;

/// Protocol major version.
pub const PROTOCOL_MAJOR_VERSION: u8 = 3;

/// Protocol minor version.
pub const PROTOCOL_MINOR_VERSION: u8 = 0;

/// Protocol version as written on the wire: major in the high byte.
pub const PROTOCOL_VERSION: i16 =
    ((PROTOCOL_MAJOR_VERSION as i16) << 8) | PROTOCOL_MINOR_VERSION as i16;

/// Header size in bytes. The payload always starts here.
pub const HEADER_SIZE: usize = 56;

/// Marker for header fields that have not been assigned.
pub const UNSET: i64 = -1;

/// Monotonic sequence number source shared by every header it creates.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicI64,
}

impl SequenceGenerator {
    /// Creates a generator whose first number is `start + 1`.
    pub fn new(start: i64) -> Self {
        Self {
            last: AtomicI64::new(start),
        }
    }

    /// Hands out the next sequence number.
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently handed out number.
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Compute-once cell holding a message's encoded bytes.
#[derive(Default)]
pub(crate) struct EncodedCache {
    bytes: Mutex<Option<Bytes>>,
}

impl EncodedCache {
    pub(crate) fn get_or_try_init(
        &self,
        encode: impl FnOnce() -> WireResult<Bytes>,
    ) -> WireResult<Bytes> {
        let mut slot = self.bytes.lock();
        if let Some(bytes) = slot.as_ref() {
            return Ok(bytes.clone());
        }
        let bytes = encode()?;
        *slot = Some(bytes.clone());
        Ok(bytes)
    }

    pub(crate) fn len(&self) -> Option<usize> {
        self.bytes.lock().as_ref().map(Bytes::len)
    }

    pub(crate) fn clear(&self) {
        self.bytes.lock().take();
    }
}

impl Clone for EncodedCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for EncodedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Header fields common to every message.
///
/// A header is either mutable (freshly built for an outbound request) or
/// frozen (decoded from the wire, or sealed by the caller). Frozen headers
/// reject timestamp and sequence updates.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    verb: Verb,
    total_length: i32,
    sequence_no: i64,
    timestamp: i64,
    request_id: i64,
    auth_token: i64,
    session_id: i64,
    tenant_id: i16,
    data_offset: i16,
    updatable: bool,
    sequence: Option<Arc<SequenceGenerator>>,
    pub(crate) encoded: EncodedCache,
}

impl MessageHeader {
    /// Creates a mutable header with a fresh sequence number and no credentials.
    pub fn new(verb: Verb, sequence: &Arc<SequenceGenerator>) -> Self {
        Self::with_credentials(verb, sequence, UNSET, UNSET)
    }

    /// Creates a mutable header carrying the given credentials.
    pub fn with_credentials(
        verb: Verb,
        sequence: &Arc<SequenceGenerator>,
        auth_token: i64,
        session_id: i64,
    ) -> Self {
        Self {
            sequence_no: sequence.next(),
            timestamp: now_millis(),
            auth_token,
            session_id,
            sequence: Some(Arc::clone(sequence)),
            ..Self::blank(verb)
        }
    }

    /// Creates an empty header to decode into.
    ///
    /// It carries no sequence source, so it cannot draw new numbers.
    pub fn blank(verb: Verb) -> Self {
        Self {
            verb,
            total_length: -1,
            sequence_no: 0,
            timestamp: UNSET,
            request_id: UNSET,
            auth_token: UNSET,
            session_id: UNSET,
            tenant_id: 0,
            data_offset: HEADER_SIZE as i16,
            updatable: true,
            sequence: None,
            encoded: EncodedCache::default(),
        }
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Total encoded length, or -1 if the message has not been encoded or decoded.
    pub fn total_length(&self) -> i32 {
        match self.encoded.len() {
            Some(len) => len as i32,
            None => self.total_length,
        }
    }

    pub fn sequence_no(&self) -> i64 {
        self.sequence_no
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn request_id(&self) -> i64 {
        self.request_id
    }

    pub fn auth_token(&self) -> i64 {
        self.auth_token
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn tenant_id(&self) -> i16 {
        self.tenant_id
    }

    pub fn data_offset(&self) -> i16 {
        self.data_offset
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    /// Freezes the header against timestamp and sequence updates.
    pub fn seal(&mut self) {
        self.updatable = false;
    }

    /// Drops any cached encoding.
    pub fn invalidate(&mut self) {
        self.encoded.clear();
    }

    /// Sets the timestamp.
    ///
    /// A frozen header rejects any value other than [`UNSET`], and ignores
    /// `UNSET` itself.
    pub fn set_timestamp(&mut self, timestamp: i64) -> WireResult<()> {
        if !self.updatable {
            if timestamp != UNSET {
                return Err(WireError::ReadOnlyMessage);
            }
            return Ok(());
        }
        self.timestamp = timestamp;
        self.invalidate();
        Ok(())
    }

    /// Sets the sequence number. Fails on a frozen header.
    pub fn set_sequence_no(&mut self, sequence_no: i64) -> WireResult<()> {
        if !self.updatable {
            return Err(WireError::ReadOnlyMessage);
        }
        self.sequence_no = sequence_no;
        self.invalidate();
        Ok(())
    }

    /// Stamps a new timestamp and, on a mutable header, draws a fresh
    /// sequence number and drops the cached encoding.
    pub fn update_sequence_and_timestamp(&mut self, timestamp: i64) -> WireResult<()> {
        self.set_timestamp(timestamp)?;
        if self.updatable {
            if let Some(sequence) = &self.sequence {
                self.sequence_no = sequence.next();
            }
            self.invalidate();
        }
        Ok(())
    }

    pub fn set_request_id(&mut self, request_id: i64) {
        self.request_id = request_id;
        self.invalidate();
    }

    pub fn set_auth_token(&mut self, auth_token: i64) {
        self.auth_token = auth_token;
        self.invalidate();
    }

    pub fn set_session_id(&mut self, session_id: i64) {
        self.session_id = session_id;
        self.invalidate();
    }

    pub fn set_tenant_id(&mut self, tenant_id: i16) {
        self.tenant_id = tenant_id;
        self.invalidate();
    }

    pub(crate) fn set_data_offset(&mut self, data_offset: i16) {
        self.data_offset = data_offset;
    }

    pub(crate) fn set_total_length(&mut self, total_length: i32) {
        self.total_length = total_length;
    }

    /// Writes the header with a zero length placeholder at offset 0.
    pub fn write(&self, writer: &mut ByteWriter) {
        writer.write_int(0);
        writer.write_int(MAGIC);
        writer.write_short(PROTOCOL_VERSION);
        writer.write_short(self.verb.id());
        writer.write_long(self.sequence_no);
        writer.write_long(self.timestamp);
        writer.write_long(self.request_id);
        writer.write_long(self.auth_token);
        writer.write_long(self.session_id);
        writer.write_short(self.tenant_id);
        let data_offset = (writer.position() + 2) as i16;
        writer.write_short(data_offset);
    }

    /// Reads the header fields that follow the total length.
    ///
    /// Decoding replaces the header wholesale, so the header is reopened for
    /// the duration of the read.
    pub fn read(&mut self, reader: &mut ByteReader<'_>) -> WireResult<()> {
        let magic = reader.read_int()?;
        if magic != MAGIC {
            return Err(WireError::BadMagic {
                expected: MAGIC,
                actual: magic,
            });
        }

        let version = reader.read_short()?;
        if version != PROTOCOL_VERSION {
            return Err(WireError::ProtocolNotSupported {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        let verb_id = reader.read_short()?;
        if verb_id != self.verb.id() {
            return Err(WireError::BadVerb {
                expected: self.verb.id(),
                actual: verb_id,
            });
        }

        let sequence_no = reader.read_long()?;
        let timestamp = reader.read_long()?;
        let request_id = reader.read_long()?;
        let auth_token = reader.read_long()?;
        let session_id = reader.read_long()?;
        let tenant_id = reader.read_short()?;
        let data_offset = reader.read_short()?;

        self.updatable = true;
        self.set_sequence_no(sequence_no)?;
        self.set_timestamp(timestamp)?;
        self.set_request_id(request_id);
        self.set_auth_token(auth_token);
        self.set_session_id(session_id);
        self.set_tenant_id(tenant_id);
        self.set_data_offset(data_offset);
        Ok(())
    }
}

/// Wire fields only; the cache, sequence source, and mutability are local state.
impl PartialEq for MessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.verb == other.verb
            && self.sequence_no == other.sequence_no
            && self.timestamp == other.timestamp
            && self.request_id == other.request_id
            && self.auth_token == other.auth_token
            && self.session_id == other.session_id
            && self.tenant_id == other.tenant_id
            && self.data_offset == other.data_offset
    }
}

/// Credentials carried in the payload of authenticated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPayload {
    pub auth_token: i64,
    pub session_id: i64,
}

impl Default for AuthPayload {
    fn default() -> Self {
        Self {
            auth_token: UNSET,
            session_id: UNSET,
        }
    }
}

impl AuthPayload {
    pub fn new(auth_token: i64, session_id: i64) -> Self {
        Self {
            auth_token,
            session_id,
        }
    }

    /// Writes both credentials. Fails if either is unset.
    pub fn write(&self, writer: &mut ByteWriter) -> WireResult<()> {
        if self.auth_token == UNSET || self.session_id == UNSET {
            return Err(WireError::NotAuthenticated);
        }
        writer.write_long(self.auth_token);
        writer.write_long(self.session_id);
        Ok(())
    }

    pub fn read(reader: &mut ByteReader<'_>) -> WireResult<Self> {
        Ok(Self {
            auth_token: reader.read_long()?,
            session_id: reader.read_long()?,
        })
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod header_tests {
    use super::*;

    fn sequence() -> Arc<SequenceGenerator> {
        Arc::new(SequenceGenerator::new(0))
    }

    #[test]
    fn test_protocol_version_layout() {
        assert_eq!(PROTOCOL_VERSION, 0x0300);
    }

    #[test]
    fn test_new_header_defaults() {
        let seq = sequence();
        let header = MessageHeader::new(Verb::Ping, &seq);

        assert_eq!(header.sequence_no(), 1);
        assert_eq!(header.auth_token(), UNSET);
        assert_eq!(header.session_id(), UNSET);
        assert_eq!(header.request_id(), UNSET);
        assert_eq!(header.total_length(), -1);
        assert_eq!(header.data_offset(), 56);
        assert!(header.timestamp() > 0);
        assert!(header.is_updatable());
    }

    #[test]
    fn test_write_layout() {
        let seq = sequence();
        let mut header = MessageHeader::with_credentials(Verb::QueryRequest, &seq, 7, 42);
        header.set_timestamp(1_000).unwrap();
        header.set_tenant_id(3);

        let mut writer = ByteWriter::new();
        header.write(&mut writer);
        let buf = writer.buffer();

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], &[0, 0, 0, 0]);
        assert_eq!(&buf[4..8], &MAGIC.to_be_bytes());
        assert_eq!(&buf[8..10], &[0x03, 0x00]);
        assert_eq!(&buf[10..12], &[0x00, 11]);
        assert_eq!(&buf[12..20], &1i64.to_be_bytes());
        assert_eq!(&buf[20..28], &1_000i64.to_be_bytes());
        assert_eq!(&buf[36..44], &7i64.to_be_bytes());
        assert_eq!(&buf[44..52], &42i64.to_be_bytes());
        assert_eq!(&buf[52..54], &[0, 3]);
        assert_eq!(&buf[54..56], &[0, 56]);
    }

    #[test]
    fn test_read_rejects_wrong_verb() {
        let seq = sequence();
        let header = MessageHeader::new(Verb::Ping, &seq);
        let mut writer = ByteWriter::new();
        header.write(&mut writer);
        let bytes = writer.into_bytes();

        let mut target = MessageHeader::blank(Verb::HandshakeRequest);
        let mut reader = ByteReader::new(&bytes[4..]);
        let err = target.read(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            WireError::BadVerb {
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_frozen_header_rejects_timestamp() {
        let seq = sequence();
        let mut header = MessageHeader::new(Verb::Ping, &seq);
        let before = header.timestamp();
        header.seal();

        assert!(matches!(
            header.set_timestamp(99).unwrap_err(),
            WireError::ReadOnlyMessage
        ));
        header.set_timestamp(UNSET).unwrap();
        assert_eq!(header.timestamp(), before);
        assert!(header.set_sequence_no(5).is_err());
        assert!(header.update_sequence_and_timestamp(10).is_err());
    }

    #[test]
    fn test_update_sequence_and_timestamp() {
        let seq = sequence();
        let mut header = MessageHeader::new(Verb::Ping, &seq);
        let _other = MessageHeader::new(Verb::Ping, &seq);

        header.update_sequence_and_timestamp(123).unwrap();
        assert_eq!(header.sequence_no(), 3);
        assert_eq!(header.timestamp(), 123);
        assert_eq!(seq.current(), 3);
    }

    #[test]
    fn test_auth_payload_requires_credentials() {
        let mut writer = ByteWriter::new();
        assert!(matches!(
            AuthPayload::new(UNSET, 4).write(&mut writer).unwrap_err(),
            WireError::NotAuthenticated
        ));
        assert!(AuthPayload::new(3, UNSET).write(&mut writer).is_err());
        assert_eq!(writer.length(), 0);

        AuthPayload::new(3, 4).write(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(AuthPayload::read(&mut reader).unwrap(), AuthPayload::new(3, 4));
    }
}
