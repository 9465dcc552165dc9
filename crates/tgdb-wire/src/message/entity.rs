//! Entity retrieval and large-object download.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{WireError, WireResult};
use crate::header::MessageHeader;
use crate::message::query::{
    DEFAULT_BATCH_SIZE, DEFAULT_EDGE_LIMIT, DEFAULT_FETCH_SIZE, DEFAULT_TRAVERSAL_DEPTH,
};
use crate::message::{MessageKind, ProtocolMessage, read_count, write_count};
use crate::model::{DecodeContext, EntityKey};
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

/// Entity retrieval command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GetEntityCommand {
    #[default]
    Get,
    GetById,
    GetMultiples,
    /// Fetches the next batch of an open result set.
    Continue,
    /// Releases an open result set.
    Close,
}

impl GetEntityCommand {
    pub fn code(self) -> i16 {
        match self {
            Self::Get => 0,
            Self::GetById => 1,
            Self::GetMultiples => 2,
            Self::Continue => 10,
            Self::Close => 20,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Get),
            1 => Some(Self::GetById),
            2 => Some(Self::GetMultiples),
            10 => Some(Self::Continue),
            20 => Some(Self::Close),
            _ => None,
        }
    }

    /// Whether the command starts a fetch and so carries a key.
    pub fn is_fetch(self) -> bool {
        matches!(self, Self::Get | Self::GetById | Self::GetMultiples)
    }
}

/// Looks entities up by key, or pages through an open result set.
///
/// ```text
/// +---------+-----------+ fetch commands only ----------------------------------+
/// | cmd:i16 | result:i32| fetch:i32 batch:i16 depth:i16 edges:i16 len:i32 key.. |
/// +---------+-----------+-------------------------------------------------------+
/// ```
#[derive(Debug, Clone)]
pub struct GetEntityRequest {
    header: MessageHeader,
    command: GetEntityCommand,
    result_id: i32,
    fetch_size: i32,
    batch_size: i16,
    traversal_depth: i16,
    edge_limit: i16,
    key: Option<Arc<dyn EntityKey>>,
    raw_key: Bytes,
}

impl GetEntityRequest {
    pub fn command(&self) -> GetEntityCommand {
        self.command
    }

    pub fn set_command(&mut self, command: GetEntityCommand) {
        self.command = command;
        self.header.invalidate();
    }

    pub fn result_id(&self) -> i32 {
        self.result_id
    }

    pub fn set_result_id(&mut self, result_id: i32) {
        self.result_id = result_id;
        self.header.invalidate();
    }

    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    pub fn set_fetch_size(&mut self, fetch_size: i32) {
        self.fetch_size = fetch_size;
        self.header.invalidate();
    }

    pub fn batch_size(&self) -> i16 {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: i16) {
        self.batch_size = batch_size;
        self.header.invalidate();
    }

    pub fn traversal_depth(&self) -> i16 {
        self.traversal_depth
    }

    pub fn set_traversal_depth(&mut self, depth: i16) {
        self.traversal_depth = depth;
        self.header.invalidate();
    }

    pub fn edge_limit(&self) -> i16 {
        self.edge_limit
    }

    pub fn set_edge_limit(&mut self, limit: i16) {
        self.edge_limit = limit;
        self.header.invalidate();
    }

    pub fn key(&self) -> Option<&Arc<dyn EntityKey>> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Arc<dyn EntityKey>) {
        self.key = Some(key);
        self.header.invalidate();
    }

    /// Serialized key of a decoded request.
    pub fn raw_key(&self) -> &Bytes {
        &self.raw_key
    }
}

impl MessageKind for GetEntityRequest {
    const VERB: Verb = Verb::GetEntityRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            command: GetEntityCommand::Get,
            result_id: 0,
            fetch_size: DEFAULT_FETCH_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            traversal_depth: DEFAULT_TRAVERSAL_DEPTH,
            edge_limit: DEFAULT_EDGE_LIMIT,
            key: None,
            raw_key: Bytes::new(),
        }
    }
}

impl ProtocolMessage for GetEntityRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_short(self.command.code());
        writer.write_int(self.result_id);
        if !self.command.is_fetch() {
            return Ok(());
        }

        let key = self
            .key
            .as_ref()
            .ok_or_else(|| WireError::malformed(format!("{:?} needs a key", self.command)))?;
        writer.write_int(self.fetch_size);
        writer.write_short(self.batch_size);
        writer.write_short(self.traversal_depth);
        writer.write_short(self.edge_limit);

        let start = writer.skip_n_bytes(4);
        key.write_external(writer)?;
        let len = writer.position() - start - 4;
        let len = i32::try_from(len)
            .map_err(|_| WireError::malformed(format!("key of {len} bytes is too large")))?;
        writer.write_int_at(start, len)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        let code = reader.read_short()?;
        self.command = GetEntityCommand::from_code(code)
            .ok_or_else(|| WireError::malformed(format!("unknown get-entity command {code}")))?;
        self.result_id = reader.read_int()?;
        self.key = None;
        self.raw_key = Bytes::new();
        if !self.command.is_fetch() {
            return Ok(());
        }

        self.fetch_size = reader.read_int()?;
        self.batch_size = reader.read_short()?;
        self.traversal_depth = reader.read_short()?;
        self.edge_limit = reader.read_short()?;
        let len = read_count(reader)?;
        self.raw_key = Bytes::copy_from_slice(reader.read_raw(len)?);
        Ok(())
    }
}

/// Entities returned for a [`GetEntityRequest`].
///
/// The entity stream is kept undecoded, starting at its total count, for
/// the caller's entity reader.
#[derive(Debug, Clone, PartialEq)]
pub struct GetEntityResponse {
    header: MessageHeader,
    result_id: i32,
    total_count: i32,
    entity_stream: Bytes,
}

impl GetEntityResponse {
    pub fn result_id(&self) -> i32 {
        self.result_id
    }

    pub fn set_result_id(&mut self, result_id: i32) {
        self.result_id = result_id;
        self.header.invalidate();
    }

    pub fn total_count(&self) -> i32 {
        self.total_count
    }

    pub fn has_result(&self) -> bool {
        self.total_count > 0
    }

    pub fn entity_stream(&self) -> &Bytes {
        &self.entity_stream
    }

    /// Sets the entity stream. It must start with the `i32` total count.
    pub fn set_entity_stream(&mut self, stream: Bytes) -> WireResult<()> {
        self.total_count = ByteReader::new(&stream).peek_int()?;
        self.entity_stream = stream;
        self.header.invalidate();
        Ok(())
    }
}

impl MessageKind for GetEntityResponse {
    const VERB: Verb = Verb::GetEntityResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            result_id: 0,
            total_count: 0,
            entity_stream: Bytes::new(),
        }
    }
}

impl ProtocolMessage for GetEntityResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_int(self.result_id);
        if self.entity_stream.is_empty() {
            writer.write_int(0);
        } else {
            writer.write_raw(&self.entity_stream);
        }
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        if reader.available() == 0 {
            return Err(WireError::io("get entity response has no data"));
        }
        self.result_id = reader.read_int()?;
        self.total_count = reader.peek_int()?;
        self.entity_stream = Bytes::copy_from_slice(reader.read_raw(reader.available())?);
        debug!(
            result_id = self.result_id,
            total = self.total_count,
            "read get-entity response"
        );
        Ok(())
    }
}

// ============================================================================
// Large Objects
// ============================================================================

/// Requests the content of a large-object (blob or clob) attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct GetLargeObjectRequest {
    header: MessageHeader,
    entity_id: i64,
    decrypt: bool,
}

impl GetLargeObjectRequest {
    pub fn entity_id(&self) -> i64 {
        self.entity_id
    }

    pub fn set_entity_id(&mut self, entity_id: i64) {
        self.entity_id = entity_id;
        self.header.invalidate();
    }

    pub fn decrypt(&self) -> bool {
        self.decrypt
    }

    pub fn set_decrypt(&mut self, decrypt: bool) {
        self.decrypt = decrypt;
        self.header.invalidate();
    }
}

impl MessageKind for GetLargeObjectRequest {
    const VERB: Verb = Verb::GetLargeObjectRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            entity_id: 0,
            decrypt: false,
        }
    }
}

impl ProtocolMessage for GetLargeObjectRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_long(self.entity_id);
        writer.write_bool(self.decrypt);
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.entity_id = reader.read_long()?;
        self.decrypt = reader.read_bool()?;
        Ok(())
    }
}

/// Large-object content, sent as a sequence of chunks.
///
/// A nonzero status makes decoding fail with
/// [`WireError::LargeObjectUnavailable`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetLargeObjectResponse {
    header: MessageHeader,
    status: i32,
    entity_id: i64,
    has_data: bool,
    chunks: Vec<Bytes>,
    data: Bytes,
}

impl GetLargeObjectResponse {
    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn set_status(&mut self, status: i32) {
        self.status = status;
        self.header.invalidate();
    }

    pub fn entity_id(&self) -> i64 {
        self.entity_id
    }

    pub fn set_entity_id(&mut self, entity_id: i64) {
        self.entity_id = entity_id;
        self.header.invalidate();
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// The chunks concatenated into one buffer.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Appends a chunk to the object content.
    pub fn push_chunk(&mut self, chunk: impl Into<Bytes>) {
        self.chunks.push(chunk.into());
        self.has_data = true;
        self.data = concat(&self.chunks);
        self.header.invalidate();
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    buf.freeze()
}

impl MessageKind for GetLargeObjectResponse {
    const VERB: Verb = Verb::GetLargeObjectResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            status: 0,
            entity_id: 0,
            has_data: false,
            chunks: Vec::new(),
            data: Bytes::new(),
        }
    }
}

impl ProtocolMessage for GetLargeObjectResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_int(self.status);
        if self.status != 0 {
            return Ok(());
        }
        writer.write_long(self.entity_id);
        writer.write_bool(self.has_data);
        if self.has_data {
            write_count(writer, self.chunks.len())?;
            for chunk in &self.chunks {
                writer.write_bytes(chunk)?;
            }
        }
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.status = reader.read_int()?;
        if self.status != 0 {
            return Err(WireError::LargeObjectUnavailable {
                status: self.status,
            });
        }

        self.entity_id = reader.read_long()?;
        self.has_data = reader.read_bool()?;
        self.chunks.clear();
        if self.has_data {
            let count = read_count(reader)?;
            for _ in 0..count {
                self.chunks.push(Bytes::from(reader.read_bytes()?));
            }
        }
        self.data = concat(&self.chunks);
        debug!(
            entity_id = self.entity_id,
            chunks = self.chunks.len(),
            len = self.data.len(),
            "read large object"
        );
        Ok(())
    }
}

#[cfg(test)]
mod entity_tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::header::SequenceGenerator;
    use crate::model::ExternalObject;

    #[derive(Debug)]
    struct NameKey(&'static str);

    impl ExternalObject for NameKey {
        fn write_external(&self, writer: &mut ByteWriter) -> WireResult<()> {
            writer.write_utf("person")?;
            writer.write_utf(self.0)
        }

        fn read_external(
            &mut self,
            _reader: &mut ByteReader<'_>,
            _ctx: &mut DecodeContext,
        ) -> WireResult<()> {
            Ok(())
        }
    }

    impl EntityKey for NameKey {}

    fn sequence() -> Arc<SequenceGenerator> {
        Arc::new(SequenceGenerator::new(0))
    }

    #[test]
    fn test_get_entity_request_key_block() {
        let seq = sequence();
        let mut request = GetEntityRequest::new(&seq);
        request.set_key(Arc::new(NameKey("ann")));
        request.set_result_id(4);

        let bytes = request.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes[56..]);
        assert_eq!(reader.read_short().unwrap(), 0);
        assert_eq!(reader.read_int().unwrap(), 4);
        assert_eq!(reader.read_int().unwrap(), 1000);
        assert_eq!(reader.read_short().unwrap(), 50);
        assert_eq!(reader.read_short().unwrap(), 3);
        assert_eq!(reader.read_short().unwrap(), 0);
        let key_len = reader.read_int().unwrap() as usize;
        assert_eq!(key_len, reader.available());
        assert_eq!(reader.read_utf().unwrap(), "person");

        let decoded = GetEntityRequest::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.command(), GetEntityCommand::Get);
        assert_eq!(decoded.raw_key().len(), key_len);
    }

    #[test]
    fn test_get_entity_fetch_needs_key() {
        let seq = sequence();
        let request = GetEntityRequest::new(&seq);
        assert!(request.to_bytes().is_err());

        let mut request = GetEntityRequest::new(&seq);
        request.set_command(GetEntityCommand::Close);
        request.set_result_id(8);
        let bytes = request.to_bytes().unwrap();
        assert_eq!(bytes.len(), 56 + 2 + 4);
        let decoded = GetEntityRequest::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.command(), GetEntityCommand::Close);
        assert_eq!(decoded.result_id(), 8);
    }

    #[test]
    fn test_get_entity_response_keeps_stream() {
        let seq = sequence();
        let mut response = GetEntityResponse::new(&seq);
        response.set_result_id(3);
        response
            .set_entity_stream(Bytes::from_static(&[0, 0, 0, 2, 9, 9]))
            .unwrap();

        let decoded =
            GetEntityResponse::decode(&response.to_bytes().unwrap(), &mut DecodeContext::new())
                .unwrap();
        assert!(decoded.has_result());
        assert_eq!(decoded.total_count(), 2);
        assert_eq!(decoded.entity_stream().as_ref(), &[0, 0, 0, 2, 9, 9]);
    }

    #[test]
    fn test_large_object_chunks_are_concatenated() {
        let seq = sequence();
        let mut response = GetLargeObjectResponse::new(&seq);
        response.set_entity_id(12);
        response.push_chunk(&b"hello "[..]);
        response.push_chunk(&b"world"[..]);

        let decoded = GetLargeObjectResponse::decode(
            &response.to_bytes().unwrap(),
            &mut DecodeContext::new(),
        )
        .unwrap();
        assert!(decoded.has_data());
        assert_eq!(decoded.data().as_ref(), b"hello world");
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_large_object_unavailable() {
        let seq = sequence();
        let mut response = GetLargeObjectResponse::new(&seq);
        response.set_status(2);

        let err = GetLargeObjectResponse::decode(
            &response.to_bytes().unwrap(),
            &mut DecodeContext::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolNotSupported);
        assert!(matches!(err.root(), WireError::LargeObjectUnavailable { status: 2 }));
    }

    #[test]
    fn test_large_object_request_round_trip() {
        let seq = sequence();
        let mut request = GetLargeObjectRequest::new(&seq);
        request.set_entity_id(5);
        request.set_decrypt(true);
        let decoded =
            GetLargeObjectRequest::decode(&request.to_bytes().unwrap(), &mut DecodeContext::new())
                .unwrap();
        assert_eq!(decoded, request);
    }
}
