//! Message types and the shared encode/decode protocol.
//!
//! Every message owns a [`MessageHeader`] and adds a verb-specific payload.
//! Encoding writes the header with a zero length, appends the payload, then
//! backpatches the total length at offset 0. Decoding checks the length
//! against the buffer, reads and validates the header, then the payload.

/// Empty-payload message for a verb that needs nothing beyond the header.
macro_rules! header_only_message {
    ($(#[$doc:meta])* $name:ident, $verb:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            header: $crate::header::MessageHeader,
        }

        impl $crate::message::MessageKind for $name {
            const VERB: $crate::verb::Verb = $verb;

            fn from_header(header: $crate::header::MessageHeader) -> Self {
                Self { header }
            }
        }

        impl $crate::message::ProtocolMessage for $name {
            fn header(&self) -> &$crate::header::MessageHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::header::MessageHeader {
                &mut self.header
            }

            fn write_payload(
                &self,
                _writer: &mut $crate::stream::ByteWriter,
            ) -> $crate::error::WireResult<()> {
                Ok(())
            }

            fn read_payload(
                &mut self,
                _reader: &mut $crate::stream::ByteReader<'_>,
                _ctx: &mut $crate::model::DecodeContext,
            ) -> $crate::error::WireResult<()> {
                Ok(())
            }
        }
    };
}

mod crypto;
mod entity;
mod exception;
mod metadata;
mod query;
mod session;
mod transaction;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::config::DEFAULT_BUFFER_CAPACITY;
use crate::error::{CodecStage, WireError, WireResult};
use crate::header::{MessageHeader, SequenceGenerator};
use crate::model::DecodeContext;
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

pub use crypto::{DecryptBufferRequest, DecryptBufferResponse};
pub use entity::{
    GetEntityCommand, GetEntityRequest, GetEntityResponse, GetLargeObjectRequest,
    GetLargeObjectResponse,
};
pub use exception::{
    ExceptionMessage, ExceptionType, InvalidMessage, ReservedMessage, SessionForcefullyTerminated,
};
pub use metadata::{MetadataRequest, MetadataResponse};
pub use query::{
    QueryCommand, QueryRequest, QueryResponse, SortSpec, TraverseRequest, TraverseResponse,
};
pub use session::{
    AuthenticateRequest, AuthenticateResponse, DisconnectChannelRequest, DumpStacktraceRequest,
    HandshakeRequest, HandshakeRequestType, HandshakeResponse, HandshakeStatus, PingMessage,
};
pub use transaction::{
    AttributeIdMapping, BeginTransactionRequest, BeginTransactionResponse,
    CommitTransactionRequest, CommitTransactionResponse, EntityIdMapping, EntityVersion,
    RollbackTransactionRequest, RollbackTransactionResponse, SECTION_ADDED_ENTITIES,
    SECTION_ATTRIBUTE_DESCRIPTORS, SECTION_ENTITY_STREAM, SECTION_REMOVED_ENTITIES,
    SECTION_UPDATED_ENTITIES,
};

// ============================================================================
// Message Protocol
// ============================================================================

/// Operations every message supports.
pub trait ProtocolMessage: fmt::Debug + Send + Sync {
    fn header(&self) -> &MessageHeader;

    /// Mutable header access. Header setters drop the cached encoding.
    fn header_mut(&mut self) -> &mut MessageHeader;

    /// Writes the verb-specific payload.
    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()>;

    /// Reads the verb-specific payload.
    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        ctx: &mut DecodeContext,
    ) -> WireResult<()>;

    fn verb(&self) -> Verb {
        self.header().verb()
    }

    fn write_header(&self, writer: &mut ByteWriter) {
        self.header().write(writer);
    }

    fn read_header(&mut self, reader: &mut ByteReader<'_>) -> WireResult<()> {
        self.header_mut().read(reader)
    }

    /// Encodes the message, reusing the cached bytes after the first call.
    fn to_bytes(&self) -> WireResult<Bytes> {
        self.to_bytes_with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Like [`to_bytes`](Self::to_bytes), starting from a writer of the given capacity.
    fn to_bytes_with_capacity(&self, capacity: usize) -> WireResult<Bytes> {
        self.header()
            .encoded
            .get_or_try_init(|| encode(self, capacity))
    }

    /// Decodes `buf` into this message.
    fn from_bytes(&mut self, buf: &[u8]) -> WireResult<()> {
        self.from_bytes_with(buf, &mut DecodeContext::new())
    }

    /// Decodes `buf` into this message using a session decode context.
    ///
    /// On failure the message contents are unspecified; use
    /// [`MessageKind::decode`] for an all-or-nothing decode.
    fn from_bytes_with(&mut self, buf: &[u8], ctx: &mut DecodeContext) -> WireResult<()> {
        decode(self, buf, ctx)
    }
}

/// Messages with a fixed verb that can be built from a header alone.
pub trait MessageKind: ProtocolMessage + Sized {
    const VERB: Verb;

    /// Wraps a header with a default payload.
    fn from_header(header: MessageHeader) -> Self;

    /// Creates a mutable message with a fresh sequence number.
    fn new(sequence: &Arc<SequenceGenerator>) -> Self {
        Self::from_header(MessageHeader::new(Self::VERB, sequence))
    }

    /// Creates a mutable message carrying credentials.
    fn with_credentials(
        sequence: &Arc<SequenceGenerator>,
        auth_token: i64,
        session_id: i64,
    ) -> Self {
        Self::from_header(MessageHeader::with_credentials(
            Self::VERB,
            sequence,
            auth_token,
            session_id,
        ))
    }

    /// An empty message to decode into.
    fn blank() -> Self {
        Self::from_header(MessageHeader::blank(Self::VERB))
    }

    /// Decodes a new message from `buf`.
    fn decode(buf: &[u8], ctx: &mut DecodeContext) -> WireResult<Self> {
        let mut message = Self::blank();
        message.from_bytes_with(buf, ctx)?;
        Ok(message)
    }
}

fn encode<M: ProtocolMessage + ?Sized>(message: &M, capacity: usize) -> WireResult<Bytes> {
    let verb = message.verb();
    let mut writer = ByteWriter::with_capacity(capacity);
    message.write_header(&mut writer);
    message.write_payload(&mut writer).map_err(|e| {
        e.in_stage(
            CodecStage::WritePayload,
            verb.name(),
            Bytes::copy_from_slice(writer.buffer()),
        )
    })?;

    let total = i32::try_from(writer.length()).map_err(|_| WireError::InvalidMessageLength {
        declared: writer.length() as i64,
        actual: i64::from(i32::MAX),
    })?;
    writer.write_int_at(0, total)?;

    debug!(verb = %verb, len = total, "encoded message");
    Ok(writer.into_bytes())
}

fn decode<M: ProtocolMessage + ?Sized>(
    message: &mut M,
    buf: &[u8],
    ctx: &mut DecodeContext,
) -> WireResult<()> {
    let verb = message.verb();
    let staged = |e: WireError, stage| e.in_stage(stage, verb.name(), Bytes::copy_from_slice(buf));

    let mut reader = ByteReader::new(buf);
    let declared = reader
        .read_int()
        .map_err(|e| staged(e, CodecStage::ReadHeader))?;
    if i64::from(declared) != buf.len() as i64 {
        return Err(staged(
            WireError::InvalidMessageLength {
                declared: i64::from(declared),
                actual: buf.len() as i64,
            },
            CodecStage::ReadHeader,
        ));
    }

    message
        .read_header(&mut reader)
        .map_err(|e| staged(e, CodecStage::ReadHeader))?;
    message.header_mut().set_total_length(declared);
    message
        .read_payload(&mut reader, ctx)
        .map_err(|e| staged(e, CodecStage::ReadPayload))?;

    let header = message.header_mut();
    header.invalidate();
    header.seal();
    debug!(verb = %verb, len = declared, "decoded message");
    Ok(())
}

/// Converts a collection length to the `i32` count written before it.
fn write_count(writer: &mut ByteWriter, len: usize) -> WireResult<()> {
    let count = i32::try_from(len)
        .map_err(|_| WireError::malformed(format!("collection of {len} items is too large")))?;
    writer.write_int(count);
    Ok(())
}

/// Reads an `i32` element count, rejecting negative values.
fn read_count(reader: &mut ByteReader<'_>) -> WireResult<usize> {
    let count = reader.read_int()?;
    usize::try_from(count)
        .map_err(|_| WireError::malformed(format!("negative element count {count}")))
}

/// Backpatches the `i32` at `start` with the number of bytes written since.
fn backpatch_length(writer: &mut ByteWriter, start: usize) -> WireResult<()> {
    let len = writer.position() - start;
    let len = i32::try_from(len)
        .map_err(|_| WireError::malformed(format!("section of {len} bytes is too large")))?;
    writer.write_int_at(start, len)
}

// ============================================================================
// Message Union
// ============================================================================

/// Any protocol message.
#[derive(Debug, Clone)]
pub enum Message {
    Ping(PingMessage),
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    AuthenticateRequest(AuthenticateRequest),
    AuthenticateResponse(AuthenticateResponse),
    BeginTransactionRequest(BeginTransactionRequest),
    BeginTransactionResponse(BeginTransactionResponse),
    CommitTransactionRequest(CommitTransactionRequest),
    CommitTransactionResponse(CommitTransactionResponse),
    RollbackTransactionRequest(RollbackTransactionRequest),
    RollbackTransactionResponse(RollbackTransactionResponse),
    QueryRequest(QueryRequest),
    QueryResponse(QueryResponse),
    TraverseRequest(TraverseRequest),
    TraverseResponse(TraverseResponse),
    MetadataRequest(MetadataRequest),
    MetadataResponse(MetadataResponse),
    GetEntityRequest(GetEntityRequest),
    GetEntityResponse(GetEntityResponse),
    GetLargeObjectRequest(GetLargeObjectRequest),
    GetLargeObjectResponse(GetLargeObjectResponse),
    DumpStacktraceRequest(DumpStacktraceRequest),
    DisconnectChannelRequest(DisconnectChannelRequest),
    SessionForcefullyTerminated(SessionForcefullyTerminated),
    DecryptBufferRequest(DecryptBufferRequest),
    DecryptBufferResponse(DecryptBufferResponse),
    Exception(ExceptionMessage),
    /// Admin, export and import verbs, which carry no payload here.
    Reserved(ReservedMessage),
    Invalid(InvalidMessage),
}

impl Message {
    /// Wraps `header` in the message type its verb selects.
    pub fn from_header(header: MessageHeader) -> Message {
        match header.verb() {
            Verb::Ping => Self::Ping(PingMessage::from_header(header)),
            Verb::HandshakeRequest => Self::HandshakeRequest(HandshakeRequest::from_header(header)),
            Verb::HandshakeResponse => {
                Self::HandshakeResponse(HandshakeResponse::from_header(header))
            }
            Verb::AuthenticateRequest => {
                Self::AuthenticateRequest(AuthenticateRequest::from_header(header))
            }
            Verb::AuthenticateResponse => {
                Self::AuthenticateResponse(AuthenticateResponse::from_header(header))
            }
            Verb::BeginTransactionRequest => {
                Self::BeginTransactionRequest(BeginTransactionRequest::from_header(header))
            }
            Verb::BeginTransactionResponse => {
                Self::BeginTransactionResponse(BeginTransactionResponse::from_header(header))
            }
            Verb::CommitTransactionRequest => {
                Self::CommitTransactionRequest(CommitTransactionRequest::from_header(header))
            }
            Verb::CommitTransactionResponse => {
                Self::CommitTransactionResponse(CommitTransactionResponse::from_header(header))
            }
            Verb::RollbackTransactionRequest => {
                Self::RollbackTransactionRequest(RollbackTransactionRequest::from_header(header))
            }
            Verb::RollbackTransactionResponse => {
                Self::RollbackTransactionResponse(RollbackTransactionResponse::from_header(header))
            }
            Verb::QueryRequest => Self::QueryRequest(QueryRequest::from_header(header)),
            Verb::QueryResponse => Self::QueryResponse(QueryResponse::from_header(header)),
            Verb::TraverseRequest => Self::TraverseRequest(TraverseRequest::from_header(header)),
            Verb::TraverseResponse => Self::TraverseResponse(TraverseResponse::from_header(header)),
            Verb::MetadataRequest => Self::MetadataRequest(MetadataRequest::from_header(header)),
            Verb::MetadataResponse => Self::MetadataResponse(MetadataResponse::from_header(header)),
            Verb::GetEntityRequest => Self::GetEntityRequest(GetEntityRequest::from_header(header)),
            Verb::GetEntityResponse => {
                Self::GetEntityResponse(GetEntityResponse::from_header(header))
            }
            Verb::GetLargeObjectRequest => {
                Self::GetLargeObjectRequest(GetLargeObjectRequest::from_header(header))
            }
            Verb::GetLargeObjectResponse => {
                Self::GetLargeObjectResponse(GetLargeObjectResponse::from_header(header))
            }
            Verb::DumpStacktraceRequest => {
                Self::DumpStacktraceRequest(DumpStacktraceRequest::from_header(header))
            }
            Verb::DisconnectChannelRequest => {
                Self::DisconnectChannelRequest(DisconnectChannelRequest::from_header(header))
            }
            Verb::SessionForcefullyTerminated => {
                Self::SessionForcefullyTerminated(SessionForcefullyTerminated::from_header(header))
            }
            Verb::DecryptBufferRequest => {
                Self::DecryptBufferRequest(DecryptBufferRequest::from_header(header))
            }
            Verb::DecryptBufferResponse => {
                Self::DecryptBufferResponse(DecryptBufferResponse::from_header(header))
            }
            Verb::ExceptionMessage => Self::Exception(ExceptionMessage::from_header(header)),
            Verb::InvalidMessage => Self::Invalid(InvalidMessage::from_header(header)),
            Verb::AdminRequest
            | Verb::AdminResponse
            | Verb::BeginExportRequest
            | Verb::BeginExportResponse
            | Verb::PartialExportRequest
            | Verb::PartialExportResponse
            | Verb::CancelExportRequest
            | Verb::BeginImportRequest
            | Verb::BeginImportResponse
            | Verb::PartialImportRequest
            | Verb::PartialImportResponse => Self::Reserved(ReservedMessage::new(header)),
        }
    }

    /// An empty message of the given verb to decode into.
    pub fn blank(verb: Verb) -> Message {
        Self::from_header(MessageHeader::blank(verb))
    }

    pub fn as_protocol(&self) -> &dyn ProtocolMessage {
        match self {
            Self::Ping(m) => m,
            Self::HandshakeRequest(m) => m,
            Self::HandshakeResponse(m) => m,
            Self::AuthenticateRequest(m) => m,
            Self::AuthenticateResponse(m) => m,
            Self::BeginTransactionRequest(m) => m,
            Self::BeginTransactionResponse(m) => m,
            Self::CommitTransactionRequest(m) => m,
            Self::CommitTransactionResponse(m) => m,
            Self::RollbackTransactionRequest(m) => m,
            Self::RollbackTransactionResponse(m) => m,
            Self::QueryRequest(m) => m,
            Self::QueryResponse(m) => m,
            Self::TraverseRequest(m) => m,
            Self::TraverseResponse(m) => m,
            Self::MetadataRequest(m) => m,
            Self::MetadataResponse(m) => m,
            Self::GetEntityRequest(m) => m,
            Self::GetEntityResponse(m) => m,
            Self::GetLargeObjectRequest(m) => m,
            Self::GetLargeObjectResponse(m) => m,
            Self::DumpStacktraceRequest(m) => m,
            Self::DisconnectChannelRequest(m) => m,
            Self::SessionForcefullyTerminated(m) => m,
            Self::DecryptBufferRequest(m) => m,
            Self::DecryptBufferResponse(m) => m,
            Self::Exception(m) => m,
            Self::Reserved(m) => m,
            Self::Invalid(m) => m,
        }
    }

    pub fn as_protocol_mut(&mut self) -> &mut dyn ProtocolMessage {
        match self {
            Self::Ping(m) => m,
            Self::HandshakeRequest(m) => m,
            Self::HandshakeResponse(m) => m,
            Self::AuthenticateRequest(m) => m,
            Self::AuthenticateResponse(m) => m,
            Self::BeginTransactionRequest(m) => m,
            Self::BeginTransactionResponse(m) => m,
            Self::CommitTransactionRequest(m) => m,
            Self::CommitTransactionResponse(m) => m,
            Self::RollbackTransactionRequest(m) => m,
            Self::RollbackTransactionResponse(m) => m,
            Self::QueryRequest(m) => m,
            Self::QueryResponse(m) => m,
            Self::TraverseRequest(m) => m,
            Self::TraverseResponse(m) => m,
            Self::MetadataRequest(m) => m,
            Self::MetadataResponse(m) => m,
            Self::GetEntityRequest(m) => m,
            Self::GetEntityResponse(m) => m,
            Self::GetLargeObjectRequest(m) => m,
            Self::GetLargeObjectResponse(m) => m,
            Self::DumpStacktraceRequest(m) => m,
            Self::DisconnectChannelRequest(m) => m,
            Self::SessionForcefullyTerminated(m) => m,
            Self::DecryptBufferRequest(m) => m,
            Self::DecryptBufferResponse(m) => m,
            Self::Exception(m) => m,
            Self::Reserved(m) => m,
            Self::Invalid(m) => m,
        }
    }

    pub fn verb(&self) -> Verb {
        self.as_protocol().verb()
    }

    pub fn header(&self) -> &MessageHeader {
        self.as_protocol().header()
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        self.as_protocol_mut().header_mut()
    }

    pub fn to_bytes(&self) -> WireResult<Bytes> {
        self.as_protocol().to_bytes()
    }

    pub fn to_bytes_with_capacity(&self, capacity: usize) -> WireResult<Bytes> {
        self.as_protocol().to_bytes_with_capacity(capacity)
    }

    pub fn from_bytes(&mut self, buf: &[u8]) -> WireResult<()> {
        self.as_protocol_mut().from_bytes(buf)
    }

    pub fn from_bytes_with(&mut self, buf: &[u8], ctx: &mut DecodeContext) -> WireResult<()> {
        self.as_protocol_mut().from_bytes_with(buf, ctx)
    }

    pub fn as_exception(&self) -> Option<&ExceptionMessage> {
        match self {
            Self::Exception(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_authenticate_response(&self) -> Option<&AuthenticateResponse> {
        match self {
            Self::AuthenticateResponse(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_commit_response(&self) -> Option<&CommitTransactionResponse> {
        match self {
            Self::CommitTransactionResponse(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_query_response(&self) -> Option<&QueryResponse> {
        match self {
            Self::QueryResponse(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_metadata_response(&self) -> Option<&MetadataResponse> {
        match self {
            Self::MetadataResponse(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_get_entity_response(&self) -> Option<&GetEntityResponse> {
        match self {
            Self::GetEntityResponse(m) => Some(m),
            _ => None,
        }
    }
}
