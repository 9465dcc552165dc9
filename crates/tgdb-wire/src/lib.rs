//! # tgdb-wire: Binary PDU codec for the TGDB client protocol
//!
//! This crate encodes and decodes the protocol data units exchanged between
//! a graph database client and server. It does no I/O: transport code hands
//! it complete buffers and sends the buffers it produces.
//!
//! ## PDU Format
//!
//! ```text
//! ┌────────┬────────┬─────────┬───────┬────────┬───────────┬────────────┐
//! │ Length │ Magic  │ Version │ Verb  │ Seq No │ Timestamp │ Request Id │
//! │ (4 B)  │ (4 B)  │ (2 B)   │ (2 B) │ (8 B)  │ (8 B)     │ (8 B)      │
//! ├────────┴──┬─────┴─────┬───┴───────┴──┬─────┴───────────┴────────────┤
//! │ Auth Token│ Session Id│ Tenant │ Data│          Payload             │
//! │ (8 B)     │ (8 B)     │ (2 B)  │ Off │          (var)               │
//! └───────────┴───────────┴────────┴─────┴──────────────────────────────┘
//! ```
//!
//! - **Length**: total PDU size including this field, backpatched after encoding
//! - **Magic**: `0x0DB2D1E4`
//! - **Version**: major in the high byte, minor in the low byte (currently 3.0)
//! - **Verb**: selects the payload shape, see [`Verb`]
//! - **Data Offset**: where the payload starts, always 56
//!
//! All integers are big-endian.
//!
//! ## Usage
//!
//! Build outbound messages through a [`MessageFactory`] or a message type's
//! [`MessageKind`] constructors, and decode inbound buffers with
//! [`MessageFactory::create_message_from_buffer`].

mod config;
mod error;
mod factory;
mod header;
mod message;
mod model;
mod stream;
mod verb;

pub use config::{CodecConfig, DEFAULT_BUFFER_CAPACITY};
pub use error::{
    CodecStage, ErrorKind, QueryErrorKind, TransactionErrorKind, WireError, WireResult,
};
pub use factory::MessageFactory;
pub use header::{
    AuthPayload, HEADER_SIZE, MAGIC, MessageHeader, PROTOCOL_MAJOR_VERSION,
    PROTOCOL_MINOR_VERSION, PROTOCOL_VERSION, SequenceGenerator, UNSET,
};
pub use message::{
    AttributeIdMapping, AuthenticateRequest, AuthenticateResponse, BeginTransactionRequest,
    BeginTransactionResponse, CommitTransactionRequest, CommitTransactionResponse,
    DecryptBufferRequest, DecryptBufferResponse, DisconnectChannelRequest, DumpStacktraceRequest,
    EntityIdMapping, EntityVersion, ExceptionMessage, ExceptionType, GetEntityCommand,
    GetEntityRequest, GetEntityResponse, GetLargeObjectRequest, GetLargeObjectResponse,
    HandshakeRequest, HandshakeRequestType, HandshakeResponse, HandshakeStatus, InvalidMessage,
    Message, MessageKind, MetadataRequest, MetadataResponse, PingMessage, ProtocolMessage,
    QueryCommand, QueryRequest, QueryResponse, ReservedMessage, RollbackTransactionRequest,
    RollbackTransactionResponse, SECTION_ADDED_ENTITIES, SECTION_ATTRIBUTE_DESCRIPTORS,
    SECTION_ENTITY_STREAM, SECTION_REMOVED_ENTITIES, SECTION_UPDATED_ENTITIES,
    SessionForcefullyTerminated, SortSpec, TraverseRequest, TraverseResponse,
};
pub use model::{
    AttributeDescriptor, DecodeContext, Entity, EntityKey, EntityType, ExternalObject,
    GraphObjectFactory, SystemType,
};
pub use stream::{ByteReader, ByteWriter, MAX_UTF_LENGTH, U64_NULL, U64_PACKED_NULL};
pub use verb::{Verb, VerbDescriptor, lookup};
