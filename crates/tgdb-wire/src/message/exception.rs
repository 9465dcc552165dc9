//! Server-pushed failures and placeholder messages.

use std::fmt;

use crate::error::WireResult;
use crate::header::MessageHeader;
use crate::message::{MessageKind, ProtocolMessage};
use crate::model::DecodeContext;
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

/// Category of a server-side exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExceptionType {
    #[default]
    Success,
    BadAuthentication,
    BadMagic,
    BadVerb,
    ChannelDisconnected,
    ConnectionTimeout,
    GeneralException,
    InvalidMessageLength,
    IoException,
    ProtocolNotSupported,
    RetryIoException,
    SecurityException,
    TransactionException,
    TypeCoercionNotSupported,
    TypeNotSupported,
    VersionMismatch,
    InvalidErrorCode,
    /// A tag this codec does not know. Kept so it can be written back.
    Unknown(u8),
}

impl ExceptionType {
    pub fn from_byte(tag: u8) -> Self {
        match tag {
            0 => Self::Success,
            1 => Self::BadAuthentication,
            2 => Self::BadMagic,
            3 => Self::BadVerb,
            4 => Self::ChannelDisconnected,
            5 => Self::ConnectionTimeout,
            6 => Self::GeneralException,
            7 => Self::InvalidMessageLength,
            8 => Self::IoException,
            9 => Self::ProtocolNotSupported,
            10 => Self::RetryIoException,
            11 => Self::SecurityException,
            12 => Self::TransactionException,
            13 => Self::TypeCoercionNotSupported,
            14 => Self::TypeNotSupported,
            15 => Self::VersionMismatch,
            16 => Self::InvalidErrorCode,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::BadAuthentication => 1,
            Self::BadMagic => 2,
            Self::BadVerb => 3,
            Self::ChannelDisconnected => 4,
            Self::ConnectionTimeout => 5,
            Self::GeneralException => 6,
            Self::InvalidMessageLength => 7,
            Self::IoException => 8,
            Self::ProtocolNotSupported => 9,
            Self::RetryIoException => 10,
            Self::SecurityException => 11,
            Self::TransactionException => 12,
            Self::TypeCoercionNotSupported => 13,
            Self::TypeNotSupported => 14,
            Self::VersionMismatch => 15,
            Self::InvalidErrorCode => 16,
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(tag) => write!(f, "Unknown({tag})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Generic failure reported by the server.
///
/// A zero server code means the message carries nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionMessage {
    header: MessageHeader,
    server_code: i32,
    exception_type: ExceptionType,
    message: String,
}

impl ExceptionMessage {
    pub fn server_code(&self) -> i32 {
        self.server_code
    }

    pub fn exception_type(&self) -> ExceptionType {
        self.exception_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Sets the failure. A zero code clears the type and message on the wire.
    pub fn set_exception(
        &mut self,
        server_code: i32,
        exception_type: ExceptionType,
        message: impl Into<String>,
    ) {
        self.server_code = server_code;
        self.exception_type = exception_type;
        self.message = message.into();
        self.header.invalidate();
    }
}

impl MessageKind for ExceptionMessage {
    const VERB: Verb = Verb::ExceptionMessage;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            server_code: 0,
            exception_type: ExceptionType::Success,
            message: String::new(),
        }
    }
}

impl ProtocolMessage for ExceptionMessage {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_int(self.server_code);
        if self.server_code == 0 {
            return Ok(());
        }
        writer.write_byte(self.exception_type.as_byte());
        writer.write_utf(&self.message)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.server_code = reader.read_int()?;
        if self.server_code == 0 {
            self.exception_type = ExceptionType::Success;
            self.message.clear();
            return Ok(());
        }
        self.exception_type = ExceptionType::from_byte(reader.read_unsigned_byte()?);
        self.message = reader.read_utf()?;
        Ok(())
    }
}

/// Sent by the server before it drops a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionForcefullyTerminated {
    header: MessageHeader,
    exception_type: ExceptionType,
    message: String,
}

impl SessionForcefullyTerminated {
    pub fn exception_type(&self) -> ExceptionType {
        self.exception_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_reason(&mut self, exception_type: ExceptionType, message: impl Into<String>) {
        self.exception_type = exception_type;
        self.message = message.into();
        self.header.invalidate();
    }
}

impl MessageKind for SessionForcefullyTerminated {
    const VERB: Verb = Verb::SessionForcefullyTerminated;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            exception_type: ExceptionType::ChannelDisconnected,
            message: String::new(),
        }
    }
}

impl ProtocolMessage for SessionForcefullyTerminated {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_byte(self.exception_type.as_byte());
        writer.write_utf(&self.message)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.exception_type = ExceptionType::from_byte(reader.read_unsigned_byte()?);
        self.message = reader.read_utf()?;
        Ok(())
    }
}

header_only_message!(
    /// Stand-in for an unrecognized verb. Header only.
    InvalidMessage,
    Verb::InvalidMessage
);

/// A verb the protocol reserves (admin, export, import) with no payload
/// handling in this codec.
///
/// Any payload bytes are kept as-is so the message can be re-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedMessage {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl ReservedMessage {
    pub fn new(header: MessageHeader) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl ProtocolMessage for ReservedMessage {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_raw(&self.payload);
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.payload = reader.read_raw(reader.available())?.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod exception_tests {
    use std::sync::Arc;

    use super::*;
    use crate::header::SequenceGenerator;

    #[test]
    fn test_exception_type_tags() {
        for tag in 0u8..=20 {
            assert_eq!(ExceptionType::from_byte(tag).as_byte(), tag);
        }
        assert_eq!(ExceptionType::from_byte(12), ExceptionType::TransactionException);
        assert_eq!(ExceptionType::from_byte(200), ExceptionType::Unknown(200));
        assert_eq!(ExceptionType::Unknown(200).to_string(), "Unknown(200)");
    }

    #[test]
    fn test_exception_message_zero_code_is_bare() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let message = ExceptionMessage::new(&seq);
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes.len(), 56 + 4);

        let decoded = ExceptionMessage::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.server_code(), 0);
        assert_eq!(decoded.message(), "");
    }

    #[test]
    fn test_exception_message_round_trip() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut message = ExceptionMessage::new(&seq);
        message.set_exception(500, ExceptionType::RetryIoException, "try again");

        let bytes = message.to_bytes().unwrap();
        let decoded = ExceptionMessage::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.exception_type(), ExceptionType::RetryIoException);
    }

    #[test]
    fn test_session_terminated_round_trip() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut message = SessionForcefullyTerminated::new(&seq);
        message.set_reason(ExceptionType::SecurityException, "kicked");

        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes[56], 11);
        let decoded =
            SessionForcefullyTerminated::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.message(), "kicked");
        assert_eq!(decoded.exception_type(), ExceptionType::SecurityException);
    }

    #[test]
    fn test_reserved_message_keeps_payload() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut writer = ByteWriter::new();
        let header = MessageHeader::new(Verb::AdminRequest, &seq);
        header.write(&mut writer);
        writer.write_raw(&[1, 2, 3]);
        let total = writer.length() as i32;
        writer.write_int_at(0, total).unwrap();
        let bytes = writer.into_bytes();

        let mut decoded = ReservedMessage::new(MessageHeader::blank(Verb::AdminRequest));
        decoded.from_bytes(&bytes).unwrap();
        assert_eq!(decoded.payload(), &[1, 2, 3]);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }
}
