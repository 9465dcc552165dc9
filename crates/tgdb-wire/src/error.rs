//! Codec error types.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Result type for codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Coarse classification of a [`WireError`], mirroring the exception types
/// the server reports back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Stream bounds or data format failure.
    Io,
    /// Length field disagrees with the buffer, or a negative length was requested.
    InvalidMessageLength,
    /// Magic constant mismatch.
    BadMagic,
    /// Protocol version mismatch.
    ProtocolNotSupported,
    /// Decoded verb does not match the expected message.
    BadVerb,
    /// Credentials missing where the payload requires them.
    BadAuthentication,
    /// Misuse of a message, such as mutating a frozen header.
    General,
    /// Commit failure reported by the server.
    Transaction,
    /// Query failure reported by the server.
    Query,
}

/// The part of an encode or decode call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    /// Length check or header fields on decode.
    ReadHeader,
    /// Verb-specific payload on decode.
    ReadPayload,
    /// Header fields on encode.
    WriteHeader,
    /// Verb-specific payload on encode.
    WritePayload,
}

impl fmt::Display for CodecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadHeader => "reading header",
            Self::ReadPayload => "reading payload",
            Self::WriteHeader => "writing header",
            Self::WritePayload => "writing payload",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while encoding or decoding PDUs.
#[derive(Debug, Error)]
pub enum WireError {
    /// A read needed more bytes than remain in the buffer.
    #[error("end of data stream: need {needed} bytes, have {available}")]
    EndOfStream { needed: usize, available: usize },

    /// Bytes that do not follow the expected encoding.
    #[error("data format issue: {0}")]
    MalformedData(String),

    /// Generic I/O class failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// Length field does not match the buffer, or a negative length was requested.
    #[error("invalid message length: declared {declared}, actual {actual}")]
    InvalidMessageLength { declared: i64, actual: i64 },

    /// Magic constant mismatch.
    #[error("bad magic: expected 0x{expected:08x}, got 0x{actual:08x}")]
    BadMagic { expected: i32, actual: i32 },

    /// Unsupported protocol version.
    #[error("protocol version not supported: expected 0x{expected:04x}, got 0x{actual:04x}")]
    ProtocolNotSupported { expected: i16, actual: i16 },

    /// The buffer carries a different verb than the message being decoded.
    #[error("bad verb: expected {expected}, got {actual}")]
    BadVerb { expected: i16, actual: i16 },

    /// Attempt to mutate the header of a frozen message.
    #[error("mutating a read-only message")]
    ReadOnlyMessage,

    /// Authenticated payload written without credentials.
    #[error("message not authenticated")]
    NotAuthenticated,

    /// The server refused to hand out a large object.
    #[error("large object unavailable: server status {status}")]
    LargeObjectUnavailable { status: i32 },

    /// Commit failure reported by the server.
    #[error("transaction failed ({kind}): {message}")]
    Transaction {
        kind: TransactionErrorKind,
        message: String,
    },

    /// Query failure reported by the server.
    #[error("query failed ({kind}): {message}")]
    Query { kind: QueryErrorKind, message: String },

    /// A failure wrapped with the stage and message it happened in.
    #[error("{verb}: {stage} failed: {source}")]
    Stage {
        stage: CodecStage,
        verb: &'static str,
        /// The buffer being decoded, or the bytes written so far when encoding.
        buffer: Bytes,
        source: Box<WireError>,
    },
}

impl WireError {
    /// Creates a malformed-data error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData(message.into())
    }

    /// Creates a generic I/O class error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Wraps this error with the stage and verb that produced it.
    ///
    /// Errors that already carry a stage are returned unchanged.
    pub fn in_stage(self, stage: CodecStage, verb: &'static str, buffer: Bytes) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                verb,
                buffer,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through stage wrappers.
    pub fn root(&self) -> &WireError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::EndOfStream { .. } | Self::MalformedData(_) | Self::Io(_) => ErrorKind::Io,
            Self::InvalidMessageLength { .. } => ErrorKind::InvalidMessageLength,
            Self::BadMagic { .. } => ErrorKind::BadMagic,
            Self::ProtocolNotSupported { .. } | Self::LargeObjectUnavailable { .. } => {
                ErrorKind::ProtocolNotSupported
            }
            Self::BadVerb { .. } => ErrorKind::BadVerb,
            Self::NotAuthenticated => ErrorKind::BadAuthentication,
            Self::ReadOnlyMessage => ErrorKind::General,
            Self::Transaction { .. } => ErrorKind::Transaction,
            Self::Query { .. } => ErrorKind::Query,
            Self::Stage { .. } => ErrorKind::General,
        }
    }
}

// ============================================================================
// Server-reported failure kinds
// ============================================================================

/// Commit failures the server can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionErrorKind {
    Invalid,
    AlreadyInProgress,
    ClientDisconnected,
    MalFormed,
    GeneralError,
    VerificationError,
    InBadState,
    UniqueConstraintViolation,
    OptimisticLockFailed,
    ResourceExceeded,
    CurrentThreadNotInTransaction,
    UniqueIndexKeyAttributeNullError,
}

impl TransactionErrorKind {
    const ALL: [Self; 11] = [
        Self::AlreadyInProgress,
        Self::ClientDisconnected,
        Self::MalFormed,
        Self::GeneralError,
        Self::VerificationError,
        Self::InBadState,
        Self::UniqueConstraintViolation,
        Self::OptimisticLockFailed,
        Self::ResourceExceeded,
        Self::CurrentThreadNotInTransaction,
        Self::UniqueIndexKeyAttributeNullError,
    ];

    /// Returns the server status code for this kind.
    pub fn code(self) -> i32 {
        match self {
            Self::Invalid => -1,
            Self::AlreadyInProgress => 8001,
            Self::ClientDisconnected => 8002,
            Self::MalFormed => 8003,
            Self::GeneralError => 8004,
            Self::VerificationError => 8005,
            Self::InBadState => 8006,
            Self::UniqueConstraintViolation => 8007,
            Self::OptimisticLockFailed => 8008,
            Self::ResourceExceeded => 8009,
            Self::CurrentThreadNotInTransaction => 8010,
            Self::UniqueIndexKeyAttributeNullError => 8011,
        }
    }

    /// Maps a server status code to a kind. Unknown codes map to `Invalid`.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .unwrap_or(Self::Invalid)
    }
}

impl fmt::Display for TransactionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Query failures the server can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    Invalid,
    ProviderNotInitialized,
    ParsingError,
    StepNotSupported,
    StepNotAllowed,
    StepArgMissing,
    StepArgNotSupported,
    StepMissing,
    NotDefined,
    AttrDescNotFound,
    EdgeTypeNotFound,
    NodeTypeNotFound,
    InternalDataMismatchError,
    StepSignatureNotSupported,
    InvalidDataType,
    ExecSpFailure,
    SpNotFound,
    SpArgMissing,
    StepArgInvalid,
    StepModulationInvalid,
    AccessDenied,
}

impl QueryErrorKind {
    const ALL: [Self; 21] = [
        Self::Invalid,
        Self::ProviderNotInitialized,
        Self::ParsingError,
        Self::StepNotSupported,
        Self::StepNotAllowed,
        Self::StepArgMissing,
        Self::StepArgNotSupported,
        Self::StepMissing,
        Self::NotDefined,
        Self::AttrDescNotFound,
        Self::EdgeTypeNotFound,
        Self::NodeTypeNotFound,
        Self::InternalDataMismatchError,
        Self::StepSignatureNotSupported,
        Self::InvalidDataType,
        Self::ExecSpFailure,
        Self::SpNotFound,
        Self::SpArgMissing,
        Self::StepArgInvalid,
        Self::StepModulationInvalid,
        Self::AccessDenied,
    ];

    /// Returns the server status code for this kind.
    ///
    /// Codes are contiguous from 8100 in declaration order.
    pub fn code(self) -> i32 {
        let index = Self::ALL
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or_default();
        8100 + index as i32
    }

    /// Maps a server status code to a kind. Unknown codes map to `Invalid`.
    pub fn from_code(code: i32) -> Self {
        usize::try_from(code - 8100)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(Self::Invalid)
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_stage() {
        let err = WireError::BadMagic {
            expected: 1,
            actual: 2,
        }
        .in_stage(CodecStage::ReadHeader, "PingMessage", Bytes::new());

        assert_eq!(err.kind(), ErrorKind::BadMagic);
        assert!(matches!(err.root(), WireError::BadMagic { .. }));
        assert!(err.to_string().starts_with("PingMessage: reading header failed"));
    }

    #[test]
    fn test_in_stage_keeps_first_stage() {
        let err = WireError::ReadOnlyMessage
            .in_stage(CodecStage::WritePayload, "A", Bytes::new())
            .in_stage(CodecStage::WriteHeader, "B", Bytes::new());

        let WireError::Stage { stage, verb, .. } = err else {
            panic!("expected stage wrapper");
        };
        assert_eq!(stage, CodecStage::WritePayload);
        assert_eq!(verb, "A");
    }

    #[test]
    fn test_transaction_codes() {
        assert_eq!(
            TransactionErrorKind::from_code(8007),
            TransactionErrorKind::UniqueConstraintViolation
        );
        assert_eq!(TransactionErrorKind::from_code(8011).code(), 8011);
        assert_eq!(TransactionErrorKind::from_code(42), TransactionErrorKind::Invalid);
    }

    #[test]
    fn test_query_codes() {
        assert_eq!(QueryErrorKind::from_code(8100), QueryErrorKind::Invalid);
        assert_eq!(QueryErrorKind::from_code(8102), QueryErrorKind::ParsingError);
        assert_eq!(QueryErrorKind::AccessDenied.code(), 8120);
        assert_eq!(QueryErrorKind::from_code(7999), QueryErrorKind::Invalid);
        assert_eq!(QueryErrorKind::from_code(9000), QueryErrorKind::Invalid);
    }
}
