//! Verb registry.
//!
//! A verb is the numeric tag in the header that identifies a message's
//! payload shape. The ids are part of the wire contract and must not be
//! renumbered.

use std::fmt;

/// Every verb the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Ping,
    HandshakeRequest,
    HandshakeResponse,
    AuthenticateRequest,
    AuthenticateResponse,
    BeginTransactionRequest,
    BeginTransactionResponse,
    CommitTransactionRequest,
    CommitTransactionResponse,
    RollbackTransactionRequest,
    RollbackTransactionResponse,
    QueryRequest,
    QueryResponse,
    TraverseRequest,
    TraverseResponse,
    AdminRequest,
    AdminResponse,
    MetadataRequest,
    MetadataResponse,
    GetEntityRequest,
    GetEntityResponse,
    GetLargeObjectRequest,
    GetLargeObjectResponse,
    BeginExportRequest,
    BeginExportResponse,
    PartialExportRequest,
    PartialExportResponse,
    CancelExportRequest,
    BeginImportRequest,
    BeginImportResponse,
    PartialImportRequest,
    PartialImportResponse,
    DumpStacktraceRequest,
    DisconnectChannelRequest,
    SessionForcefullyTerminated,
    DecryptBufferRequest,
    DecryptBufferResponse,
    ExceptionMessage,
    InvalidMessage,
}

/// Static description of a verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbDescriptor {
    pub id: i32,
    pub name: &'static str,
    /// Rust type that carries this verb's payload.
    pub implementor: &'static str,
}

const fn descriptor(id: i32, name: &'static str, implementor: &'static str) -> VerbDescriptor {
    VerbDescriptor {
        id,
        name,
        implementor,
    }
}

const INVALID: VerbDescriptor = descriptor(-1, "InvalidMessage", "InvalidMessage");

/// The registry, ordered as [`Verb::ALL`].
static DESCRIPTORS: [VerbDescriptor; 39] = [
    descriptor(0, "PingMessage", "PingMessage"),
    descriptor(1, "HandshakeRequest", "HandshakeRequest"),
    descriptor(2, "HandshakeResponse", "HandshakeResponse"),
    descriptor(3, "AuthenticateRequest", "AuthenticateRequest"),
    descriptor(4, "AuthenticateResponse", "AuthenticateResponse"),
    descriptor(5, "BeginTransactionRequest", "BeginTransactionRequest"),
    descriptor(6, "BeginTransactionResponse", "BeginTransactionResponse"),
    descriptor(7, "CommitTransactionRequest", "CommitTransactionRequest"),
    descriptor(8, "CommitTransactionResponse", "CommitTransactionResponse"),
    descriptor(9, "RollbackTransactionRequest", "RollbackTransactionRequest"),
    descriptor(10, "RollbackTransactionResponse", "RollbackTransactionResponse"),
    descriptor(11, "QueryRequest", "QueryRequest"),
    descriptor(12, "QueryResponse", "QueryResponse"),
    descriptor(13, "TraverseRequest", "TraverseRequest"),
    descriptor(14, "TraverseResponse", "TraverseResponse"),
    descriptor(15, "AdminRequest", "ReservedMessage"),
    descriptor(16, "AdminResponse", "ReservedMessage"),
    descriptor(19, "MetadataRequest", "MetadataRequest"),
    descriptor(20, "MetadataResponse", "MetadataResponse"),
    descriptor(21, "GetEntityRequest", "GetEntityRequest"),
    descriptor(22, "GetEntityResponse", "GetEntityResponse"),
    descriptor(23, "GetLargeObjectRequest", "GetLargeObjectRequest"),
    descriptor(24, "GetLargeObjectResponse", "GetLargeObjectResponse"),
    descriptor(25, "BeginExportRequest", "ReservedMessage"),
    descriptor(26, "BeginExportResponse", "ReservedMessage"),
    descriptor(27, "PartialExportRequest", "ReservedMessage"),
    descriptor(28, "PartialExportResponse", "ReservedMessage"),
    descriptor(29, "CancelExportRequest", "ReservedMessage"),
    descriptor(31, "BeginImportRequest", "ReservedMessage"),
    descriptor(32, "BeginImportResponse", "ReservedMessage"),
    descriptor(33, "PartialImportRequest", "ReservedMessage"),
    descriptor(34, "PartialImportResponse", "ReservedMessage"),
    descriptor(39, "DumpStacktraceRequest", "DumpStacktraceRequest"),
    descriptor(40, "DisconnectChannelRequest", "DisconnectChannelRequest"),
    descriptor(41, "SessionForcefullyTerminated", "SessionForcefullyTerminated"),
    descriptor(44, "DecryptBufferRequest", "DecryptBufferRequest"),
    descriptor(45, "DecryptBufferResponse", "DecryptBufferResponse"),
    descriptor(100, "ExceptionMessage", "ExceptionMessage"),
    INVALID,
];

impl Verb {
    /// All verbs in registry order.
    pub const ALL: [Verb; 39] = [
        Verb::Ping,
        Verb::HandshakeRequest,
        Verb::HandshakeResponse,
        Verb::AuthenticateRequest,
        Verb::AuthenticateResponse,
        Verb::BeginTransactionRequest,
        Verb::BeginTransactionResponse,
        Verb::CommitTransactionRequest,
        Verb::CommitTransactionResponse,
        Verb::RollbackTransactionRequest,
        Verb::RollbackTransactionResponse,
        Verb::QueryRequest,
        Verb::QueryResponse,
        Verb::TraverseRequest,
        Verb::TraverseResponse,
        Verb::AdminRequest,
        Verb::AdminResponse,
        Verb::MetadataRequest,
        Verb::MetadataResponse,
        Verb::GetEntityRequest,
        Verb::GetEntityResponse,
        Verb::GetLargeObjectRequest,
        Verb::GetLargeObjectResponse,
        Verb::BeginExportRequest,
        Verb::BeginExportResponse,
        Verb::PartialExportRequest,
        Verb::PartialExportResponse,
        Verb::CancelExportRequest,
        Verb::BeginImportRequest,
        Verb::BeginImportResponse,
        Verb::PartialImportRequest,
        Verb::PartialImportResponse,
        Verb::DumpStacktraceRequest,
        Verb::DisconnectChannelRequest,
        Verb::SessionForcefullyTerminated,
        Verb::DecryptBufferRequest,
        Verb::DecryptBufferResponse,
        Verb::ExceptionMessage,
        Verb::InvalidMessage,
    ];

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|verb| *verb == self)
            .unwrap_or(Self::ALL.len() - 1)
    }

    /// Looks a verb up by its wire id.
    pub fn from_id(id: i32) -> Option<Verb> {
        DESCRIPTORS
            .iter()
            .position(|d| d.id == id)
            .map(|index| Self::ALL[index])
    }

    /// The registry entry for this verb.
    pub fn descriptor(self) -> &'static VerbDescriptor {
        &DESCRIPTORS[self.index()]
    }

    /// Wire id as written in the header.
    pub fn id(self) -> i16 {
        self.descriptor().id as i16
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Returns true for verbs the codec reserves but gives no payload.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
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
                | Verb::PartialImportResponse
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Looks up a descriptor by id, falling back to the invalid-message entry.
pub fn lookup(id: i32) -> &'static VerbDescriptor {
    DESCRIPTORS
        .iter()
        .find(|d| d.id == id)
        .unwrap_or(&DESCRIPTORS[DESCRIPTORS.len() - 1])
}

#[cfg(test)]
mod verb_tests {
    use super::*;

    #[test]
    fn test_wire_ids_are_fixed() {
        let expected: [(Verb, i16); 12] = [
            (Verb::Ping, 0),
            (Verb::HandshakeRequest, 1),
            (Verb::AuthenticateResponse, 4),
            (Verb::CommitTransactionRequest, 7),
            (Verb::QueryResponse, 12),
            (Verb::MetadataRequest, 19),
            (Verb::GetLargeObjectResponse, 24),
            (Verb::DumpStacktraceRequest, 39),
            (Verb::SessionForcefullyTerminated, 41),
            (Verb::DecryptBufferResponse, 45),
            (Verb::ExceptionMessage, 100),
            (Verb::InvalidMessage, -1),
        ];
        for (verb, id) in expected {
            assert_eq!(verb.id(), id, "{verb}");
        }
    }

    #[test]
    fn test_registry_is_consistent() {
        for verb in Verb::ALL {
            let id = i32::from(verb.id());
            assert_eq!(Verb::from_id(id), Some(verb));
            assert_eq!(lookup(id).name, verb.name());
        }
    }

    #[test]
    fn test_unknown_id_resolves_to_invalid() {
        for id in [17, 18, 30, 42, 99, 1000] {
            assert_eq!(Verb::from_id(id), None);
            assert_eq!(lookup(id).id, -1);
            assert_eq!(lookup(id).name, "InvalidMessage");
        }
    }

    #[test]
    fn test_reserved_verbs() {
        assert!(Verb::AdminRequest.is_reserved());
        assert!(Verb::PartialImportResponse.is_reserved());
        assert!(!Verb::MetadataRequest.is_reserved());
        assert_eq!(lookup(29).implementor, "ReservedMessage");
    }
}
