//! Connection setup and session lifecycle messages.

use crate::error::{WireError, WireResult};
use crate::header::{AuthPayload, MessageHeader};
use crate::message::{MessageKind, ProtocolMessage, write_count};
use crate::model::DecodeContext;
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

header_only_message!(
    /// Keep-alive with no payload.
    PingMessage,
    Verb::Ping
);

// ============================================================================
// Handshake
// ============================================================================

/// Stage of the client side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeRequestType {
    #[default]
    Invalid,
    Initiate,
    ChallengeAccepted,
}

impl HandshakeRequestType {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Initiate => 1,
            Self::ChallengeAccepted => 2,
        }
    }

    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::Initiate,
            2 => Self::ChallengeAccepted,
            _ => Self::Invalid,
        }
    }
}

/// Opens or continues the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    header: MessageHeader,
    request_type: HandshakeRequestType,
    ssl_mode: bool,
    challenge: i64,
}

impl HandshakeRequest {
    pub fn request_type(&self) -> HandshakeRequestType {
        self.request_type
    }

    pub fn set_request_type(&mut self, request_type: HandshakeRequestType) {
        self.request_type = request_type;
        self.header.invalidate();
    }

    pub fn ssl_mode(&self) -> bool {
        self.ssl_mode
    }

    pub fn set_ssl_mode(&mut self, ssl_mode: bool) {
        self.ssl_mode = ssl_mode;
        self.header.invalidate();
    }

    pub fn challenge(&self) -> i64 {
        self.challenge
    }

    pub fn set_challenge(&mut self, challenge: i64) {
        self.challenge = challenge;
        self.header.invalidate();
    }
}

impl MessageKind for HandshakeRequest {
    const VERB: Verb = Verb::HandshakeRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            request_type: HandshakeRequestType::Invalid,
            ssl_mode: false,
            challenge: 0,
        }
    }
}

impl ProtocolMessage for HandshakeRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_byte(self.request_type.as_byte());
        writer.write_bool(self.ssl_mode);
        writer.write_long(self.challenge);
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.request_type = HandshakeRequestType::from_byte(reader.read_unsigned_byte()?);
        self.ssl_mode = reader.read_bool()?;
        self.challenge = reader.read_long()?;
        Ok(())
    }
}

/// Server verdict on a handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeStatus {
    #[default]
    Invalid,
    AcceptChallenge,
    ProceedWithAuthentication,
    ChallengeFailed,
}

impl HandshakeStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::AcceptChallenge => 1,
            Self::ProceedWithAuthentication => 2,
            Self::ChallengeFailed => 3,
        }
    }

    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::AcceptChallenge,
            2 => Self::ProceedWithAuthentication,
            3 => Self::ChallengeFailed,
            _ => Self::Invalid,
        }
    }
}

/// Server reply to a handshake request.
///
/// The error message is on the wire only when the challenge failed.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    header: MessageHeader,
    status: HandshakeStatus,
    challenge: i64,
    error_message: Option<String>,
}

impl HandshakeResponse {
    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    pub fn set_status(&mut self, status: HandshakeStatus) {
        self.status = status;
        self.header.invalidate();
    }

    pub fn challenge(&self) -> i64 {
        self.challenge
    }

    pub fn set_challenge(&mut self, challenge: i64) {
        self.challenge = challenge;
        self.header.invalidate();
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.header.invalidate();
    }
}

impl MessageKind for HandshakeResponse {
    const VERB: Verb = Verb::HandshakeResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            status: HandshakeStatus::Invalid,
            challenge: 0,
            error_message: None,
        }
    }
}

impl ProtocolMessage for HandshakeResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_byte(self.status.as_byte());
        writer.write_long(self.challenge);
        if self.status == HandshakeStatus::ChallengeFailed {
            let message = self.error_message.as_deref().unwrap_or_default();
            writer.write_bytes(message.as_bytes())?;
        }
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.status = HandshakeStatus::from_byte(reader.read_unsigned_byte()?);
        self.challenge = reader.read_long()?;
        self.error_message = None;
        if self.status == HandshakeStatus::ChallengeFailed {
            let raw = reader.read_bytes()?;
            let message = String::from_utf8(raw)
                .map_err(|_| WireError::malformed("handshake error message is not UTF-8"))?;
            self.error_message = Some(message);
        }
        Ok(())
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Credentials and session scoping sent after a successful handshake.
///
/// Empty strings are treated as absent, both when writing and after decode.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticateRequest {
    header: MessageHeader,
    database_name: Option<String>,
    client_id: Option<String>,
    inbox_address: Option<String>,
    roles: Option<Vec<String>>,
    username: Option<String>,
    password: Vec<u8>,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    (!value.is_empty()).then_some(value)
}

/// Writes `true` for an absent string, or `false` followed by the string.
fn write_optional_utf(writer: &mut ByteWriter, value: Option<&str>) -> WireResult<()> {
    match value.filter(|v| !v.is_empty()) {
        None => {
            writer.write_bool(true);
            Ok(())
        }
        Some(v) => {
            writer.write_bool(false);
            writer.write_utf(v)
        }
    }
}

fn read_optional_utf(reader: &mut ByteReader<'_>) -> WireResult<Option<String>> {
    if reader.read_bool()? {
        return Ok(None);
    }
    Ok(non_empty(reader.read_utf()?))
}

impl AuthenticateRequest {
    pub fn database_name(&self) -> &str {
        self.database_name.as_deref().unwrap_or_default()
    }

    pub fn set_database_name(&mut self, name: impl Into<String>) {
        self.database_name = non_empty(name);
        self.header.invalidate();
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = non_empty(client_id);
        self.header.invalidate();
    }

    pub fn inbox_address(&self) -> &str {
        self.inbox_address.as_deref().unwrap_or_default()
    }

    pub fn set_inbox_address(&mut self, address: impl Into<String>) {
        self.inbox_address = non_empty(address);
        self.header.invalidate();
    }

    /// Roles to scope the session to. `None` means every role the user holds.
    pub fn roles(&self) -> Option<&[String]> {
        self.roles.as_deref()
    }

    pub fn set_roles(&mut self, roles: Option<Vec<String>>) {
        self.roles = roles;
        self.header.invalidate();
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = non_empty(username);
        self.header.invalidate();
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn set_password(&mut self, password: impl Into<Vec<u8>>) {
        self.password = password.into();
        self.header.invalidate();
    }
}

impl MessageKind for AuthenticateRequest {
    const VERB: Verb = Verb::AuthenticateRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            database_name: None,
            client_id: None,
            inbox_address: None,
            roles: None,
            username: None,
            password: Vec::new(),
        }
    }
}

impl ProtocolMessage for AuthenticateRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        write_optional_utf(writer, self.database_name.as_deref())?;
        write_optional_utf(writer, self.client_id.as_deref())?;
        write_optional_utf(writer, self.inbox_address.as_deref())?;

        match &self.roles {
            None => writer.write_int(-1),
            Some(roles) => {
                write_count(writer, roles.len())?;
                for role in roles {
                    writer.write_utf(role)?;
                }
            }
        }

        write_optional_utf(writer, self.username.as_deref())?;
        writer.write_bytes(&self.password)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.database_name = read_optional_utf(reader)?;
        self.client_id = read_optional_utf(reader)?;
        self.inbox_address = read_optional_utf(reader)?;

        let role_count = reader.read_int()?;
        self.roles = if role_count < 0 {
            None
        } else {
            let mut roles = Vec::with_capacity((role_count as usize).min(reader.available()));
            for _ in 0..role_count {
                roles.push(reader.read_utf()?);
            }
            Some(roles)
        };

        self.username = read_optional_utf(reader)?;
        self.password = reader.read_bytes()?;
        Ok(())
    }
}

/// Outcome of authentication, carrying the session credentials on success.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticateResponse {
    header: MessageHeader,
    success: bool,
    error_status: Option<i32>,
    auth_token: i64,
    session_id: i64,
    server_cert: Vec<u8>,
}

impl AuthenticateResponse {
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Marks the response successful, clearing any error status.
    pub fn set_success(&mut self) {
        self.success = true;
        self.error_status = None;
        self.header.invalidate();
    }

    /// Marks the response failed with the given status.
    pub fn set_failure(&mut self, error_status: i32) {
        self.success = false;
        self.error_status = Some(error_status);
        self.header.invalidate();
    }

    pub fn error_status(&self) -> Option<i32> {
        self.error_status
    }

    pub fn auth_token(&self) -> i64 {
        self.auth_token
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn set_credentials(&mut self, auth_token: i64, session_id: i64) {
        self.auth_token = auth_token;
        self.session_id = session_id;
        self.header.invalidate();
    }

    pub fn server_cert(&self) -> &[u8] {
        &self.server_cert
    }

    pub fn set_server_cert(&mut self, cert: impl Into<Vec<u8>>) {
        self.server_cert = cert.into();
        self.header.invalidate();
    }
}

impl MessageKind for AuthenticateResponse {
    const VERB: Verb = Verb::AuthenticateResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            success: false,
            error_status: None,
            auth_token: -1,
            session_id: -1,
            server_cert: Vec::new(),
        }
    }
}

impl ProtocolMessage for AuthenticateResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_bool(self.success);
        if !self.success {
            writer.write_int(self.error_status.unwrap_or(-1));
        }
        writer.write_long(self.auth_token);
        writer.write_long(self.session_id);
        writer.write_bytes(&self.server_cert)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.success = reader.read_bool()?;
        self.error_status = if self.success {
            None
        } else {
            Some(reader.read_int()?)
        };
        self.auth_token = reader.read_long()?;
        self.session_id = reader.read_long()?;
        self.server_cert = reader.read_bytes()?;
        Ok(())
    }
}

// ============================================================================
// Session Control
// ============================================================================

header_only_message!(
    /// Asks the server to dump its thread stacks. No payload.
    DumpStacktraceRequest,
    Verb::DumpStacktraceRequest
);

/// Tells the server the client is closing the channel.
///
/// The payload repeats the session credentials and cannot be written
/// without them.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectChannelRequest {
    header: MessageHeader,
    auth: AuthPayload,
}

impl DisconnectChannelRequest {
    pub fn auth(&self) -> AuthPayload {
        self.auth
    }

    pub fn set_auth(&mut self, auth: AuthPayload) {
        self.auth = auth;
        self.header.invalidate();
    }
}

impl MessageKind for DisconnectChannelRequest {
    const VERB: Verb = Verb::DisconnectChannelRequest;

    fn from_header(header: MessageHeader) -> Self {
        let auth = AuthPayload::new(header.auth_token(), header.session_id());
        Self { header, auth }
    }
}

impl ProtocolMessage for DisconnectChannelRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        self.auth.write(writer)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.auth = AuthPayload::read(reader)?;
        Ok(())
    }
}
