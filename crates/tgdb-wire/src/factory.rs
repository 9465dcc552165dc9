//! Verb dispatch: turns verb ids and raw buffers into typed messages.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::config::CodecConfig;
use crate::error::{CodecStage, WireError, WireResult};
use crate::header::{HEADER_SIZE, MAGIC, MessageHeader, PROTOCOL_VERSION, SequenceGenerator};
use crate::message::Message;
use crate::model::DecodeContext;
use crate::stream::ByteReader;
use crate::verb::Verb;

/// Verb name reported for failures before the verb is known.
const UNRESOLVED_VERB: &str = "<unresolved>";

/// Creates messages and decodes inbound buffers.
///
/// Every message the factory creates draws its sequence number from the
/// factory's counter and carries the configured tenant.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    config: CodecConfig,
    sequence: Arc<SequenceGenerator>,
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl MessageFactory {
    /// Creates a factory with its own sequence counter.
    pub fn new(config: CodecConfig) -> Self {
        let sequence = Arc::new(SequenceGenerator::new(config.initial_sequence));
        Self { config, sequence }
    }

    /// Creates a factory drawing from a shared sequence counter.
    pub fn with_sequence(config: CodecConfig, sequence: Arc<SequenceGenerator>) -> Self {
        Self { config, sequence }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn sequence(&self) -> &Arc<SequenceGenerator> {
        &self.sequence
    }

    /// Creates an empty mutable message for `verb_id`.
    pub fn create_message_for_verb(&self, verb_id: i32) -> WireResult<Message> {
        let verb = resolve(verb_id)?;
        let mut header = MessageHeader::new(verb, &self.sequence);
        header.set_tenant_id(self.config.tenant_id);
        debug!(verb = %verb, seq = header.sequence_no(), "created message");
        Ok(Message::from_header(header))
    }

    /// Like [`create_message_for_verb`](Self::create_message_for_verb), seeding
    /// the header credentials.
    ///
    /// Messages whose payload repeats the credentials pick them up from the header.
    pub fn create_message_with_token(
        &self,
        verb_id: i32,
        auth_token: i64,
        session_id: i64,
    ) -> WireResult<Message> {
        let verb = resolve(verb_id)?;
        let mut header =
            MessageHeader::with_credentials(verb, &self.sequence, auth_token, session_id);
        header.set_tenant_id(self.config.tenant_id);
        debug!(
            verb = %verb,
            seq = header.sequence_no(),
            session = session_id,
            "created authenticated message"
        );
        Ok(Message::from_header(header))
    }

    /// Reads just enough of `buf` to identify its verb.
    ///
    /// Checks the declared length against the buffer, then the magic and the
    /// protocol version. The payload is not touched.
    pub fn verb_id_from_bytes(&self, buf: &[u8]) -> WireResult<Verb> {
        self.check_size(buf.len())?;

        let mut reader = ByteReader::new(buf);
        let declared = reader.read_int()?;
        if i64::from(declared) != buf.len() as i64 {
            return Err(WireError::InvalidMessageLength {
                declared: i64::from(declared),
                actual: buf.len() as i64,
            });
        }

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
        resolve(i32::from(verb_id))
    }

    /// Decodes the message held in `buf[offset..offset + length]`.
    pub fn create_message_from_buffer(
        &self,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> WireResult<Message> {
        self.create_message_from_buffer_with(buf, offset, length, &mut DecodeContext::new())
    }

    /// Like [`create_message_from_buffer`](Self::create_message_from_buffer),
    /// using a session decode context.
    pub fn create_message_from_buffer_with(
        &self,
        buf: &[u8],
        offset: usize,
        length: usize,
        ctx: &mut DecodeContext,
    ) -> WireResult<Message> {
        let frame = offset
            .checked_add(length)
            .and_then(|end| buf.get(offset..end))
            .ok_or_else(|| {
                WireError::InvalidMessageLength {
                    declared: offset.saturating_add(length) as i64,
                    actual: buf.len() as i64,
                }
                .in_stage(CodecStage::ReadHeader, UNRESOLVED_VERB, Bytes::copy_from_slice(buf))
            })?;

        let verb = self.verb_id_from_bytes(frame).map_err(|e| {
            e.in_stage(CodecStage::ReadHeader, UNRESOLVED_VERB, Bytes::copy_from_slice(frame))
        })?;
        let mut message = Message::blank(verb);
        message.from_bytes_with(frame, ctx)?;
        debug!(
            verb = %verb,
            seq = message.header().sequence_no(),
            len = frame.len(),
            "decoded message from buffer"
        );
        Ok(message)
    }

    /// Decodes a whole buffer.
    pub fn decode(&self, buf: &[u8]) -> WireResult<Message> {
        self.create_message_from_buffer(buf, 0, buf.len())
    }

    /// Encodes `message` using the configured writer capacity.
    pub fn encode(&self, message: &Message) -> WireResult<Bytes> {
        message.to_bytes_with_capacity(self.config.initial_buffer_capacity)
    }

    fn check_size(&self, len: usize) -> WireResult<()> {
        if len < HEADER_SIZE {
            return Err(WireError::InvalidMessageLength {
                declared: HEADER_SIZE as i64,
                actual: len as i64,
            });
        }
        match self.config.max_message_length {
            Some(max) if len > max => Err(WireError::InvalidMessageLength {
                declared: len as i64,
                actual: max as i64,
            }),
            _ => Ok(()),
        }
    }
}

fn resolve(verb_id: i32) -> WireResult<Verb> {
    Verb::from_id(verb_id)
        .ok_or_else(|| WireError::io(format!("unable to resolve verb for id {verb_id}")))
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_create_message_for_every_verb() {
        let factory = MessageFactory::default();
        for verb in Verb::ALL {
            let message = factory.create_message_for_verb(i32::from(verb.id())).unwrap();
            assert_eq!(message.verb(), verb);
            assert!(message.header().is_updatable());
        }
        assert_eq!(factory.sequence().current(), Verb::ALL.len() as i64);
    }

    #[test]
    fn test_unknown_verb() {
        let factory = MessageFactory::default();
        let err = factory.create_message_for_verb(18).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("18"));
    }

    #[test]
    fn test_tenant_and_credentials_are_stamped() {
        let factory = MessageFactory::new(CodecConfig::default().with_tenant_id(9));
        let message = factory
            .create_message_with_token(i32::from(Verb::DisconnectChannelRequest.id()), 5, 6)
            .unwrap();

        assert_eq!(message.header().tenant_id(), 9);
        assert_eq!(message.header().auth_token(), 5);
        let Message::DisconnectChannelRequest(request) = &message else {
            panic!("unexpected message {message:?}");
        };
        assert_eq!(request.auth().session_id, 6);
    }

    #[test]
    fn test_initial_sequence() {
        let factory = MessageFactory::new(CodecConfig::default().with_initial_sequence(100));
        let message = factory.create_message_for_verb(0).unwrap();
        assert_eq!(message.header().sequence_no(), 101);
    }

    #[test]
    fn test_shared_sequence() {
        let sequence = Arc::new(SequenceGenerator::new(0));
        let a = MessageFactory::with_sequence(CodecConfig::default(), Arc::clone(&sequence));
        let b = MessageFactory::with_sequence(CodecConfig::default(), Arc::clone(&sequence));

        a.create_message_for_verb(0).unwrap();
        let second = b.create_message_for_verb(0).unwrap();
        assert_eq!(second.header().sequence_no(), 2);
    }

    #[test]
    fn test_verb_id_from_bytes_checks_framing() {
        let factory = MessageFactory::default();
        let bytes = factory.encode(&factory.create_message_for_verb(0).unwrap()).unwrap();
        assert_eq!(factory.verb_id_from_bytes(&bytes).unwrap(), Verb::Ping);

        let err = factory.verb_id_from_bytes(&bytes[..40]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMessageLength);

        let mut bad_version = bytes.to_vec();
        bad_version[8] = 2;
        let err = factory.verb_id_from_bytes(&bad_version).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolNotSupported);

        let mut bad_verb = bytes.to_vec();
        bad_verb[10..12].copy_from_slice(&18i16.to_be_bytes());
        assert_eq!(factory.verb_id_from_bytes(&bad_verb).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_max_message_length() {
        let factory = MessageFactory::new(CodecConfig::default().with_max_message_length(60));
        let mut message = factory.create_message_for_verb(44).unwrap();
        let Message::DecryptBufferRequest(request) = &mut message else {
            panic!("unexpected message");
        };
        request.set_encrypted(vec![1; 16]);
        let bytes = factory.encode(&message).unwrap();

        let err = factory.decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMessageLength);
    }

    #[test]
    fn test_create_message_from_sub_buffer() {
        let factory = MessageFactory::default();
        let message = factory.create_message_with_token(0, 7, 42).unwrap();
        let bytes = factory.encode(&message).unwrap();

        let mut framed = vec![0xAA; 3];
        framed.extend_from_slice(&bytes);
        framed.extend_from_slice(&[0xBB; 5]);

        let decoded = factory
            .create_message_from_buffer(&framed, 3, bytes.len())
            .unwrap();
        assert_eq!(decoded.header(), message.header());
        assert!(!decoded.header().is_updatable());

        let err = factory
            .create_message_from_buffer(&framed, 3, framed.len())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMessageLength);
        let WireError::Stage { stage, buffer, .. } = &err else {
            panic!("expected stage wrapper, got {err:?}");
        };
        assert_eq!(*stage, CodecStage::ReadHeader);
        assert_eq!(buffer.as_ref(), framed.as_slice());
    }

    #[test]
    fn test_header_failures_carry_stage_and_frame() {
        let factory = MessageFactory::default();
        let bytes = factory.encode(&factory.create_message_for_verb(0).unwrap()).unwrap();

        let mut bad_version = bytes.to_vec();
        bad_version[8] = 2;
        let mut bad_length = bytes.to_vec();
        bad_length[3] = 60;

        for frame in [&bytes[..40], bad_version.as_slice(), bad_length.as_slice()] {
            let err = factory.decode(frame).unwrap_err();
            let WireError::Stage { stage, buffer, .. } = &err else {
                panic!("expected stage wrapper, got {err:?}");
            };
            assert_eq!(*stage, CodecStage::ReadHeader);
            assert_eq!(buffer.as_ref(), frame);
        }
    }
}
