//! Server-side decryption of encrypted attribute values.

use crate::error::{WireError, WireResult};
use crate::header::MessageHeader;
use crate::message::{MessageKind, ProtocolMessage};
use crate::model::DecodeContext;
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

/// Ciphertext for the server to decrypt.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptBufferRequest {
    header: MessageHeader,
    encrypted: Vec<u8>,
}

impl DecryptBufferRequest {
    pub fn encrypted(&self) -> &[u8] {
        &self.encrypted
    }

    pub fn set_encrypted(&mut self, buf: impl Into<Vec<u8>>) {
        self.encrypted = buf.into();
        self.header.invalidate();
    }
}

impl MessageKind for DecryptBufferRequest {
    const VERB: Verb = Verb::DecryptBufferRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            encrypted: Vec::new(),
        }
    }
}

impl ProtocolMessage for DecryptBufferRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        if self.encrypted.is_empty() {
            return Err(WireError::malformed("encrypted buffer is empty"));
        }
        writer.write_bytes(&self.encrypted)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.encrypted = reader.read_bytes()?;
        Ok(())
    }
}

/// Plaintext returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptBufferResponse {
    header: MessageHeader,
    decrypted: Vec<u8>,
}

impl DecryptBufferResponse {
    pub fn decrypted(&self) -> &[u8] {
        &self.decrypted
    }

    pub fn set_decrypted(&mut self, buf: impl Into<Vec<u8>>) {
        self.decrypted = buf.into();
        self.header.invalidate();
    }
}

impl MessageKind for DecryptBufferResponse {
    const VERB: Verb = Verb::DecryptBufferResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            decrypted: Vec::new(),
        }
    }
}

impl ProtocolMessage for DecryptBufferResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_bytes(&self.decrypted)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.decrypted = reader.read_bytes()?;
        Ok(())
    }
}

#[cfg(test)]
mod crypto_tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::CodecStage;
    use crate::header::SequenceGenerator;

    #[test]
    fn test_empty_buffer_is_rejected() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let request = DecryptBufferRequest::new(&seq);
        let err = request.to_bytes().unwrap_err();

        let WireError::Stage { stage, buffer, .. } = &err else {
            panic!("expected stage wrapper, got {err:?}");
        };
        assert_eq!(*stage, CodecStage::WritePayload);
        assert_eq!(buffer.len(), 56);
        assert!(err.to_string().contains("encrypted buffer is empty"));
    }

    #[test]
    fn test_decrypt_round_trip() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut request = DecryptBufferRequest::with_credentials(&seq, 1, 2);
        request.set_encrypted(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = request.to_bytes().unwrap();
        assert_eq!(&bytes[56..60], &4i32.to_be_bytes());

        let decoded = DecryptBufferRequest::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.encrypted(), &[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut response = DecryptBufferResponse::new(&seq);
        response.set_decrypted(b"plain".to_vec());
        let decoded =
            DecryptBufferResponse::decode(&response.to_bytes().unwrap(), &mut DecodeContext::new())
                .unwrap();
        assert_eq!(decoded.decrypted(), b"plain");
    }
}
