//! Transaction lifecycle messages.
//!
//! A commit request carries the client's pending changes as tagged
//! sections. The response maps temporary ids to the ones the server
//! assigned and may end with a stream of refreshed entities.
//!
//! ```text
//! commit request payload
//! +--------+----------+---------------------------------------------+
//! | len:i32| crc:i32  | [marker:i16 count:i32 object...] repeated   |
//! +--------+----------+---------------------------------------------+
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{TransactionErrorKind, WireError, WireResult};
use crate::header::MessageHeader;
use crate::message::{
    MessageKind, ProtocolMessage, backpatch_length, read_count, write_count,
};
use crate::model::{AttributeDescriptor, DecodeContext, Entity};
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

/// Section holding attribute descriptors created in this transaction.
pub const SECTION_ATTRIBUTE_DESCRIPTORS: i16 = 0x1010;
/// Section holding new entities.
pub const SECTION_ADDED_ENTITIES: i16 = 0x1011;
/// Section holding modified entities.
pub const SECTION_UPDATED_ENTITIES: i16 = 0x1012;
/// Section holding deleted entities.
pub const SECTION_REMOVED_ENTITIES: i16 = 0x1013;
/// Trailing stream of entities refreshed by the commit.
pub const SECTION_ENTITY_STREAM: i16 = 0x6789;

header_only_message!(
    /// Opens a transaction.
    BeginTransactionRequest,
    Verb::BeginTransactionRequest
);

header_only_message!(
    /// Abandons the open transaction.
    RollbackTransactionRequest,
    Verb::RollbackTransactionRequest
);

header_only_message!(RollbackTransactionResponse, Verb::RollbackTransactionResponse);

/// Carries the id of the transaction the server opened.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginTransactionResponse {
    header: MessageHeader,
    transaction_id: i64,
}

impl BeginTransactionResponse {
    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }

    pub fn set_transaction_id(&mut self, transaction_id: i64) {
        self.transaction_id = transaction_id;
        self.header.invalidate();
    }
}

impl MessageKind for BeginTransactionResponse {
    const VERB: Verb = Verb::BeginTransactionResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            transaction_id: -1,
        }
    }
}

impl ProtocolMessage for BeginTransactionResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        writer.write_long(self.transaction_id);
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        self.transaction_id = reader.read_long()?;
        Ok(())
    }
}

// ============================================================================
// Commit Request
// ============================================================================

/// The client's pending changes.
///
/// Only descriptors with a negative (temporary) attribute id are sent. Each
/// entity section is omitted when empty, so a commit with no changes is
/// just the length and checksum.
#[derive(Debug, Clone)]
pub struct CommitTransactionRequest {
    header: MessageHeader,
    added: Vec<Arc<dyn Entity>>,
    updated: Vec<Arc<dyn Entity>>,
    removed: Vec<Arc<dyn Entity>>,
    attribute_descriptors: Vec<Arc<dyn AttributeDescriptor>>,
    raw_sections: Bytes,
}

impl CommitTransactionRequest {
    pub fn add_entity(&mut self, entity: Arc<dyn Entity>) {
        self.added.push(entity);
        self.header.invalidate();
    }

    pub fn update_entity(&mut self, entity: Arc<dyn Entity>) {
        self.updated.push(entity);
        self.header.invalidate();
    }

    pub fn remove_entity(&mut self, entity: Arc<dyn Entity>) {
        self.removed.push(entity);
        self.header.invalidate();
    }

    pub fn add_attribute_descriptor(&mut self, descriptor: Arc<dyn AttributeDescriptor>) {
        self.attribute_descriptors.push(descriptor);
        self.header.invalidate();
    }

    pub fn added_entities(&self) -> &[Arc<dyn Entity>] {
        &self.added
    }

    pub fn updated_entities(&self) -> &[Arc<dyn Entity>] {
        &self.updated
    }

    pub fn removed_entities(&self) -> &[Arc<dyn Entity>] {
        &self.removed
    }

    pub fn attribute_descriptors(&self) -> &[Arc<dyn AttributeDescriptor>] {
        &self.attribute_descriptors
    }

    /// Section bytes of a decoded request, kept unparsed.
    ///
    /// Entities cannot be rebuilt without the client's object model, so a
    /// decoded request exposes its sections as they arrived.
    pub fn raw_sections(&self) -> &Bytes {
        &self.raw_sections
    }

    fn write_entities(
        writer: &mut ByteWriter,
        marker: i16,
        entities: &[Arc<dyn Entity>],
    ) -> WireResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        writer.write_short(marker);
        write_count(writer, entities.len())?;
        for entity in entities {
            entity.write_external(writer)?;
        }
        Ok(())
    }
}

impl MessageKind for CommitTransactionRequest {
    const VERB: Verb = Verb::CommitTransactionRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            attribute_descriptors: Vec::new(),
            raw_sections: Bytes::new(),
        }
    }
}

impl ProtocolMessage for CommitTransactionRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        let start = writer.position();
        writer.write_int(0);
        writer.write_int(0); // checksum

        let new_descriptors: Vec<_> = self
            .attribute_descriptors
            .iter()
            .filter(|d| d.attribute_id() < 0)
            .collect();
        if !new_descriptors.is_empty() {
            writer.write_short(SECTION_ATTRIBUTE_DESCRIPTORS);
            write_count(writer, new_descriptors.len())?;
            for descriptor in new_descriptors {
                descriptor.write_external(writer)?;
            }
        }

        Self::write_entities(writer, SECTION_ADDED_ENTITIES, &self.added)?;
        Self::write_entities(writer, SECTION_UPDATED_ENTITIES, &self.updated)?;
        Self::write_entities(writer, SECTION_REMOVED_ENTITIES, &self.removed)?;

        backpatch_length(writer, start)?;
        debug!(
            added = self.added.len(),
            updated = self.updated.len(),
            removed = self.removed.len(),
            "wrote commit sections"
        );
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        let start = reader.position();
        let len = reader.read_int()?;
        let _checksum = reader.read_int()?;

        let consumed = reader.position() - start;
        let section_len = usize::try_from(len)
            .ok()
            .and_then(|len| len.checked_sub(consumed))
            .ok_or_else(|| WireError::malformed(format!("commit length {len} is too short")))?;

        self.added.clear();
        self.updated.clear();
        self.removed.clear();
        self.attribute_descriptors.clear();
        self.raw_sections = Bytes::copy_from_slice(reader.read_raw(section_len)?);
        Ok(())
    }
}

// ============================================================================
// Commit Response
// ============================================================================

/// Server-assigned id for an attribute descriptor created in the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeIdMapping {
    pub temp_id: i32,
    pub real_id: i32,
}

/// Server-assigned id and initial version for an added entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityIdMapping {
    pub temp_id: i64,
    pub real_id: i64,
    pub version: i64,
}

/// New version of an updated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityVersion {
    pub id: i64,
    pub version: i64,
}

/// Result of a commit.
///
/// A nonzero status makes decoding fail with [`WireError::Transaction`].
/// Unknown section markers are skipped with a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitTransactionResponse {
    header: MessageHeader,
    status: i32,
    error_message: Option<String>,
    attribute_ids: Vec<AttributeIdMapping>,
    added: Vec<EntityIdMapping>,
    updated: Vec<EntityVersion>,
    removed: Vec<i64>,
    entity_count: i32,
    entity_stream: Bytes,
}

impl CommitTransactionResponse {
    pub fn status(&self) -> i32 {
        self.status
    }

    /// The failure kind, when the server reported one.
    pub fn error_kind(&self) -> Option<TransactionErrorKind> {
        (self.status != 0).then(|| TransactionErrorKind::from_code(self.status))
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Marks the commit failed with the given server code.
    pub fn set_failure(&mut self, kind: TransactionErrorKind, message: impl Into<String>) {
        self.status = kind.code();
        self.error_message = Some(message.into());
        self.header.invalidate();
    }

    pub fn attribute_ids(&self) -> &[AttributeIdMapping] {
        &self.attribute_ids
    }

    pub fn added_ids(&self) -> &[EntityIdMapping] {
        &self.added
    }

    pub fn updated_versions(&self) -> &[EntityVersion] {
        &self.updated
    }

    pub fn removed_ids(&self) -> &[i64] {
        &self.removed
    }

    pub fn set_attribute_ids(&mut self, ids: Vec<AttributeIdMapping>) {
        self.attribute_ids = ids;
        self.header.invalidate();
    }

    pub fn set_added_ids(&mut self, ids: Vec<EntityIdMapping>) {
        self.added = ids;
        self.header.invalidate();
    }

    pub fn set_updated_versions(&mut self, versions: Vec<EntityVersion>) {
        self.updated = versions;
        self.header.invalidate();
    }

    pub fn set_removed_ids(&mut self, ids: Vec<i64>) {
        self.removed = ids;
        self.header.invalidate();
    }

    /// Refreshed entities, starting at their `i32` count. Empty if absent.
    pub fn entity_stream(&self) -> &Bytes {
        &self.entity_stream
    }

    /// Number of entities announced at the head of the entity stream.
    pub fn entity_count(&self) -> i32 {
        self.entity_count
    }

    /// Sets the entity stream. It must start with its `i32` entity count.
    pub fn set_entity_stream(&mut self, stream: Bytes) -> WireResult<()> {
        self.entity_count = ByteReader::new(&stream).peek_int()?;
        self.entity_stream = stream;
        self.header.invalidate();
        Ok(())
    }

    fn read_sections(&mut self, reader: &mut ByteReader<'_>) -> WireResult<()> {
        while reader.available() > 0 {
            let marker = reader.read_short()?;
            match marker {
                SECTION_ATTRIBUTE_DESCRIPTORS => {
                    let count = read_count(reader)?;
                    self.attribute_ids.reserve(count.min(reader.available() / 8));
                    for _ in 0..count {
                        self.attribute_ids.push(AttributeIdMapping {
                            temp_id: reader.read_int()?,
                            real_id: reader.read_int()?,
                        });
                    }
                }
                SECTION_ADDED_ENTITIES => {
                    let count = read_count(reader)?;
                    self.added.reserve(count.min(reader.available() / 24));
                    for _ in 0..count {
                        self.added.push(EntityIdMapping {
                            temp_id: reader.read_long()?,
                            real_id: reader.read_long()?,
                            version: reader.read_long()?,
                        });
                    }
                }
                SECTION_UPDATED_ENTITIES => {
                    let count = read_count(reader)?;
                    self.updated.reserve(count.min(reader.available() / 16));
                    for _ in 0..count {
                        self.updated.push(EntityVersion {
                            id: reader.read_long()?,
                            version: reader.read_long()?,
                        });
                    }
                }
                SECTION_REMOVED_ENTITIES => {
                    let count = read_count(reader)?;
                    self.removed.reserve(count.min(reader.available() / 8));
                    for _ in 0..count {
                        self.removed.push(reader.read_long()?);
                    }
                }
                SECTION_ENTITY_STREAM => {
                    self.entity_count = reader.peek_int()?;
                    debug!(count = self.entity_count, "commit response carries entity stream");
                    self.entity_stream =
                        Bytes::copy_from_slice(reader.read_raw(reader.available())?);
                    break;
                }
                other => {
                    warn!(marker = other, "skipping unknown commit response section");
                }
            }
        }
        Ok(())
    }
}

impl MessageKind for CommitTransactionResponse {
    const VERB: Verb = Verb::CommitTransactionResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            status: 0,
            error_message: None,
            attribute_ids: Vec::new(),
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            entity_count: 0,
            entity_stream: Bytes::new(),
        }
    }
}

impl ProtocolMessage for CommitTransactionResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        let start = writer.position();
        writer.write_int(0);
        writer.write_int(0); // checksum
        writer.write_int(self.status);

        if self.status != 0 {
            writer.write_utf(self.error_message.as_deref().unwrap_or_default())?;
            return backpatch_length(writer, start);
        }

        if !self.attribute_ids.is_empty() {
            writer.write_short(SECTION_ATTRIBUTE_DESCRIPTORS);
            write_count(writer, self.attribute_ids.len())?;
            for mapping in &self.attribute_ids {
                writer.write_int(mapping.temp_id);
                writer.write_int(mapping.real_id);
            }
        }
        if !self.added.is_empty() {
            writer.write_short(SECTION_ADDED_ENTITIES);
            write_count(writer, self.added.len())?;
            for mapping in &self.added {
                writer.write_long(mapping.temp_id);
                writer.write_long(mapping.real_id);
                writer.write_long(mapping.version);
            }
        }
        if !self.updated.is_empty() {
            writer.write_short(SECTION_UPDATED_ENTITIES);
            write_count(writer, self.updated.len())?;
            for entry in &self.updated {
                writer.write_long(entry.id);
                writer.write_long(entry.version);
            }
        }
        if !self.removed.is_empty() {
            writer.write_short(SECTION_REMOVED_ENTITIES);
            write_count(writer, self.removed.len())?;
            for id in &self.removed {
                writer.write_long(*id);
            }
        }
        if !self.entity_stream.is_empty() {
            writer.write_short(SECTION_ENTITY_STREAM);
            writer.write_raw(&self.entity_stream);
        }

        backpatch_length(writer, start)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        let _len = reader.read_int()?;
        let _checksum = reader.read_int()?;
        self.status = reader.read_int()?;

        self.error_message = None;
        self.attribute_ids.clear();
        self.added.clear();
        self.updated.clear();
        self.removed.clear();
        self.entity_count = 0;
        self.entity_stream = Bytes::new();

        if self.status != 0 {
            let message = reader.read_utf()?;
            let kind = TransactionErrorKind::from_code(self.status);
            warn!(status = self.status, %kind, "commit rejected by server");
            self.error_message = Some(message.clone());
            return Err(WireError::Transaction { kind, message });
        }

        self.read_sections(reader)
    }
}
