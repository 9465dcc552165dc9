//! Schema metadata download.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{WireError, WireResult};
use crate::header::MessageHeader;
use crate::message::{MessageKind, ProtocolMessage, write_count};
use crate::model::{AttributeDescriptor, DecodeContext, EntityType, SystemType};
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

header_only_message!(
    /// Asks for the schema: attribute descriptors, node types and edge types.
    MetadataRequest,
    Verb::MetadataRequest
);

/// The server's schema.
///
/// The payload is a total object count followed by groups, each tagged with
/// a system type and its own count. Objects are created through the decode
/// context's object factory and fill themselves in. Node types whose names
/// start with `@` or `$` are internal and dropped.
#[derive(Debug, Clone)]
pub struct MetadataResponse {
    header: MessageHeader,
    attribute_descriptors: Vec<Arc<dyn AttributeDescriptor>>,
    node_types: Vec<Arc<dyn EntityType>>,
    edge_types: Vec<Arc<dyn EntityType>>,
}

impl MetadataResponse {
    pub fn attribute_descriptors(&self) -> &[Arc<dyn AttributeDescriptor>] {
        &self.attribute_descriptors
    }

    pub fn node_types(&self) -> &[Arc<dyn EntityType>] {
        &self.node_types
    }

    pub fn edge_types(&self) -> &[Arc<dyn EntityType>] {
        &self.edge_types
    }

    pub fn add_attribute_descriptor(&mut self, descriptor: Arc<dyn AttributeDescriptor>) {
        self.attribute_descriptors.push(descriptor);
        self.header.invalidate();
    }

    pub fn add_node_type(&mut self, node_type: Arc<dyn EntityType>) {
        self.node_types.push(node_type);
        self.header.invalidate();
    }

    pub fn add_edge_type(&mut self, edge_type: Arc<dyn EntityType>) {
        self.edge_types.push(edge_type);
        self.header.invalidate();
    }

    fn is_internal_type(name: &str) -> bool {
        name.starts_with('@') || name.starts_with('$')
    }
}

impl MessageKind for MetadataResponse {
    const VERB: Verb = Verb::MetadataResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            attribute_descriptors: Vec::new(),
            node_types: Vec::new(),
            edge_types: Vec::new(),
        }
    }
}

impl ProtocolMessage for MetadataResponse {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        let total =
            self.attribute_descriptors.len() + self.node_types.len() + self.edge_types.len();
        write_count(writer, total)?;

        if !self.attribute_descriptors.is_empty() {
            writer.write_byte(SystemType::AttributeDescriptor.as_byte() as u8);
            write_count(writer, self.attribute_descriptors.len())?;
            for descriptor in &self.attribute_descriptors {
                descriptor.write_external(writer)?;
            }
        }
        for (tag, types) in [
            (SystemType::NodeType, &self.node_types),
            (SystemType::EdgeType, &self.edge_types),
        ] {
            if types.is_empty() {
                continue;
            }
            writer.write_byte(tag.as_byte() as u8);
            write_count(writer, types.len())?;
            for entity_type in types {
                entity_type.write_external(writer)?;
            }
        }
        Ok(())
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        if reader.available() == 0 {
            return Err(WireError::malformed("metadata response has no data"));
        }

        self.attribute_descriptors.clear();
        self.node_types.clear();
        self.edge_types.clear();

        let mut remaining = reader.read_int()?;
        if remaining <= 0 {
            return Ok(());
        }
        let factory = ctx
            .object_factory()
            .cloned()
            .ok_or_else(|| WireError::io("no object factory to materialize metadata"))?;

        while remaining > 0 {
            let tag = reader.read_byte()?;
            let count = reader.read_int()?;
            if count < 0 {
                return Err(WireError::malformed(format!(
                    "negative count {count} for system type {tag}"
                )));
            }

            match SystemType::from_byte(tag) {
                SystemType::AttributeDescriptor => {
                    for _ in 0..count {
                        let mut descriptor = factory.create_attribute_descriptor();
                        descriptor.read_external(reader, ctx)?;
                        self.attribute_descriptors.push(Arc::from(descriptor));
                    }
                }
                SystemType::NodeType => {
                    for _ in 0..count {
                        let mut node_type = factory.create_node_type();
                        node_type.read_external(reader, ctx)?;
                        if Self::is_internal_type(node_type.name()) {
                            warn!(name = node_type.name(), "skipping internal node type");
                            continue;
                        }
                        self.node_types.push(Arc::from(node_type));
                    }
                }
                SystemType::EdgeType => {
                    for _ in 0..count {
                        let mut edge_type = factory.create_edge_type();
                        edge_type.read_external(reader, ctx)?;
                        self.edge_types.push(Arc::from(edge_type));
                    }
                }
                _ => {
                    return Err(WireError::malformed(format!(
                        "invalid metadata system type {tag}"
                    )));
                }
            }
            remaining -= count;
        }

        debug!(
            attributes = self.attribute_descriptors.len(),
            node_types = self.node_types.len(),
            edge_types = self.edge_types.len(),
            "read metadata"
        );
        Ok(())
    }
}

#[cfg(test)]
mod metadata_tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::header::SequenceGenerator;
    use crate::model::{ExternalObject, GraphObjectFactory};

    #[derive(Debug, Default)]
    struct Named(String);

    impl ExternalObject for Named {
        fn write_external(&self, writer: &mut ByteWriter) -> WireResult<()> {
            writer.write_utf(&self.0)
        }

        fn read_external(
            &mut self,
            reader: &mut ByteReader<'_>,
            _ctx: &mut DecodeContext,
        ) -> WireResult<()> {
            self.0 = reader.read_utf()?;
            Ok(())
        }
    }

    impl EntityType for Named {
        fn name(&self) -> &str {
            &self.0
        }
    }

    impl AttributeDescriptor for Named {
        fn attribute_id(&self) -> i64 {
            1
        }

        fn name(&self) -> &str {
            &self.0
        }
    }

    struct Factory;

    impl GraphObjectFactory for Factory {
        fn create_attribute_descriptor(&self) -> Box<dyn AttributeDescriptor> {
            Box::new(Named::default())
        }

        fn create_node_type(&self) -> Box<dyn EntityType> {
            Box::new(Named::default())
        }

        fn create_edge_type(&self) -> Box<dyn EntityType> {
            Box::new(Named::default())
        }
    }

    fn named(name: &str) -> Arc<Named> {
        Arc::new(Named(name.to_string()))
    }

    #[test]
    fn test_metadata_round_trip_skips_internal_types() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut response = MetadataResponse::new(&seq);
        response.add_attribute_descriptor(named("age"));
        response.add_node_type(named("person"));
        response.add_node_type(named("@system"));
        response.add_node_type(named("$hidden"));
        response.add_edge_type(named("knows"));

        let bytes = response.to_bytes().unwrap();
        let mut ctx = DecodeContext::with_object_factory(Arc::new(Factory));
        let decoded = MetadataResponse::decode(&bytes, &mut ctx).unwrap();

        assert_eq!(decoded.attribute_descriptors().len(), 1);
        assert_eq!(AttributeDescriptor::name(&*decoded.attribute_descriptors()[0]), "age");
        let nodes: Vec<_> = decoded.node_types().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(nodes, ["person"]);
        assert_eq!(decoded.edge_types()[0].name(), "knows");
    }

    #[test]
    fn test_metadata_without_factory() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let mut response = MetadataResponse::new(&seq);
        response.add_node_type(named("person"));

        let bytes = response.to_bytes().unwrap();
        let err = MetadataResponse::decode(&bytes, &mut DecodeContext::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_metadata_rejects_unknown_system_type() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let header = MessageHeader::new(Verb::MetadataResponse, &seq);
        let mut writer = ByteWriter::new();
        header.write(&mut writer);
        writer.write_int(1);
        writer.write_byte(SystemType::Principal.as_byte() as u8);
        writer.write_int(1);
        let total = writer.length() as i32;
        writer.write_int_at(0, total).unwrap();
        let bytes = writer.into_bytes();

        let mut ctx = DecodeContext::with_object_factory(Arc::new(Factory));
        let err = MetadataResponse::decode(&bytes, &mut ctx).unwrap_err();
        assert!(err.root().to_string().contains("system type 4"));
    }

    #[test]
    fn test_empty_metadata_payload_is_an_error() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let bytes = MetadataRequest::new(&seq).to_bytes().unwrap();
        assert_eq!(bytes.len(), 56);

        let mut response_bytes = bytes.to_vec();
        response_bytes[10..12].copy_from_slice(&Verb::MetadataResponse.id().to_be_bytes());
        let err = MetadataResponse::decode(&response_bytes, &mut DecodeContext::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
