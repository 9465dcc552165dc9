//! Contracts for the graph object model the codec delegates to.
//!
//! The codec frames entities, keys and type descriptors but never knows
//! their layout. Each object writes and reads itself through these traits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::WireResult;
use crate::stream::{ByteReader, ByteWriter};

/// An object that serializes itself into a message payload.
pub trait ExternalObject: fmt::Debug + Send + Sync {
    /// Writes this object's binary form.
    fn write_external(&self, writer: &mut ByteWriter) -> WireResult<()>;

    /// Populates this object from its binary form.
    fn read_external(
        &mut self,
        reader: &mut ByteReader<'_>,
        ctx: &mut DecodeContext,
    ) -> WireResult<()>;
}

/// A node or edge.
pub trait Entity: ExternalObject {
    /// Id the server knows this entity by, or a negative temporary id.
    fn virtual_id(&self) -> i64;
}

/// Key used to look entities up.
pub trait EntityKey: ExternalObject {}

/// An attribute descriptor.
pub trait AttributeDescriptor: ExternalObject {
    /// Negative until the server has assigned a real id.
    fn attribute_id(&self) -> i64;

    fn name(&self) -> &str;
}

/// A node or edge type.
pub trait EntityType: ExternalObject {
    fn name(&self) -> &str;
}

/// Creates empty model objects for decoders to fill.
pub trait GraphObjectFactory: Send + Sync {
    fn create_attribute_descriptor(&self) -> Box<dyn AttributeDescriptor>;

    fn create_node_type(&self) -> Box<dyn EntityType>;

    fn create_edge_type(&self) -> Box<dyn EntityType>;
}

/// Tag selecting which kind of system object follows in a metadata stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemType {
    Invalid,
    AttributeDescriptor,
    NodeType,
    EdgeType,
    Index,
    Principal,
    Role,
    Sequence,
    StoredProcedure,
}

impl SystemType {
    pub fn from_byte(tag: i8) -> Self {
        match tag {
            0 => Self::AttributeDescriptor,
            1 => Self::NodeType,
            2 => Self::EdgeType,
            3 => Self::Index,
            4 => Self::Principal,
            5 => Self::Role,
            6 => Self::Sequence,
            7 => Self::StoredProcedure,
            _ => Self::Invalid,
        }
    }

    pub fn as_byte(self) -> i8 {
        match self {
            Self::Invalid => -1,
            Self::AttributeDescriptor => 0,
            Self::NodeType => 1,
            Self::EdgeType => 2,
            Self::Index => 3,
            Self::Principal => 4,
            Self::Role => 5,
            Self::Sequence => 6,
            Self::StoredProcedure => 7,
        }
    }
}

/// State shared across one decode session.
///
/// Holds entities already seen by id, so payloads can refer back to them
/// without repeating their data, and the factory used to materialize type
/// descriptors.
#[derive(Default, Clone)]
pub struct DecodeContext {
    references: HashMap<i64, Arc<dyn Entity>>,
    objects: Option<Arc<dyn GraphObjectFactory>>,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that can materialize model objects.
    pub fn with_object_factory(factory: Arc<dyn GraphObjectFactory>) -> Self {
        Self {
            references: HashMap::new(),
            objects: Some(factory),
        }
    }

    pub fn object_factory(&self) -> Option<&Arc<dyn GraphObjectFactory>> {
        self.objects.as_ref()
    }

    /// Records an entity under `id`, returning any entity it replaced.
    pub fn insert_reference(
        &mut self,
        id: i64,
        entity: Arc<dyn Entity>,
    ) -> Option<Arc<dyn Entity>> {
        self.references.insert(id, entity)
    }

    pub fn resolve(&self, id: i64) -> Option<Arc<dyn Entity>> {
        self.references.get(&id).cloned()
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn clear_references(&mut self) {
        self.references.clear();
    }
}

impl fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeContext")
            .field("references", &self.references.len())
            .field("has_object_factory", &self.objects.is_some())
            .finish()
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[derive(Debug)]
    struct Stub(i64);

    impl ExternalObject for Stub {
        fn write_external(&self, writer: &mut ByteWriter) -> WireResult<()> {
            writer.write_long(self.0);
            Ok(())
        }

        fn read_external(
            &mut self,
            reader: &mut ByteReader<'_>,
            _ctx: &mut DecodeContext,
        ) -> WireResult<()> {
            self.0 = reader.read_long()?;
            Ok(())
        }
    }

    impl Entity for Stub {
        fn virtual_id(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn test_reference_map() {
        let mut ctx = DecodeContext::new();
        assert!(ctx.resolve(9).is_none());

        ctx.insert_reference(9, Arc::new(Stub(9)));
        assert_eq!(ctx.resolve(9).map(|e| e.virtual_id()), Some(9));
        assert_eq!(ctx.reference_count(), 1);

        ctx.clear_references();
        assert!(ctx.resolve(9).is_none());
    }

    #[test]
    fn test_system_type_tags() {
        for tag in -1i8..=7 {
            assert_eq!(SystemType::from_byte(tag).as_byte(), tag);
        }
        assert_eq!(SystemType::from_byte(42), SystemType::Invalid);
    }
}
