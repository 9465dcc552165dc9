//! Codec configuration.

/// Default starting capacity of a [`ByteWriter`](crate::ByteWriter).
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Configuration for a [`MessageFactory`](crate::MessageFactory).
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Tenant stamped into every header the factory creates.
    pub tenant_id: i16,
    /// Starting capacity of the writer used by `to_bytes`.
    pub initial_buffer_capacity: usize,
    /// Largest buffer accepted on decode. `None` accepts any size the
    /// length field can express.
    pub max_message_length: Option<usize>,
    /// First sequence number handed out by a fresh counter.
    pub initial_sequence: i64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            tenant_id: 0,
            initial_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_message_length: None,
            initial_sequence: 0,
        }
    }
}

impl CodecConfig {
    /// Sets the tenant id.
    pub fn with_tenant_id(mut self, tenant_id: i16) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Sets the initial writer capacity.
    pub fn with_initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    /// Caps the size of buffers accepted on decode.
    pub fn with_max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = Some(max);
        self
    }

    /// Sets the first sequence number.
    pub fn with_initial_sequence(mut self, sequence: i64) -> Self {
        self.initial_sequence = sequence;
        self
    }
}
