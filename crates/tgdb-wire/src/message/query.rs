//! Query and traversal messages.

use tracing::debug;

use crate::error::{QueryErrorKind, WireError, WireResult};
use crate::header::MessageHeader;
use crate::message::{MessageKind, ProtocolMessage, backpatch_length};
use crate::model::DecodeContext;
use crate::stream::{ByteReader, ByteWriter};
use crate::verb::Verb;

pub(crate) const DEFAULT_FETCH_SIZE: i32 = 1000;
pub(crate) const DEFAULT_BATCH_SIZE: i16 = 50;
pub(crate) const DEFAULT_TRAVERSAL_DEPTH: i16 = 3;
pub(crate) const DEFAULT_EDGE_LIMIT: i16 = 0;

/// What the server should do with a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryCommand {
    #[default]
    Invalid,
    Create,
    Execute,
    ExecuteGremlin,
    ExecuteGremlinStr,
    /// Re-runs a previously created query by hash id.
    ExecuteId,
    /// Releases a previously created query by hash id.
    Close,
}

impl QueryCommand {
    pub fn code(self) -> i32 {
        match self {
            Self::Invalid => 0,
            Self::Create => 1,
            Self::Execute => 2,
            Self::ExecuteGremlin => 3,
            Self::ExecuteGremlinStr => 4,
            Self::ExecuteId => 5,
            Self::Close => 6,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Create,
            2 => Self::Execute,
            3 => Self::ExecuteGremlin,
            4 => Self::ExecuteGremlinStr,
            5 => Self::ExecuteId,
            6 => Self::Close,
            _ => Self::Invalid,
        }
    }

    /// Whether the command refers to an existing query by hash id.
    pub fn uses_hash_id(self) -> bool {
        matches!(self, Self::ExecuteId | Self::Close)
    }
}

/// Result ordering requested with a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub attribute: String,
    pub descending: bool,
    pub limit: i32,
}

/// Query submission.
///
/// Filter expressions are sent for the create and execute commands; the
/// hash-id commands send only the id.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    header: MessageHeader,
    command: QueryCommand,
    fetch_size: i32,
    batch_size: i16,
    traversal_depth: i16,
    edge_limit: i16,
    sort: Option<SortSpec>,
    query_expr: Option<String>,
    edge_filter: Option<String>,
    traversal_condition: Option<String>,
    end_condition: Option<String>,
    query_hash_id: i64,
}

impl QueryRequest {
    pub fn command(&self) -> QueryCommand {
        self.command
    }

    pub fn set_command(&mut self, command: QueryCommand) {
        self.command = command;
        self.header.invalidate();
    }

    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    pub fn set_fetch_size(&mut self, fetch_size: i32) {
        self.fetch_size = fetch_size;
        self.header.invalidate();
    }

    pub fn batch_size(&self) -> i16 {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: i16) {
        self.batch_size = batch_size;
        self.header.invalidate();
    }

    pub fn traversal_depth(&self) -> i16 {
        self.traversal_depth
    }

    pub fn set_traversal_depth(&mut self, depth: i16) {
        self.traversal_depth = depth;
        self.header.invalidate();
    }

    pub fn edge_limit(&self) -> i16 {
        self.edge_limit
    }

    pub fn set_edge_limit(&mut self, limit: i16) {
        self.edge_limit = limit;
        self.header.invalidate();
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.sort = sort;
        self.header.invalidate();
    }

    pub fn query_expr(&self) -> Option<&str> {
        self.query_expr.as_deref()
    }

    pub fn set_query_expr(&mut self, expr: impl Into<String>) {
        self.query_expr = Some(expr.into());
        self.header.invalidate();
    }

    pub fn edge_filter(&self) -> Option<&str> {
        self.edge_filter.as_deref()
    }

    pub fn set_edge_filter(&mut self, filter: impl Into<String>) {
        self.edge_filter = Some(filter.into());
        self.header.invalidate();
    }

    pub fn traversal_condition(&self) -> Option<&str> {
        self.traversal_condition.as_deref()
    }

    pub fn set_traversal_condition(&mut self, condition: impl Into<String>) {
        self.traversal_condition = Some(condition.into());
        self.header.invalidate();
    }

    pub fn end_condition(&self) -> Option<&str> {
        self.end_condition.as_deref()
    }

    pub fn set_end_condition(&mut self, condition: impl Into<String>) {
        self.end_condition = Some(condition.into());
        self.header.invalidate();
    }

    pub fn query_hash_id(&self) -> i64 {
        self.query_hash_id
    }

    pub fn set_query_hash_id(&mut self, hash_id: i64) {
        self.query_hash_id = hash_id;
        self.header.invalidate();
    }

    fn filters(&self) -> [Option<&str>; 4] {
        [
            self.query_expr.as_deref(),
            self.edge_filter.as_deref(),
            self.traversal_condition.as_deref(),
            self.end_condition.as_deref(),
        ]
    }
}

impl MessageKind for QueryRequest {
    const VERB: Verb = Verb::QueryRequest;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            command: QueryCommand::Invalid,
            fetch_size: DEFAULT_FETCH_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            traversal_depth: DEFAULT_TRAVERSAL_DEPTH,
            edge_limit: DEFAULT_EDGE_LIMIT,
            sort: None,
            query_expr: None,
            edge_filter: None,
            traversal_condition: None,
            end_condition: None,
            query_hash_id: -1,
        }
    }
}

impl ProtocolMessage for QueryRequest {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn write_payload(&self, writer: &mut ByteWriter) -> WireResult<()> {
        if self.command == QueryCommand::Invalid {
            return Err(WireError::malformed("query request has no command"));
        }
        if self.command.uses_hash_id() && self.query_hash_id < 0 {
            return Err(WireError::malformed(format!(
                "{:?} needs a query hash id, got {}",
                self.command, self.query_hash_id
            )));
        }

        let start = writer.position();
        writer.write_int(0);
        writer.write_int(0); // checksum
        writer.write_int(self.command.code());
        writer.write_int(self.fetch_size);
        writer.write_short(self.batch_size);
        writer.write_short(self.traversal_depth);
        writer.write_short(self.edge_limit);

        match &self.sort {
            None => writer.write_bool(false),
            Some(sort) => {
                writer.write_bool(true);
                writer.write_utf(&sort.attribute)?;
                writer.write_bool(sort.descending);
                writer.write_int(sort.limit);
            }
        }

        if self.command.uses_hash_id() {
            writer.write_long(self.query_hash_id);
        } else {
            for filter in self.filters() {
                match filter {
                    None => writer.write_bool(true),
                    Some(expr) => {
                        writer.write_bool(false);
                        writer.write_utf(expr)?;
                    }
                }
            }
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
        self.command = QueryCommand::from_code(reader.read_int()?);
        self.fetch_size = reader.read_int()?;
        self.batch_size = reader.read_short()?;
        self.traversal_depth = reader.read_short()?;
        self.edge_limit = reader.read_short()?;

        self.sort = if reader.read_bool()? {
            Some(SortSpec {
                attribute: reader.read_utf()?,
                descending: reader.read_bool()?,
                limit: reader.read_int()?,
            })
        } else {
            None
        };

        self.query_expr = None;
        self.edge_filter = None;
        self.traversal_condition = None;
        self.end_condition = None;
        self.query_hash_id = -1;

        match self.command {
            QueryCommand::Invalid => Err(WireError::malformed("query request has no command")),
            QueryCommand::ExecuteId | QueryCommand::Close => {
                self.query_hash_id = reader.read_long()?;
                Ok(())
            }
            _ => {
                let mut filters = [None, None, None, None];
                for slot in &mut filters {
                    if !reader.read_bool()? {
                        *slot = Some(reader.read_utf()?);
                    }
                }
                let [query, edge, traversal, end] = filters;
                self.query_expr = query;
                self.edge_filter = edge;
                self.traversal_condition = traversal;
                self.end_condition = end;
                Ok(())
            }
        }
    }
}

/// Outcome of a query.
///
/// A failure status makes decoding fail with [`WireError::Query`]. On
/// success the response reports how many results follow.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    header: MessageHeader,
    result: i32,
    query_hash_id: i64,
    syntax: u8,
    result_type_annotation: String,
    result_count: i32,
    total_count: i32,
    error_message: Option<String>,
}

impl QueryResponse {
    /// Server status code. Zero means success.
    pub fn result(&self) -> i32 {
        self.result
    }

    pub fn query_hash_id(&self) -> i64 {
        self.query_hash_id
    }

    pub fn syntax(&self) -> u8 {
        self.syntax
    }

    pub fn result_type_annotation(&self) -> &str {
        &self.result_type_annotation
    }

    pub fn result_count(&self) -> i32 {
        self.result_count
    }

    /// Total matches across all batches. Only sent with syntax version 1.
    pub fn total_count(&self) -> i32 {
        self.total_count
    }

    pub fn has_result(&self) -> bool {
        self.result_count > 0
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_query_hash_id(&mut self, hash_id: i64) {
        self.query_hash_id = hash_id;
        self.header.invalidate();
    }

    pub fn set_syntax(&mut self, syntax: u8) {
        self.syntax = syntax;
        self.header.invalidate();
    }

    pub fn set_results(
        &mut self,
        annotation: impl Into<String>,
        result_count: i32,
        total_count: i32,
    ) {
        self.result = 0;
        self.error_message = None;
        self.result_type_annotation = annotation.into();
        self.result_count = result_count;
        self.total_count = total_count;
        self.header.invalidate();
    }

    pub fn set_failure(&mut self, kind: QueryErrorKind, message: impl Into<String>) {
        self.result = kind.code();
        self.error_message = Some(message.into());
        self.header.invalidate();
    }
}

impl MessageKind for QueryResponse {
    const VERB: Verb = Verb::QueryResponse;

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            result: 0,
            query_hash_id: -1,
            syntax: 0,
            result_type_annotation: String::new(),
            result_count: 0,
            total_count: 0,
            error_message: None,
        }
    }
}

impl ProtocolMessage for QueryResponse {
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
        writer.write_int(self.result);
        writer.write_long(self.query_hash_id);
        writer.write_byte(self.syntax);

        if self.result != 0 {
            writer.write_utf(self.error_message.as_deref().unwrap_or_default())?;
            return backpatch_length(writer, start);
        }

        writer.write_utf(&self.result_type_annotation)?;
        writer.write_int(self.result_count);
        if self.syntax == 1 {
            writer.write_int(self.total_count);
        }
        backpatch_length(writer, start)
    }

    fn read_payload(
        &mut self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut DecodeContext,
    ) -> WireResult<()> {
        if reader.available() == 0 {
            return Err(WireError::malformed("query response has no data"));
        }

        let _len = reader.read_int()?;
        let _checksum = reader.read_int()?;
        self.result = reader.read_int()?;
        self.query_hash_id = reader.read_long()?;
        self.syntax = reader.read_unsigned_byte()?;

        if self.result != 0 {
            let message = reader.read_utf()?;
            self.error_message = Some(message.clone());
            return Err(WireError::Query {
                kind: QueryErrorKind::from_code(self.result),
                message,
            });
        }

        self.error_message = None;
        self.result_type_annotation = reader.read_utf()?;
        self.result_count = reader.read_int()?;
        self.total_count = if self.syntax == 1 {
            reader.read_int()?
        } else {
            0
        };
        debug!(
            hash_id = self.query_hash_id,
            results = self.result_count,
            "read query response"
        );
        Ok(())
    }
}

header_only_message!(
    /// Traversal request. The codec sends no payload.
    TraverseRequest,
    Verb::TraverseRequest
);

header_only_message!(TraverseResponse, Verb::TraverseResponse);

#[cfg(test)]
mod query_tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::header::SequenceGenerator;

    fn sequence() -> Arc<SequenceGenerator> {
        Arc::new(SequenceGenerator::new(0))
    }

    #[test]
    fn test_query_request_execute_round_trip() {
        let seq = sequence();
        let mut request = QueryRequest::with_credentials(&seq, 1, 2);
        request.set_command(QueryCommand::Execute);
        request.set_query_expr("@nodetype = 'person';");
        request.set_traversal_condition("@degree < 2");
        request.set_sort(Some(SortSpec {
            attribute: "age".to_string(),
            descending: true,
            limit: 10,
        }));

        let bytes = request.to_bytes().unwrap();
        let payload_len = bytes.len() - 56;
        assert_eq!(&bytes[56..60], &(payload_len as i32).to_be_bytes());

        let decoded = QueryRequest::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.edge_filter(), None);
        assert_eq!(decoded.fetch_size(), 1000);
        assert_eq!(decoded.batch_size(), 50);
        assert_eq!(decoded.traversal_depth(), 3);
    }

    #[test]
    fn test_query_request_close_writes_hash_id_only() {
        let seq = sequence();
        let mut request = QueryRequest::new(&seq);
        request.set_command(QueryCommand::Close);
        request.set_query_expr("ignored");
        request.set_query_hash_id(77);

        let bytes = request.to_bytes().unwrap();
        // len, checksum, command, fetch, batch, depth, edges, sort flag, hash id
        assert_eq!(bytes.len(), 56 + 4 + 4 + 4 + 4 + 2 + 2 + 2 + 1 + 8);

        let decoded = QueryRequest::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.query_hash_id(), 77);
        assert_eq!(decoded.query_expr(), None);
    }

    #[test]
    fn test_query_request_validation() {
        let seq = sequence();
        let request = QueryRequest::new(&seq);
        assert_eq!(request.to_bytes().unwrap_err().kind(), ErrorKind::Io);

        let mut request = QueryRequest::new(&seq);
        request.set_command(QueryCommand::ExecuteId);
        assert!(request.to_bytes().is_err());
    }

    #[test]
    fn test_query_response_total_count_follows_syntax() {
        let seq = sequence();
        let mut response = QueryResponse::new(&seq);
        response.set_query_hash_id(9);
        response.set_results("node", 3, 30);

        let bytes = response.to_bytes().unwrap();
        let decoded = QueryResponse::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert!(decoded.has_result());
        assert_eq!(decoded.total_count(), 0);

        response.set_syntax(1);
        let bytes = response.to_bytes().unwrap();
        let decoded = QueryResponse::decode(&bytes, &mut DecodeContext::new()).unwrap();
        assert_eq!(decoded.result_type_annotation(), "node");
        assert_eq!(decoded.result_count(), 3);
        assert_eq!(decoded.total_count(), 30);
    }

    #[test]
    fn test_query_response_failure() {
        let seq = sequence();
        let mut response = QueryResponse::new(&seq);
        response.set_failure(QueryErrorKind::ParsingError, "unexpected token");

        let err = QueryResponse::decode(&response.to_bytes().unwrap(), &mut DecodeContext::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(matches!(
            err.root(),
            WireError::Query { kind: QueryErrorKind::ParsingError, .. }
        ));
    }

    #[test]
    fn test_query_response_requires_payload() {
        let seq = sequence();
        let header = MessageHeader::new(Verb::QueryResponse, &seq);
        let mut writer = ByteWriter::new();
        header.write(&mut writer);
        writer.write_int_at(0, 56).unwrap();
        let bytes = writer.into_bytes();

        assert!(QueryResponse::decode(&bytes, &mut DecodeContext::new()).is_err());
    }
}
