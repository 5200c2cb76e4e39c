//! Search request and response vocabulary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A conjunction of predicates evaluated against a single block.
///
/// Zero values mean "unconstrained": `start == end == 0` disables the time
/// window and a zero duration bound disables that side of the range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub tags: HashMap<String, String>,
    pub min_duration_ms: u32,
    pub max_duration_ms: u32,
    /// Window start, unix seconds (inclusive).
    pub start: u32,
    /// Window end, unix seconds (inclusive).
    pub end: u32,
    /// Maximum number of results, 0 for no limit.
    pub limit: u32,
}

impl SearchRequest {
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_window(mut self, start: u32, end: u32) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_duration(mut self, min_ms: u32, max_ms: u32) -> Self {
        self.min_duration_ms = min_ms;
        self.max_duration_ms = max_ms;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Summary of one matching trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSearchMetadata {
    pub trace_id: String,
    pub start_time_unix_nano: u64,
    pub duration_ms: u32,
    pub root_service_name: String,
    pub root_trace_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub inspected_traces: u64,
    pub inspected_bytes: u64,
    pub inspected_row_groups: u32,
    pub skipped_row_groups: u32,
    /// Stored records excluded because they could not be decoded.
    pub skipped_records: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub traces: Vec<TraceSearchMetadata>,
    pub metrics: SearchMetrics,
    /// Set when `limit` cut the result set short.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: SearchRequest =
            serde_json::from_str(r#"{"tags":{"service.name":"api"},"start":10}"#).unwrap();
        assert_eq!(req.tags.get("service.name").map(String::as_str), Some("api"));
        assert_eq!(req.start, 10);
        assert_eq!(req.end, 0);
        assert_eq!(req.limit, 0);
    }

    #[test]
    fn test_builder_helpers() {
        let req = SearchRequest::default()
            .with_tag("foo", "bar")
            .with_window(1, 2)
            .with_duration(3, 4);
        assert_eq!(req.tags.len(), 1);
        assert_eq!((req.start, req.end), (1, 2));
        assert_eq!((req.min_duration_ms, req.max_duration_ms), (3, 4));
    }
}
