//! In-memory shape of a trace as it is stored in a block.
//!
//! A [`Trace`] owns its resources, instrumentation libraries and spans. Every
//! well-known string field is an `Option<String>` so that "absent" and
//! "present but empty" stay distinguishable after a round trip through the
//! columnar body.

use serde::{Deserialize, Serialize};

use crate::encode::EncodeError;

/// Length in bytes of every trace ID stored in a block.
pub const TRACE_ID_LEN: usize = 16;

/// Span status codes as stored in the `StatusCode` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    Unset = 0,
    Ok = 1,
    Error = 2,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.as_i32()
    }
}

/// Generic key/value attribute. Keys are not unique within a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Attribute whose key is present but whose value is not.
    pub fn without_value(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub service_name: Option<String>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub k8s_cluster_name: Option<String>,
    pub k8s_namespace_name: Option<String>,
    pub k8s_pod_name: Option<String>,
    pub k8s_container_name: Option<String>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationLibrary {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub id: Vec<u8>,
    /// Empty for a root span or when the parent is unknown.
    pub parent_span_id: Vec<u8>,
    pub name: String,
    pub kind: i32,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub status_code: i32,
    pub status_message: Option<String>,
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<i64>,
    pub attrs: Vec<Attribute>,
}

/// Instrumentation library spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ils {
    pub instrumentation_library: InstrumentationLibrary,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpans {
    pub resource: Resource,
    pub instrumentation_library_spans: Vec<Ils>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: Vec<u8>,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub duration_nanos: u64,
    pub root_service_name: String,
    pub root_span_name: String,
    pub resource_spans: Vec<ResourceSpans>,
}

impl Trace {
    /// Total number of spans across every resource and library.
    pub fn span_count(&self) -> usize {
        self.resource_spans
            .iter()
            .flat_map(|rs| rs.instrumentation_library_spans.iter())
            .map(|ils| ils.spans.len())
            .sum()
    }

    /// Duration truncated to whole milliseconds, saturating at `u32::MAX`.
    pub fn duration_ms(&self) -> u32 {
        u32::try_from(self.duration_nanos / 1_000_000).unwrap_or(u32::MAX)
    }

    /// Checks that the trace can be written to a block.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.trace_id.len() != TRACE_ID_LEN {
            return Err(EncodeError::InvalidTraceId {
                len: self.trace_id.len(),
            });
        }

        for rs in &self.resource_spans {
            check_attr_keys(&rs.resource.attrs, "resource")?;
            for ils in &rs.instrumentation_library_spans {
                for span in &ils.spans {
                    check_attr_keys(&span.attrs, "span")?;
                }
            }
        }

        Ok(())
    }
}

fn check_attr_keys(attrs: &[Attribute], scope: &'static str) -> Result<(), EncodeError> {
    if attrs.iter().any(|attr| attr.key.is_empty()) {
        return Err(EncodeError::EmptyAttributeKey { scope });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_short_trace_id() {
        let trace = Trace {
            trace_id: vec![1, 2, 3],
            ..Default::default()
        };
        assert!(matches!(
            trace.validate(),
            Err(EncodeError::InvalidTraceId { len: 3 })
        ));
    }

    #[test]
    fn validate_rejects_empty_span_attribute_key() {
        let trace = Trace {
            trace_id: vec![7; TRACE_ID_LEN],
            resource_spans: vec![ResourceSpans {
                resource: Resource::default(),
                instrumentation_library_spans: vec![Ils {
                    instrumentation_library: InstrumentationLibrary::default(),
                    spans: vec![Span {
                        attrs: vec![Attribute::new("", "value")],
                        ..Default::default()
                    }],
                }],
            }],
            ..Default::default()
        };
        assert!(matches!(
            trace.validate(),
            Err(EncodeError::EmptyAttributeKey { scope: "span" })
        ));
    }

    #[test]
    fn span_count_spans_every_library() {
        let ils = |n| Ils {
            spans: vec![Span::default(); n],
            ..Default::default()
        };
        let trace = Trace {
            resource_spans: vec![
                ResourceSpans {
                    instrumentation_library_spans: vec![ils(2), ils(1)],
                    ..Default::default()
                },
                ResourceSpans::default(),
                ResourceSpans {
                    instrumentation_library_spans: vec![ils(3)],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(trace.span_count(), 6);
    }

    #[test]
    fn duration_ms_truncates() {
        let trace = Trace {
            duration_nanos: 100_999_999,
            ..Default::default()
        };
        assert_eq!(trace.duration_ms(), 100);
    }

    #[test]
    fn status_code_conversions() {
        assert_eq!(StatusCode::Error.as_i32(), 2);
        assert_eq!(i32::from(StatusCode::Ok), 1);
    }
}
