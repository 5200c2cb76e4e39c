//! Tag conjunction evaluated against the nested `rs` column.
//!
//! A trace matches when some span, taken together with the resource that owns
//! it, satisfies every filter. Filters on different spans never combine.

use std::collections::HashMap;

use traceblock_core::decode::{ResourceColumns, ResourceSpansColumns, SpanColumns};
use traceblock_core::labels::{parse_status_code, MatchRule, WellKnownLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanText {
    Name,
    HttpMethod,
    HttpUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SpanFilter {
    /// Stored value contains the filter value.
    Contains(SpanText, String),
    /// Stored HTTP status code rendered as a decimal string equals the value.
    HttpStatusCode(String),
    /// Stored status code equals the resolved code.
    StatusCode(i32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMatcher {
    /// (index into the well-known resource columns, exact value)
    resource: Vec<(usize, String)>,
    span: Vec<SpanFilter>,
    generic: Vec<(String, String)>,
    /// Set when a filter can never be satisfied, e.g. an unknown status alias.
    unsatisfiable: bool,
}

fn span_text(label: WellKnownLabel) -> Option<SpanText> {
    match label {
        WellKnownLabel::SpanName => Some(SpanText::Name),
        WellKnownLabel::HttpMethod => Some(SpanText::HttpMethod),
        WellKnownLabel::HttpUrl => Some(SpanText::HttpUrl),
        _ => None,
    }
}

impl TagMatcher {
    /// Compile `tags`; `None` when there is nothing to match.
    pub fn compile(tags: &HashMap<String, String>) -> Option<Self> {
        if tags.is_empty() {
            return None;
        }

        let mut matcher = Self::default();
        for (key, value) in tags {
            let Some(label) = WellKnownLabel::from_key(key) else {
                matcher.generic.push((key.clone(), value.clone()));
                continue;
            };

            if let Some(index) = label.resource_column() {
                matcher.resource.push((index, value.clone()));
                continue;
            }

            let filter = match label.match_rule() {
                MatchRule::Substring => match span_text(label) {
                    Some(text) => SpanFilter::Contains(text, value.clone()),
                    None => continue,
                },
                MatchRule::Numeric if label == WellKnownLabel::StatusCode => {
                    match parse_status_code(value).and_then(|code| i32::try_from(code).ok()) {
                        Some(code) => SpanFilter::StatusCode(code),
                        None => {
                            matcher.unsatisfiable = true;
                            continue;
                        }
                    }
                }
                MatchRule::Numeric => SpanFilter::HttpStatusCode(value.clone()),
                MatchRule::Exact => continue,
            };
            matcher.span.push(filter);
        }

        Some(matcher)
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }

    /// True when trace `row` has a (span, resource) pair satisfying every filter.
    pub fn matches_row(&self, cols: &ResourceSpansColumns<'_>, row: usize) -> bool {
        if self.unsatisfiable {
            return false;
        }

        for resource in cols.resources_of(row) {
            if !self.resource_matches(&cols.resources, resource) {
                continue;
            }
            for span in cols.spans_of(resource) {
                if self.span_matches(&cols.spans, span)
                    && self.generic_matches(cols, resource, span)
                {
                    return true;
                }
            }
        }
        false
    }

    fn resource_matches(&self, resources: &ResourceColumns<'_>, resource: usize) -> bool {
        self.resource
            .iter()
            .all(|(index, want)| resources.label(*index, resource) == Some(want.as_str()))
    }

    fn span_matches(&self, spans: &SpanColumns<'_>, span: usize) -> bool {
        self.span.iter().all(|filter| match filter {
            SpanFilter::Contains(SpanText::Name, want) => {
                spans.name.value(span).contains(want.as_str())
            }
            SpanFilter::Contains(SpanText::HttpMethod, want) => spans
                .http_method(span)
                .is_some_and(|v| v.contains(want.as_str())),
            SpanFilter::Contains(SpanText::HttpUrl, want) => spans
                .http_url(span)
                .is_some_and(|v| v.contains(want.as_str())),
            SpanFilter::HttpStatusCode(want) => spans
                .http_status_code(span)
                .is_some_and(|code| code.to_string() == *want),
            SpanFilter::StatusCode(want) => spans.status_code.value(span) == *want,
        })
    }

    /// Span attributes shadow resource attributes with the same key.
    fn generic_matches(
        &self,
        cols: &ResourceSpansColumns<'_>,
        resource: usize,
        span: usize,
    ) -> bool {
        self.generic.iter().all(|(key, want)| {
            let found = match cols.spans.attrs.first(span, key) {
                Some(value) => value,
                None => cols.resources.attrs.first(resource, key).flatten(),
            };
            found == Some(want.as_str())
        })
    }
}
