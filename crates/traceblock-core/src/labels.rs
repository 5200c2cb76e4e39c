//! Well-known tag keys.
//!
//! These keys are the public search vocabulary. Each one maps to a dedicated
//! column in the block body and carries its own matching rule:
//!
//! - **Resource labels** match by exact equality against the stored value.
//! - **Span string labels** match when the stored value contains the filter value.
//! - **Span numeric labels** match when the stored number, rendered as a decimal
//!   string, equals the filter value. `status.code` also accepts the aliases
//!   [`STATUS_CODE_ERROR`], [`STATUS_CODE_OK`] and [`STATUS_CODE_UNSET`].
//!
//! Any other key is looked up in the generic attribute lists.

use crate::schema::column;
use crate::trace::StatusCode;

// Resource-level labels
pub const LABEL_SERVICE_NAME: &str = "service.name";
pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_POD: &str = "pod";
pub const LABEL_CONTAINER: &str = "container";
pub const LABEL_K8S_CLUSTER_NAME: &str = "k8s.cluster.name";
pub const LABEL_K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
pub const LABEL_K8S_POD_NAME: &str = "k8s.pod.name";
pub const LABEL_K8S_CONTAINER_NAME: &str = "k8s.container.name";

// Span-level labels
pub const LABEL_NAME: &str = "name";
pub const LABEL_HTTP_METHOD: &str = "http.method";
pub const LABEL_HTTP_URL: &str = "http.url";
pub const LABEL_HTTP_STATUS_CODE: &str = "http.status_code";

/// Tag key for the span status code.
pub const STATUS_CODE_TAG: &str = "status.code";
pub const STATUS_CODE_UNSET: &str = "unset";
pub const STATUS_CODE_OK: &str = "ok";
pub const STATUS_CODE_ERROR: &str = "error";

/// Every reserved tag key, in lookup-table order.
pub const ALL_LABELS: [&str; 14] = [
    LABEL_SERVICE_NAME,
    LABEL_CLUSTER,
    LABEL_NAMESPACE,
    LABEL_POD,
    LABEL_CONTAINER,
    LABEL_K8S_CLUSTER_NAME,
    LABEL_K8S_NAMESPACE_NAME,
    LABEL_K8S_POD_NAME,
    LABEL_K8S_CONTAINER_NAME,
    LABEL_NAME,
    LABEL_HTTP_METHOD,
    LABEL_HTTP_URL,
    LABEL_HTTP_STATUS_CODE,
    STATUS_CODE_TAG,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownLabel {
    ServiceName,
    Cluster,
    Namespace,
    Pod,
    Container,
    K8sClusterName,
    K8sNamespaceName,
    K8sPodName,
    K8sContainerName,
    SpanName,
    HttpMethod,
    HttpUrl,
    HttpStatusCode,
    StatusCode,
}

/// How a well-known label compares the filter value against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Substring,
    Numeric,
}

impl WellKnownLabel {
    pub fn from_key(key: &str) -> Option<Self> {
        let label = match key {
            LABEL_SERVICE_NAME => Self::ServiceName,
            LABEL_CLUSTER => Self::Cluster,
            LABEL_NAMESPACE => Self::Namespace,
            LABEL_POD => Self::Pod,
            LABEL_CONTAINER => Self::Container,
            LABEL_K8S_CLUSTER_NAME => Self::K8sClusterName,
            LABEL_K8S_NAMESPACE_NAME => Self::K8sNamespaceName,
            LABEL_K8S_POD_NAME => Self::K8sPodName,
            LABEL_K8S_CONTAINER_NAME => Self::K8sContainerName,
            LABEL_NAME => Self::SpanName,
            LABEL_HTTP_METHOD => Self::HttpMethod,
            LABEL_HTTP_URL => Self::HttpUrl,
            LABEL_HTTP_STATUS_CODE => Self::HttpStatusCode,
            STATUS_CODE_TAG => Self::StatusCode,
            _ => return None,
        };
        Some(label)
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::ServiceName => LABEL_SERVICE_NAME,
            Self::Cluster => LABEL_CLUSTER,
            Self::Namespace => LABEL_NAMESPACE,
            Self::Pod => LABEL_POD,
            Self::Container => LABEL_CONTAINER,
            Self::K8sClusterName => LABEL_K8S_CLUSTER_NAME,
            Self::K8sNamespaceName => LABEL_K8S_NAMESPACE_NAME,
            Self::K8sPodName => LABEL_K8S_POD_NAME,
            Self::K8sContainerName => LABEL_K8S_CONTAINER_NAME,
            Self::SpanName => LABEL_NAME,
            Self::HttpMethod => LABEL_HTTP_METHOD,
            Self::HttpUrl => LABEL_HTTP_URL,
            Self::HttpStatusCode => LABEL_HTTP_STATUS_CODE,
            Self::StatusCode => STATUS_CODE_TAG,
        }
    }

    /// True for labels stored on the resource rather than the span.
    pub fn is_resource(self) -> bool {
        matches!(
            self,
            Self::ServiceName
                | Self::Cluster
                | Self::Namespace
                | Self::Pod
                | Self::Container
                | Self::K8sClusterName
                | Self::K8sNamespaceName
                | Self::K8sPodName
                | Self::K8sContainerName
        )
    }

    /// Name of the column holding the label's value, within the resource or
    /// span struct.
    pub fn column(self) -> &'static str {
        match self {
            Self::ServiceName => column::SERVICE_NAME,
            Self::Cluster => column::CLUSTER,
            Self::Namespace => column::NAMESPACE,
            Self::Pod => column::POD,
            Self::Container => column::CONTAINER,
            Self::K8sClusterName => column::K8S_CLUSTER_NAME,
            Self::K8sNamespaceName => column::K8S_NAMESPACE_NAME,
            Self::K8sPodName => column::K8S_POD_NAME,
            Self::K8sContainerName => column::K8S_CONTAINER_NAME,
            Self::SpanName => column::SPAN_NAME,
            Self::HttpMethod => column::HTTP_METHOD,
            Self::HttpUrl => column::HTTP_URL,
            Self::HttpStatusCode => column::HTTP_STATUS_CODE,
            Self::StatusCode => column::STATUS_CODE,
        }
    }

    /// Position of a resource label in [`column::RESOURCE_LABELS`].
    pub fn resource_column(self) -> Option<usize> {
        if !self.is_resource() {
            return None;
        }
        column::RESOURCE_LABELS
            .iter()
            .position(|name| *name == self.column())
    }

    pub fn match_rule(self) -> MatchRule {
        match self {
            Self::SpanName | Self::HttpMethod | Self::HttpUrl => MatchRule::Substring,
            Self::HttpStatusCode | Self::StatusCode => MatchRule::Numeric,
            _ => MatchRule::Exact,
        }
    }
}

/// Resolves a `status.code` filter value to the stored numeric code.
///
/// Accepts the string aliases as well as a plain decimal number.
pub fn parse_status_code(value: &str) -> Option<i64> {
    match value {
        STATUS_CODE_UNSET => Some(StatusCode::Unset.as_i32() as i64),
        STATUS_CODE_OK => Some(StatusCode::Ok.as_i32() as i64),
        STATUS_CODE_ERROR => Some(StatusCode::Error.as_i32() as i64),
        other => other.parse().ok(),
    }
}
