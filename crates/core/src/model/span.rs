use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{SpanId, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::Server => "SERVER",
            Self::Client => "CLIENT",
            Self::Producer => "PRODUCER",
            Self::Consumer => "CONSUMER",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied JSON payload kept as compact JSON text.
///
/// Attributes, events, links and resource attributes are stored as strings by
/// the analytical store and nothing in the pipeline looks inside them, so they
/// are serialized once at the boundary and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueJson(String);

impl OpaqueJson {
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for OpaqueJson {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

impl Serialize for OpaqueJson {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match serde_json::from_str::<serde_json::Value>(&self.0) {
            Ok(value) => value.serialize(serializer),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

/// One span as submitted by an SDK, after schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, deserialize_with = "optional_span_id")]
    pub parent_span_id: Option<SpanId>,
    pub service_name: String,
    pub span_name: String,
    pub span_kind: SpanKind,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub duration_ms: f64,
    pub status_code: StatusCode,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub attributes: Option<OpaqueJson>,
    #[serde(default)]
    pub events: Option<OpaqueJson>,
    #[serde(default)]
    pub links: Option<OpaqueJson>,
    #[serde(default)]
    pub resource_attributes: Option<OpaqueJson>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub http_status_code: Option<u16>,
    #[serde(default)]
    pub db_system: Option<String>,
    #[serde(default)]
    pub db_statement: Option<String>,
}

impl RawSpan {
    pub fn is_error(&self) -> bool {
        self.status_code == StatusCode::Error
    }
}

/// Span row as written to the `spans` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub timestamp: u64,
    pub org_id: String,
    pub project_id: String,
    pub service_name: String,
    pub span_name: String,
    pub span_kind: SpanKind,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub duration_ms: f64,
    pub status_code: StatusCode,
    pub status_message: Option<String>,
    pub attributes: String,
    pub events: String,
    pub links: String,
    pub resource_attributes: String,
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<u16>,
    pub db_system: Option<String>,
    pub db_statement: Option<String>,
    pub error: bool,
}

/// Parent/child identity shared by raw and stored spans, so the same tree
/// builder serves ingestion and the query side.
pub trait SpanLinks {
    fn span_id(&self) -> &SpanId;
    fn parent_span_id(&self) -> Option<&SpanId>;
}

impl SpanLinks for RawSpan {
    fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }
}

impl SpanLinks for EnrichedSpan {
    fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }
}

impl<T: SpanLinks> SpanLinks for &T {
    fn span_id(&self) -> &SpanId {
        (*self).span_id()
    }

    fn parent_span_id(&self) -> Option<&SpanId> {
        (*self).parent_span_id()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanNode<T> {
    #[serde(flatten)]
    pub span: T,
    pub children: Vec<SpanNode<T>>,
}

impl<T> SpanNode<T> {
    pub fn leaf(span: T) -> Self {
        Self {
            span,
            children: Vec::new(),
        }
    }

    /// Number of spans in this subtree, including the node itself.
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(SpanNode::subtree_size)
            .sum::<usize>()
    }
}

fn optional_span_id<'de, D>(deserializer: D) -> Result<Option<SpanId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(s) if !s.is_empty() => SpanId::try_from(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
