use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PathwatchError;
use crate::ids::{SpanId, TraceId};
use crate::model::span::RawSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Error,
    Pending,
}

impl TraceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = PathwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "pending" => Ok(Self::Pending),
            _ => Err(PathwatchError::Parse(format!("unknown trace status: {s}"))),
        }
    }
}

/// A trace record posted directly by a client.
///
/// Without `spans` the aggregate fields are trusted as sent. With `spans`
/// they are ignored and the aggregate is derived from the spans instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSubmission {
    pub trace_id: TraceId,
    pub service_name: String,
    pub trace_name: String,
    pub root_service_name: String,
    /// May be fractional; rounded half-up when stored.
    pub duration_ms: f64,
    pub span_count: u64,
    pub error_span_count: u64,
    pub status: TraceStatus,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub http_status_code: Option<u16>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub root_span_id: SpanId,
    #[serde(default)]
    pub spans: Option<Vec<RawSpan>>,
}

/// Trace row as written to the `traces` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRow {
    pub trace_id: TraceId,
    pub timestamp: u64,
    pub org_id: String,
    pub project_id: String,
    pub service_name: String,
    pub trace_name: String,
    pub root_service_name: String,
    pub duration_ms: u64,
    pub span_count: u64,
    pub error_span_count: u64,
    pub status: TraceStatus,
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub http_status_code: Option<u16>,
    pub endpoint: Option<String>,
    pub root_span_id: SpanId,
}
