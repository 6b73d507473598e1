use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PathwatchError, Result};
use crate::ids::TraceId;
use crate::model::project::ProjectContext;
use crate::model::span::{EnrichedSpan, SpanNode};
use crate::model::trace::{TraceRow, TraceStatus};

/// Named queries understood by every sink.
pub const LIST_TRACES: &str = "list_traces";
pub const TRACE_DETAILS: &str = "trace_details";
pub const TRACE_SPANS: &str = "trace_spans";

/// Named queries over the `events` collection.
pub const TOTAL_REQUESTS: &str = "total_requests";
pub const ERROR_RATE: &str = "error_rate";
pub const AVG_LATENCY: &str = "avg_latency";
pub const TOP_PATHS: &str = "top_paths";
pub const REQUESTS_OVER_TIME: &str = "requests_over_time";
pub const REQUEST_COUNTS_BY_PERIOD: &str = "request_counts_by_period";
pub const LIST_REQUESTS: &str = "ingestions_endpoint";

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TracesRequest {
    pub service_name: Option<String>,
    pub status: Option<TraceStatus>,
    pub limit: usize,
}

impl Default for TracesRequest {
    fn default() -> Self {
        Self {
            service_name: None,
            status: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(PathwatchError::Validation(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {limit}"
        )));
    }
    Ok(())
}

impl TracesRequest {
    pub fn validate(&self) -> Result<()> {
        validate_limit(self.limit)
    }

    pub fn to_params(&self, project: &ProjectContext) -> QueryParams {
        let mut params = tenant_params(project);
        params.insert("limit".to_string(), self.limit.to_string());
        if let Some(service) = &self.service_name {
            params.insert("service_name".to_string(), service.clone());
        }
        if let Some(status) = self.status {
            params.insert("status".to_string(), status.to_string());
        }
        params
    }
}

pub fn trace_params(project: &ProjectContext, trace_id: &TraceId) -> QueryParams {
    let mut params = tenant_params(project);
    params.insert("trace_id".to_string(), trace_id.to_string());
    params
}

fn tenant_params(project: &ProjectContext) -> QueryParams {
    let mut params = QueryParams::new();
    params.insert("org_id".to_string(), project.org_id.clone());
    params.insert("project_id".to_string(), project.project_id.clone());
    params
}

/// Bucket width for time-series analytics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    #[default]
    OneHour,
    OneDay,
    OneWeek,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    pub fn as_millis(self) -> i64 {
        let secs = match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::OneHour => 60 * 60,
            Self::OneDay => 24 * 60 * 60,
            Self::OneWeek => 7 * 24 * 60 * 60,
        };
        secs * 1000
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = PathwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            "1w" => Ok(Self::OneWeek),
            other => Err(PathwatchError::Validation(format!(
                "interval must be one of 1m, 5m, 15m, 1h, 1d, 1w, got {other}"
            ))),
        }
    }
}

/// Parameters for the summary and time-series event queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsRequest {
    pub interval: Option<Interval>,
    pub limit: usize,
}

impl Default for AnalyticsRequest {
    fn default() -> Self {
        Self {
            interval: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl AnalyticsRequest {
    pub fn validate(&self) -> Result<()> {
        validate_limit(self.limit)
    }

    pub fn to_params(&self, project: &ProjectContext) -> QueryParams {
        let mut params = tenant_params(project);
        params.insert("limit".to_string(), self.limit.to_string());
        if let Some(interval) = self.interval {
            params.insert("interval".to_string(), interval.to_string());
        }
        params
    }
}

/// Filters for the raw request-event listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestsRequest {
    pub method: Option<String>,
    pub status: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for RequestsRequest {
    fn default() -> Self {
        Self {
            method: None,
            status: None,
            start_date: None,
            end_date: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl RequestsRequest {
    pub fn validate(&self) -> Result<()> {
        validate_limit(self.limit)?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(PathwatchError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }
        Ok(())
    }

    /// Dates travel as RFC 3339 UTC with milliseconds, the same text form
    /// event timestamps are stored in.
    pub fn to_params(&self, project: &ProjectContext) -> QueryParams {
        let mut params = tenant_params(project);
        params.insert("limit".to_string(), self.limit.to_string());
        if let Some(method) = &self.method {
            params.insert("method".to_string(), method.to_ascii_uppercase());
        }
        if let Some(status) = self.status {
            params.insert("status".to_string(), status.to_string());
        }
        for (key, date) in [("start_date", self.start_date), ("end_date", self.end_date)] {
            if let Some(date) = date {
                params.insert(
                    key.to_string(),
                    date.to_rfc3339_opts(SecondsFormat::Millis, true),
                );
            }
        }
        params
    }
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_date_param(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            PathwatchError::Validation(format!(
                "{field} must be an RFC 3339 timestamp or YYYY-MM-DD, got {raw}"
            ))
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceDetails {
    pub trace: TraceRow,
    pub spans: Vec<SpanNode<EnrichedSpan>>,
}
