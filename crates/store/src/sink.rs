//! The write/query contract between the collector and an analytical store.

use std::fmt;

use async_trait::async_trait;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::model::span::EnrichedSpan;
use pathwatch_core::model::trace::TraceRow;
use pathwatch_core::query::QueryParams;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Spans,
    Traces,
    Events,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Spans => "spans",
            Self::Traces => "traces",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rows bound for one collection in a single write call.
#[derive(Debug, Clone, Copy)]
pub enum Batch<'a> {
    Spans(&'a [EnrichedSpan]),
    Traces(&'a [TraceRow]),
    Events(&'a [EnrichedEvent]),
}

impl Batch<'_> {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Spans(_) => Collection::Spans,
            Self::Traces(_) => Collection::Traces,
            Self::Events(_) => Collection::Events,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Spans(rows) => rows.len(),
            Self::Traces(rows) => rows.len(),
            Self::Events(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newline-delimited JSON, one row per line, no trailing newline.
    pub fn to_ndjson(&self) -> Result<String> {
        match self {
            Self::Spans(rows) => ndjson(rows),
            Self::Traces(rows) => ndjson(rows),
            Self::Events(rows) => ndjson(rows),
        }
    }
}

fn ndjson<T: Serialize>(rows: &[T]) -> Result<String> {
    let lines = rows
        .iter()
        .map(|row| {
            serde_json::to_string(row)
                .map_err(|e| PathwatchError::Internal(format!("row serialization failed: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

/// An analytical store: appends rows to named collections and answers named
/// queries with JSON rows.
///
/// Writes are not transactional across calls. A failed write returns an
/// error and leaves rows from earlier calls in place.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, batch: Batch<'_>) -> Result<()>;

    async fn query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>>;
}

pub(crate) fn required_param<'a>(params: &'a QueryParams, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| PathwatchError::Validation(format!("missing query parameter: {key}")))
}

pub(crate) fn limit_param(params: &QueryParams) -> Result<usize> {
    match params.get("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|e| PathwatchError::Validation(format!("bad limit {raw}: {e}"))),
        None => Ok(pathwatch_core::query::DEFAULT_LIMIT),
    }
}
