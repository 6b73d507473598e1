use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::model::span::EnrichedSpan;
use pathwatch_core::model::trace::TraceRow;
use pathwatch_core::query::{LIST_TRACES, QueryParams, TRACE_DETAILS, TRACE_SPANS};
use serde::Serialize;

use crate::analytics;
use crate::sink::{Batch, Collection, Sink, limit_param, required_param};

/// In-process sink that keeps every written row. Used by tests and by
/// `pathwatch run --sink memory`.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    spans: Vec<EnrichedSpan>,
    traces: Vec<TraceRow>,
    events: Vec<EnrichedEvent>,
    writes: Vec<(Collection, usize)>,
    failing: HashSet<Collection>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory sink mutex poisoned")
    }

    /// Makes every later write to `collection` fail with a sink error.
    pub fn fail_writes_to(&self, collection: Collection) {
        self.state().failing.insert(collection);
    }

    pub fn spans(&self) -> Vec<EnrichedSpan> {
        self.state().spans.clone()
    }

    pub fn traces(&self) -> Vec<TraceRow> {
        self.state().traces.clone()
    }

    pub fn events(&self) -> Vec<EnrichedEvent> {
        self.state().events.clone()
    }

    /// Successful write calls in order, with their row counts.
    pub fn writes(&self) -> Vec<(Collection, usize)> {
        self.state().writes.clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, batch: Batch<'_>) -> Result<()> {
        let mut state = self.state();
        let collection = batch.collection();
        if state.failing.contains(&collection) {
            return Err(PathwatchError::Sink(format!(
                "{collection} write failed: injected failure"
            )));
        }

        match batch {
            Batch::Spans(rows) => state.spans.extend_from_slice(rows),
            Batch::Traces(rows) => state.traces.extend_from_slice(rows),
            Batch::Events(rows) => state.events.extend_from_slice(rows),
        }
        state.writes.push((collection, batch.len()));
        Ok(())
    }

    async fn query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let org_id = required_param(params, "org_id")?;
        let project_id = required_param(params, "project_id")?;
        let state = self.state();

        if analytics::is_event_query(name) {
            let events = state
                .events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.org_id == org_id && e.project_id == project_id)
                .collect::<Vec<_>>();
            return analytics::evaluate(name, &events, params);
        }

        match name {
            LIST_TRACES => {
                let service = params.get("service_name");
                let status = params.get("status");
                let mut rows = state
                    .traces
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.org_id == org_id && t.project_id == project_id)
                    .filter(|(_, t)| service.is_none_or(|s| &t.service_name == s))
                    .filter(|(_, t)| status.is_none_or(|s| t.status.as_str() == s))
                    .collect::<Vec<_>>();
                rows.sort_by(|(ia, a), (ib, b)| {
                    b.timestamp.cmp(&a.timestamp).then_with(|| ib.cmp(ia))
                });
                rows.truncate(limit_param(params)?);
                to_json(rows.into_iter().map(|(_, t)| t))
            }
            TRACE_DETAILS => {
                let trace_id = required_param(params, "trace_id")?;
                let latest = state.traces.iter().rev().find(|t| {
                    t.org_id == org_id && t.project_id == project_id && t.trace_id.as_str() == trace_id
                });
                to_json(latest)
            }
            TRACE_SPANS => {
                let trace_id = required_param(params, "trace_id")?;
                let mut rows = state
                    .spans
                    .iter()
                    .filter(|s| {
                        s.org_id == org_id
                            && s.project_id == project_id
                            && s.trace_id.as_str() == trace_id
                    })
                    .collect::<Vec<_>>();
                rows.sort_by_key(|s| s.start_time_ms);
                to_json(rows)
            }
            other => Err(PathwatchError::Validation(format!("unknown query: {other}"))),
        }
    }
}

fn to_json<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<Vec<serde_json::Value>> {
    rows.into_iter()
        .map(|row| {
            serde_json::to_value(row)
                .map_err(|e| PathwatchError::Internal(format!("row serialization failed: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pathwatch_core::query::{TracesRequest, trace_params};

    use super::*;

    #[tokio::test]
    async fn injected_failure_only_hits_named_collection() {
        let sink = MemorySink::new();
        sink.fail_writes_to(Collection::Traces);
        let (trace, spans) = testkit::seed_rows();

        sink.write(Batch::Spans(&spans)).await.unwrap();
        let err = sink.write(Batch::Traces(&[trace])).await.unwrap_err();

        assert!(matches!(err, PathwatchError::Sink(_)));
        assert_eq!(sink.spans().len(), 3);
        assert!(sink.traces().is_empty());
        assert_eq!(sink.writes(), vec![(Collection::Spans, 3)]);
    }

    #[tokio::test]
    async fn named_queries_match_duckdb_shapes() {
        let sink = MemorySink::new();
        let (trace, spans) = testkit::seed_rows();
        sink.write(Batch::Spans(&spans)).await.unwrap();
        sink.write(Batch::Traces(&[trace.clone()])).await.unwrap();

        let project = testkit::project();
        let list = sink
            .query(LIST_TRACES, &TracesRequest::default().to_params(&project))
            .await
            .unwrap();
        assert_eq!(list, vec![serde_json::to_value(&trace).unwrap()]);

        let params = trace_params(&project, &trace.trace_id);
        let span_rows = sink.query(TRACE_SPANS, &params).await.unwrap();
        let ids = span_rows
            .iter()
            .map(|s| s["span_id"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn queries_require_tenant() {
        let sink = MemorySink::new();
        let err = sink.query(LIST_TRACES, &QueryParams::new()).await.unwrap_err();
        assert!(matches!(err, PathwatchError::Validation(_)));
    }
}
