use std::sync::Arc;

use chrono::Utc;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::RequestEvent;
use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::{EnrichedSpan, RawSpan};
use pathwatch_core::model::trace::{TraceRow, TraceSubmission};
use pathwatch_core::time::now_unix_secs;
use pathwatch_store::sink::{Batch, Sink};
use serde::Serialize;

use crate::aggregate::aggregate_trace;
use crate::events::enrich_event;
use crate::index::group_by_trace;
use crate::normalize::{enrich_span, enrich_trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub spans: usize,
    pub traces: usize,
}

/// Rows produced from one request's spans, before any write.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSpans {
    pub spans: Vec<EnrichedSpan>,
    pub traces: Vec<TraceRow>,
}

/// Normalizes every span and aggregates each trace independently. Traces
/// with no aggregate are left out.
pub fn prepare_spans(spans: &[RawSpan], ctx: &ProjectContext) -> PreparedSpans {
    let enriched = spans.iter().map(|s| enrich_span(s, ctx)).collect();
    let traces = group_by_trace(spans)
        .iter()
        .filter_map(|group| aggregate_trace(&group.spans, ctx))
        .collect();
    PreparedSpans {
        spans: enriched,
        traces,
    }
}

/// Routes authenticated submissions through normalization and aggregation
/// and writes the resulting rows.
///
/// Span rows and trace rows go out as two separate writes. If the trace write
/// fails the span rows stay written and the error is returned.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn Sink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// A trace record. Without spans (or with an empty list) the caller's
    /// aggregate is stored as sent; with spans it is recomputed from them.
    pub async fn ingest_trace(
        &self,
        trace: &TraceSubmission,
        ctx: &ProjectContext,
    ) -> Result<IngestSummary> {
        match trace.spans.as_deref() {
            Some(spans) if !spans.is_empty() => {
                if let Some(stray) = spans.iter().find(|s| s.trace_id != trace.trace_id) {
                    return Err(PathwatchError::Validation(format!(
                        "span {} belongs to trace {}, not {}",
                        stray.span_id, stray.trace_id, trace.trace_id
                    )));
                }
                self.write_prepared(prepare_spans(spans, ctx)).await
            }
            _ => {
                let row = enrich_trace(trace, ctx, now_unix_secs());
                self.sink.write(Batch::Traces(std::slice::from_ref(&row))).await?;
                tracing::debug!(trace_id = %row.trace_id, "direct trace stored");
                Ok(IngestSummary {
                    spans: 0,
                    traces: 1,
                })
            }
        }
    }

    pub async fn ingest_batch(
        &self,
        spans: &[RawSpan],
        ctx: &ProjectContext,
    ) -> Result<IngestSummary> {
        self.write_prepared(prepare_spans(spans, ctx)).await
    }

    pub async fn ingest_events(
        &self,
        events: &[RequestEvent],
        ctx: &ProjectContext,
    ) -> Result<usize> {
        let now = Utc::now();
        let rows = events
            .iter()
            .map(|e| enrich_event(e, ctx, now))
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            self.sink.write(Batch::Events(&rows)).await?;
        }
        tracing::debug!(count = rows.len(), project_id = %ctx.project_id, "events stored");
        Ok(rows.len())
    }

    async fn write_prepared(&self, prepared: PreparedSpans) -> Result<IngestSummary> {
        if !prepared.spans.is_empty() {
            self.sink.write(Batch::Spans(&prepared.spans)).await?;
        }
        if !prepared.traces.is_empty() {
            self.sink
                .write(Batch::Traces(&prepared.traces))
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        error = %e,
                        spans = prepared.spans.len(),
                        "trace write failed after span rows were stored"
                    );
                })?;
        }

        let summary = IngestSummary {
            spans: prepared.spans.len(),
            traces: prepared.traces.len(),
        };
        tracing::debug!(spans = summary.spans, traces = summary.traces, "spans ingested");
        Ok(summary)
    }
}
