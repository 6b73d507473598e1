use duckdb::params;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::model::span::EnrichedSpan;
use pathwatch_core::model::trace::TraceRow;

use crate::DuckDbSink;
use crate::analytics::event_millis;

impl DuckDbSink {
    pub fn insert_spans(&self, spans: &[EnrichedSpan]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| PathwatchError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO spans
                     (seq, trace_id, span_id, parent_span_id, timestamp, org_id, project_id,
                      service_name, span_name, span_kind, start_time_ms, end_time_ms, duration_ms,
                      status_code, status_message, attributes, events, links, resource_attributes,
                      http_method, http_url, http_status_code, db_system, db_statement, error)
                     VALUES (nextval('spans_seq'), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| PathwatchError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                stmt.execute(params![
                    span.trace_id.as_str(),
                    span.span_id.as_str(),
                    span.parent_span_id.as_ref().map(|p| p.as_str()),
                    span.timestamp as i64,
                    span.org_id,
                    span.project_id,
                    span.service_name,
                    span.span_name,
                    span.span_kind.as_str(),
                    span.start_time_ms as i64,
                    span.end_time_ms as i64,
                    span.duration_ms,
                    span.status_code.as_str(),
                    span.status_message,
                    span.attributes,
                    span.events,
                    span.links,
                    span.resource_attributes,
                    span.http_method,
                    span.http_url,
                    span.http_status_code,
                    span.db_system,
                    span.db_statement,
                    span.error,
                ])
                .map_err(|e| PathwatchError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| PathwatchError::Store(format!("commit spans failed: {e}")))
    }

    pub fn insert_traces(&self, traces: &[TraceRow]) -> Result<()> {
        if traces.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| PathwatchError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO traces
                     (seq, trace_id, timestamp, org_id, project_id, service_name, trace_name,
                      root_service_name, duration_ms, span_count, error_span_count, status,
                      http_method, http_url, http_status_code, endpoint, root_span_id)
                     VALUES (nextval('traces_seq'), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| PathwatchError::Store(format!("prepare insert traces failed: {e}")))?;

            for trace in traces {
                stmt.execute(params![
                    trace.trace_id.as_str(),
                    trace.timestamp as i64,
                    trace.org_id,
                    trace.project_id,
                    trace.service_name,
                    trace.trace_name,
                    trace.root_service_name,
                    trace.duration_ms as i64,
                    trace.span_count as i64,
                    trace.error_span_count as i64,
                    trace.status.as_str(),
                    trace.http_method,
                    trace.http_url,
                    trace.http_status_code,
                    trace.endpoint,
                    trace.root_span_id.as_str(),
                ])
                .map_err(|e| PathwatchError::Store(format!("insert trace failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| PathwatchError::Store(format!("commit traces failed: {e}")))
    }

    pub fn insert_events(&self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| PathwatchError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO events
                     (seq, id, timestamp, timestamp_ms, org_id, project_id, method, path, url,
                      host, status, latency_ms, req_size, res_size, ip, user_agent, body)
                     VALUES (nextval('events_seq'), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| PathwatchError::Store(format!("prepare insert events failed: {e}")))?;

            for event in events {
                stmt.execute(params![
                    event.id,
                    event.timestamp,
                    event_millis(event)?,
                    event.org_id,
                    event.project_id,
                    event.method,
                    event.path,
                    event.url,
                    event.host,
                    event.status,
                    event.latency_ms,
                    event.req_size,
                    event.res_size,
                    event.ip,
                    event.user_agent,
                    event.body,
                ])
                .map_err(|e| PathwatchError::Store(format!("insert event failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| PathwatchError::Store(format!("commit events failed: {e}")))
    }
}
