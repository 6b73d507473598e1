//! Raw submissions to stored rows.

use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::{EnrichedSpan, OpaqueJson, RawSpan};
use pathwatch_core::model::trace::{TraceRow, TraceSubmission};
use pathwatch_core::time::{nanos_to_millis, nanos_to_secs, round_millis};

const EMPTY_OBJECT: &str = "{}";
const EMPTY_ARRAY: &str = "[]";

pub fn enrich_span(span: &RawSpan, ctx: &ProjectContext) -> EnrichedSpan {
    EnrichedSpan {
        trace_id: span.trace_id.clone(),
        span_id: span.span_id.clone(),
        parent_span_id: span.parent_span_id.clone(),
        timestamp: nanos_to_secs(span.start_time_unix_nano),
        org_id: ctx.org_id.clone(),
        project_id: ctx.project_id.clone(),
        service_name: span.service_name.clone(),
        span_name: span.span_name.clone(),
        span_kind: span.span_kind,
        start_time_ms: nanos_to_millis(span.start_time_unix_nano),
        end_time_ms: nanos_to_millis(span.end_time_unix_nano),
        duration_ms: span.duration_ms,
        status_code: span.status_code,
        status_message: non_empty(&span.status_message),
        attributes: opaque_or(&span.attributes, EMPTY_OBJECT),
        events: opaque_or(&span.events, EMPTY_ARRAY),
        links: opaque_or(&span.links, EMPTY_ARRAY),
        resource_attributes: opaque_or(&span.resource_attributes, EMPTY_OBJECT),
        http_method: non_empty(&span.http_method),
        http_url: non_empty(&span.http_url),
        http_status_code: status_code(span.http_status_code),
        db_system: non_empty(&span.db_system),
        db_statement: non_empty(&span.db_statement),
        error: span.is_error(),
    }
}

/// Trace record sent without spans: the aggregate fields are taken as given
/// and stamped with the ingest time.
pub fn enrich_trace(trace: &TraceSubmission, ctx: &ProjectContext, now_secs: u64) -> TraceRow {
    TraceRow {
        trace_id: trace.trace_id.clone(),
        timestamp: now_secs,
        org_id: ctx.org_id.clone(),
        project_id: ctx.project_id.clone(),
        service_name: trace.service_name.clone(),
        trace_name: trace.trace_name.clone(),
        root_service_name: trace.root_service_name.clone(),
        duration_ms: round_millis(trace.duration_ms),
        span_count: trace.span_count,
        error_span_count: trace.error_span_count,
        status: trace.status,
        http_method: non_empty(&trace.http_method),
        http_url: non_empty(&trace.http_url),
        http_status_code: status_code(trace.http_status_code),
        endpoint: non_empty(&trace.endpoint),
        root_span_id: trace.root_span_id.clone(),
    }
}

/// A zero status code means none was recorded.
pub(crate) fn status_code(code: Option<u16>) -> Option<u16> {
    code.filter(|c| *c != 0)
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn opaque_or(value: &Option<OpaqueJson>, default: &str) -> String {
    match value {
        Some(json) if json.as_str() != "null" => json.as_str().to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pathwatch_core::model::trace::TraceStatus;

    use super::*;

    #[test]
    fn derives_times_and_defaults() {
        let mut raw = testkit::seed_spans().remove(2);
        raw.start_time_unix_nano = 1_700_000_000_999_999_999;
        raw.end_time_unix_nano = 1_700_000_001_500_000_000;
        let row = enrich_span(&raw, &testkit::project());

        assert_eq!(row.timestamp, 1_700_000_000);
        assert_eq!(row.start_time_ms, 1_700_000_000_999);
        assert_eq!(row.end_time_ms, 1_700_000_001_500);
        assert_eq!(row.attributes, "{}");
        assert_eq!(row.events, "[]");
        assert_eq!(row.links, "[]");
        assert_eq!(row.resource_attributes, "{}");
        assert!(row.error);
        assert_eq!(row.org_id, "org_1");
        assert_eq!(row.project_id, "proj_1");
    }

    #[test]
    fn passes_payload_through_and_drops_empty_strings() {
        let mut raw = testkit::seed_spans().remove(0);
        raw.attributes = Some(OpaqueJson::from_value(&serde_json::json!({"k": [1, 2]})));
        raw.status_message = Some(String::new());
        raw.db_system = Some(String::new());
        let row = enrich_span(&raw, &testkit::project());

        assert_eq!(row.attributes, "{\"k\":[1,2]}");
        assert_eq!(row.status_message, None);
        assert_eq!(row.db_system, None);
        assert_eq!(row.http_method.as_deref(), Some("GET"));
        assert!(!row.error);
    }

    #[test]
    fn normalization_is_deterministic() {
        let ctx = testkit::project();
        for raw in testkit::seed_spans() {
            assert_eq!(enrich_span(&raw, &ctx), enrich_span(&raw, &ctx));
        }
    }

    #[test]
    fn direct_trace_keeps_caller_fields() {
        let submission: TraceSubmission = serde_json::from_value(serde_json::json!({
            "trace_id": "t9",
            "service_name": "api",
            "trace_name": "GET /health",
            "root_service_name": "api",
            "duration_ms": 12,
            "span_count": 1,
            "error_span_count": 0,
            "status": "success",
            "endpoint": "",
            "root_span_id": "r",
        }))
        .unwrap();
        let row = enrich_trace(&submission, &testkit::project(), 1_700_000_000);

        assert_eq!(row.timestamp, 1_700_000_000);
        assert_eq!(row.duration_ms, 12);
        assert_eq!(row.status, TraceStatus::Success);
        assert_eq!(row.endpoint, None);
        assert_eq!(row.org_id, "org_1");
    }

    #[test]
    fn direct_trace_rounds_fractional_duration_and_drops_zero_status() {
        let submission: TraceSubmission = serde_json::from_value(serde_json::json!({
            "trace_id": "t9",
            "service_name": "api",
            "trace_name": "GET /health",
            "root_service_name": "api",
            "duration_ms": 12.5,
            "span_count": 1,
            "error_span_count": 0,
            "status": "success",
            "http_status_code": 0,
            "root_span_id": "r",
        }))
        .unwrap();
        let row = enrich_trace(&submission, &testkit::project(), 1_700_000_000);
        assert_eq!(row.duration_ms, 13);
        assert_eq!(row.http_status_code, None);
    }

    #[test]
    fn zero_span_status_code_is_absent() {
        let mut raw = testkit::seed_spans().remove(0);
        raw.http_status_code = Some(0);
        assert_eq!(enrich_span(&raw, &testkit::project()).http_status_code, None);

        raw.http_status_code = Some(204);
        assert_eq!(
            enrich_span(&raw, &testkit::project()).http_status_code,
            Some(204)
        );
    }
}
