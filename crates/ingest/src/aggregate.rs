use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::{RawSpan, StatusCode};
use pathwatch_core::model::trace::{TraceRow, TraceStatus};
use pathwatch_core::time::{nanos_to_secs, round_nanos_to_millis};

use crate::hierarchy::find_root;
use crate::normalize::{non_empty, status_code};

/// Derives the trace row for the spans of one trace, or `None` when there are
/// no spans.
///
/// The row describes only the spans passed in. Nothing is read back from the
/// sink, so a trace whose spans arrive over several requests is stored as
/// several independent rows rather than one merged aggregate. Whether such
/// submissions should merge is still undecided; readers take the latest row.
pub fn aggregate_trace(spans: &[&RawSpan], ctx: &ProjectContext) -> Option<TraceRow> {
    let root = *find_root(spans)?;

    let mut min_start = u64::MAX;
    let mut max_end = 0u64;
    let mut error_span_count = 0u64;
    let mut any_unset = false;
    for span in spans {
        min_start = min_start.min(span.start_time_unix_nano);
        max_end = max_end.max(span.end_time_unix_nano);
        match span.status_code {
            StatusCode::Error => error_span_count += 1,
            StatusCode::Unset => any_unset = true,
            StatusCode::Ok => {}
        }
    }

    let status = if error_span_count > 0 {
        TraceStatus::Error
    } else if any_unset {
        TraceStatus::Pending
    } else {
        TraceStatus::Success
    };

    let http_url = non_empty(&root.http_url);
    let endpoint = http_url.as_deref().map(extract_endpoint);

    Some(TraceRow {
        trace_id: root.trace_id.clone(),
        timestamp: nanos_to_secs(min_start),
        org_id: ctx.org_id.clone(),
        project_id: ctx.project_id.clone(),
        service_name: root.service_name.clone(),
        trace_name: root.span_name.clone(),
        root_service_name: root.service_name.clone(),
        duration_ms: round_nanos_to_millis(max_end.saturating_sub(min_start)),
        span_count: spans.len() as u64,
        error_span_count,
        status,
        http_method: non_empty(&root.http_method),
        http_url,
        http_status_code: status_code(root.http_status_code),
        endpoint,
        root_span_id: root.span_id.clone(),
    })
}

/// Path component of `url`. Strings that are not absolute URLs keep
/// everything before the first `?`.
pub fn extract_endpoint(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or_default().to_string(),
    }
}
