use std::collections::HashMap;

use pathwatch_core::ids::{SpanId, TraceId};
use pathwatch_core::model::span::RawSpan;

/// Spans of one trace in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceGroup<'a> {
    pub trace_id: &'a TraceId,
    pub spans: Vec<&'a RawSpan>,
}

/// Groups spans by trace id. Groups come out in the order their first span
/// arrived and spans keep arrival order inside a group.
///
/// A repeated `span_id` within a trace replaces the earlier span at the
/// earlier span's position.
pub fn group_by_trace(spans: &[RawSpan]) -> Vec<TraceGroup<'_>> {
    let mut groups: Vec<TraceGroup<'_>> = Vec::new();
    let mut group_index: HashMap<&TraceId, usize> = HashMap::new();
    let mut span_index: HashMap<(&TraceId, &SpanId), usize> = HashMap::new();

    for span in spans {
        let gi = *group_index.entry(&span.trace_id).or_insert_with(|| {
            groups.push(TraceGroup {
                trace_id: &span.trace_id,
                spans: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[gi];

        match span_index.get(&(&span.trace_id, &span.span_id)) {
            Some(&pos) => {
                tracing::debug!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    "duplicate span id, keeping latest"
                );
                group.spans[pos] = span;
            }
            None => {
                span_index.insert((&span.trace_id, &span.span_id), group.spans.len());
                group.spans.push(span);
            }
        }
    }

    groups
}
