use chrono::{DateTime, SecondsFormat, Utc};
use pathwatch_core::model::event::{EnrichedEvent, RequestEvent};
use pathwatch_core::model::project::ProjectContext;

use crate::normalize::non_empty;

pub fn enrich_event(event: &RequestEvent, ctx: &ProjectContext, now: DateTime<Utc>) -> EnrichedEvent {
    EnrichedEvent {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        org_id: ctx.org_id.clone(),
        project_id: ctx.project_id.clone(),
        method: event.method.clone(),
        path: event.path.clone(),
        url: if ctx.log_full_url {
            non_empty(&event.url)
        } else {
            None
        },
        host: non_empty(&event.host),
        status: round_half_up(event.status),
        latency_ms: round_half_up(event.latency_ms),
        req_size: round_half_up(event.req_size),
        res_size: round_half_up(event.res_size),
        ip: non_empty(&event.ip),
        user_agent: non_empty(&event.user_agent),
        body: event.body.as_ref().and_then(body_text),
    }
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Strings are stored as sent, other JSON values as compact JSON text.
fn body_text(body: &serde_json::Value) -> Option<String> {
    match body {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
