use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value as OtlpValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind as OtlpKind;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode as OtlpStatus;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::ids::{SpanId, TraceId};
use pathwatch_core::model::span::{OpaqueJson, RawSpan, SpanKind, StatusCode};
use pathwatch_core::time::NANOS_PER_MILLI;

const HTTP_METHOD_KEYS: &[&str] = &["http.request.method", "http.method"];
const HTTP_URL_KEYS: &[&str] = &["url.full", "http.url"];
const HTTP_STATUS_KEYS: &[&str] = &["http.response.status_code", "http.status_code"];
const DB_SYSTEM_KEYS: &[&str] = &["db.system.name", "db.system"];
const DB_STATEMENT_KEYS: &[&str] = &["db.query.text", "db.statement"];

pub fn decode_request(req: &ExportTraceServiceRequest) -> Result<Vec<RawSpan>> {
    let mut spans = Vec::new();
    for rs in &req.resource_spans {
        let resource = rs.resource.as_ref();
        for ss in &rs.scope_spans {
            for span in &ss.spans {
                spans.push(decode_span(resource, span)?);
            }
        }
    }
    Ok(spans)
}

pub fn decode_span(resource: Option<&Resource>, span: &OtlpSpan) -> Result<RawSpan> {
    let trace_id = bytes_to_hex(&span.trace_id)
        .ok_or_else(|| PathwatchError::Validation("otlp span without trace id".to_string()))
        .and_then(|hex| TraceId::parse(&hex))?;
    let span_id = bytes_to_hex(&span.span_id)
        .ok_or_else(|| PathwatchError::Validation("otlp span without span id".to_string()))
        .and_then(|hex| SpanId::parse(&hex))?;
    let parent_span_id = bytes_to_hex(&span.parent_span_id)
        .map(|hex| SpanId::parse(&hex))
        .transpose()?;

    let events = serde_json::Value::Array(
        span.events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "time_unix_nano": e.time_unix_nano,
                    "attributes": kv_to_json(&e.attributes),
                })
            })
            .collect(),
    );
    let links = serde_json::Value::Array(
        span.links
            .iter()
            .map(|l| {
                serde_json::json!({
                    "trace_id": bytes_to_hex(&l.trace_id),
                    "span_id": bytes_to_hex(&l.span_id),
                    "attributes": kv_to_json(&l.attributes),
                })
            })
            .collect(),
    );
    let resource_attrs = resource
        .map(|r| kv_to_json(&r.attributes))
        .unwrap_or_else(|| serde_json::json!({}));

    let (status_code, status_message) = match &span.status {
        Some(status) => (
            map_status(status.code),
            Some(status.message.clone()).filter(|m| !m.is_empty()),
        ),
        None => (StatusCode::Unset, None),
    };
    let elapsed = span.end_time_unix_nano.saturating_sub(span.start_time_unix_nano);

    Ok(RawSpan {
        trace_id,
        span_id,
        parent_span_id,
        service_name: service_name(resource),
        span_name: span.name.clone(),
        span_kind: map_kind(span.kind),
        start_time_unix_nano: span.start_time_unix_nano,
        end_time_unix_nano: span.end_time_unix_nano,
        duration_ms: elapsed as f64 / NANOS_PER_MILLI as f64,
        status_code,
        status_message,
        attributes: Some(OpaqueJson::from_value(&kv_to_json(&span.attributes))),
        events: Some(OpaqueJson::from_value(&events)),
        links: Some(OpaqueJson::from_value(&links)),
        resource_attributes: Some(OpaqueJson::from_value(&resource_attrs)),
        http_method: string_attr(&span.attributes, HTTP_METHOD_KEYS),
        http_url: string_attr(&span.attributes, HTTP_URL_KEYS),
        http_status_code: int_attr(&span.attributes, HTTP_STATUS_KEYS)
            .and_then(|v| u16::try_from(v).ok()),
        db_system: string_attr(&span.attributes, DB_SYSTEM_KEYS),
        db_statement: string_attr(&span.attributes, DB_STATEMENT_KEYS),
    })
}

fn map_kind(kind: i32) -> SpanKind {
    match OtlpKind::try_from(kind).unwrap_or(OtlpKind::Unspecified) {
        OtlpKind::Server => SpanKind::Server,
        OtlpKind::Client => SpanKind::Client,
        OtlpKind::Producer => SpanKind::Producer,
        OtlpKind::Consumer => SpanKind::Consumer,
        OtlpKind::Internal | OtlpKind::Unspecified => SpanKind::Internal,
    }
}

fn map_status(code: i32) -> StatusCode {
    match OtlpStatus::try_from(code).unwrap_or(OtlpStatus::Unset) {
        OtlpStatus::Ok => StatusCode::Ok,
        OtlpStatus::Error => StatusCode::Error,
        OtlpStatus::Unset => StatusCode::Unset,
    }
}

fn service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| string_attr(&r.attributes, &["service.name"]))
        .unwrap_or_else(|| "unknown".to_string())
}

fn find_attr<'a>(attrs: &'a [KeyValue], keys: &[&str]) -> Option<&'a OtlpValue> {
    keys.iter().find_map(|key| {
        attrs
            .iter()
            .find(|kv| kv.key == *key)
            .and_then(|kv| kv.value.as_ref())
            .and_then(|v| v.value.as_ref())
    })
}

fn string_attr(attrs: &[KeyValue], keys: &[&str]) -> Option<String> {
    match find_attr(attrs, keys)? {
        OtlpValue::StringValue(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn int_attr(attrs: &[KeyValue], keys: &[&str]) -> Option<i64> {
    match find_attr(attrs, keys)? {
        OtlpValue::IntValue(i) => Some(*i),
        OtlpValue::StringValue(s) => s.parse().ok(),
        _ => None,
    }
}

fn kv_to_json(attrs: &[KeyValue]) -> serde_json::Value {
    serde_json::Value::Object(
        attrs
            .iter()
            .map(|kv| (kv.key.clone(), any_value_to_json(kv.value.as_ref())))
            .collect(),
    )
}

fn any_value_to_json(value: Option<&AnyValue>) -> serde_json::Value {
    let Some(inner) = value.and_then(|v| v.value.as_ref()) else {
        return serde_json::Value::Null;
    };
    match inner {
        OtlpValue::StringValue(s) => serde_json::Value::String(s.clone()),
        OtlpValue::BoolValue(b) => serde_json::Value::Bool(*b),
        OtlpValue::IntValue(i) => serde_json::Value::from(*i),
        OtlpValue::DoubleValue(d) => serde_json::Value::from(*d),
        OtlpValue::BytesValue(b) => {
            serde_json::Value::String(bytes_to_hex(b).unwrap_or_default())
        }
        OtlpValue::ArrayValue(arr) => serde_json::Value::Array(
            arr.values
                .iter()
                .map(|v| any_value_to_json(Some(v)))
                .collect(),
        ),
        OtlpValue::KvlistValue(list) => kv_to_json(&list.values),
    }
}

fn bytes_to_hex(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;

    use super::*;

    #[test]
    fn decodes_seed_export() {
        let spans = decode_request(&testkit::seed_otlp_request()).unwrap();
        assert_eq!(spans.len(), 3);

        let root = &spans[0];
        assert_eq!(root.trace_id.as_str(), "11111111111111111111111111111111");
        assert_eq!(root.span_id.as_str(), "aaaaaaaaaaaaaaaa");
        assert!(root.parent_span_id.is_none());
        assert_eq!(root.service_name, "api");
        assert_eq!(root.span_kind, SpanKind::Server);
        assert_eq!(root.status_code, StatusCode::Ok);
        assert_eq!(root.http_method.as_deref(), Some("GET"));
        assert_eq!(root.http_status_code, Some(500));
        assert_eq!(root.duration_ms, 1000.0);

        assert_eq!(
            spans[1].parent_span_id.as_ref().map(SpanId::as_str),
            Some("aaaaaaaaaaaaaaaa")
        );
        assert_eq!(spans[1].status_code, StatusCode::Unset);
        assert_eq!(spans[2].status_code, StatusCode::Error);
    }

    #[test]
    fn attributes_keep_their_types() {
        let spans = decode_request(&testkit::seed_otlp_request()).unwrap();
        let attrs: serde_json::Value =
            serde_json::from_str(spans[0].attributes.as_ref().unwrap().as_str()).unwrap();
        assert_eq!(attrs["http.response.status_code"], 500);
        assert_eq!(attrs["http.request.method"], "GET");

        let resource: serde_json::Value =
            serde_json::from_str(spans[0].resource_attributes.as_ref().unwrap().as_str())
                .unwrap();
        assert_eq!(resource["service.name"], "api");
    }

    #[test]
    fn missing_status_is_unset_and_missing_ids_fail() {
        let span = OtlpSpan {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            name: "call".into(),
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_000_100_000_000,
            status: None,
            ..Default::default()
        };
        let out = decode_span(None, &span).unwrap();
        assert_eq!(out.status_code, StatusCode::Unset);
        assert_eq!(out.service_name, "unknown");
        assert_eq!(out.duration_ms, 100.0);

        let anonymous = OtlpSpan {
            span_id: vec![2; 8],
            ..Default::default()
        };
        assert!(matches!(
            decode_span(None, &anonymous),
            Err(PathwatchError::Validation(_))
        ));
    }
}
