use std::sync::{Arc, Mutex};

use axum::extract::Request;
use axum::http::StatusCode as HttpStatus;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status, span};
use pathwatch_core::ids::{SpanId, TraceId};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::{EnrichedSpan, RawSpan, SpanKind, StatusCode};
use pathwatch_core::model::trace::{TraceRow, TraceStatus};
use prost::Message;

pub const API_KEY: &str = "pw_test_key";

pub fn project() -> ProjectContext {
    ProjectContext {
        project_id: "proj_1".to_string(),
        org_id: "org_1".to_string(),
        log_full_url: false,
    }
}

pub fn raw_span(
    trace_id: &str,
    span_id: &str,
    parent: Option<&str>,
    start_ns: u64,
    end_ns: u64,
    status: StatusCode,
) -> RawSpan {
    RawSpan {
        trace_id: TraceId::parse(trace_id).unwrap(),
        span_id: SpanId::parse(span_id).unwrap(),
        parent_span_id: parent.map(|p| SpanId::parse(p).unwrap()),
        service_name: "api".to_string(),
        span_name: format!("op {span_id}"),
        span_kind: if parent.is_none() {
            SpanKind::Server
        } else {
            SpanKind::Internal
        },
        start_time_unix_nano: start_ns,
        end_time_unix_nano: end_ns,
        duration_ms: end_ns.saturating_sub(start_ns) as f64 / 1e6,
        status_code: status,
        status_message: None,
        attributes: None,
        events: None,
        links: None,
        resource_attributes: None,
        http_method: None,
        http_url: None,
        http_status_code: None,
        db_system: None,
        db_statement: None,
    }
}

/// Root `a` (0..1s, OK) with children `b` (0.1..0.4s, OK) and `c`
/// (0.2..1.2s, ERROR), all in trace `t1`.
pub fn seed_spans() -> Vec<RawSpan> {
    let mut root = raw_span("t1", "a", None, 0, 1_000_000_000, StatusCode::Ok);
    root.span_name = "GET /users".to_string();
    root.http_method = Some("GET".to_string());
    root.http_url = Some("https://api.example.com/users?page=2".to_string());
    root.http_status_code = Some(500);
    vec![
        root,
        raw_span("t1", "b", Some("a"), 100_000_000, 400_000_000, StatusCode::Ok),
        raw_span(
            "t1",
            "c",
            Some("a"),
            200_000_000,
            1_200_000_000,
            StatusCode::Error,
        ),
    ]
}

pub fn seed_spans_json() -> serde_json::Value {
    serde_json::to_value(seed_spans()).unwrap()
}

/// The stored rows the seed spans produce for [`project`].
pub fn seed_rows() -> (TraceRow, Vec<EnrichedSpan>) {
    let ctx = project();
    let spans = seed_spans()
        .into_iter()
        .map(|raw| EnrichedSpan {
            timestamp: raw.start_time_unix_nano / 1_000_000_000,
            org_id: ctx.org_id.clone(),
            project_id: ctx.project_id.clone(),
            start_time_ms: raw.start_time_unix_nano / 1_000_000,
            end_time_ms: raw.end_time_unix_nano / 1_000_000,
            error: raw.status_code == StatusCode::Error,
            trace_id: raw.trace_id,
            span_id: raw.span_id,
            parent_span_id: raw.parent_span_id,
            service_name: raw.service_name,
            span_name: raw.span_name,
            span_kind: raw.span_kind,
            duration_ms: raw.duration_ms,
            status_code: raw.status_code,
            status_message: raw.status_message,
            attributes: "{}".to_string(),
            events: "[]".to_string(),
            links: "[]".to_string(),
            resource_attributes: "{}".to_string(),
            http_method: raw.http_method,
            http_url: raw.http_url,
            http_status_code: raw.http_status_code,
            db_system: raw.db_system,
            db_statement: raw.db_statement,
        })
        .collect::<Vec<_>>();

    let trace = TraceRow {
        trace_id: TraceId::parse("t1").unwrap(),
        timestamp: 0,
        org_id: ctx.org_id,
        project_id: ctx.project_id,
        service_name: "api".to_string(),
        trace_name: "GET /users".to_string(),
        root_service_name: "api".to_string(),
        duration_ms: 1200,
        span_count: 3,
        error_span_count: 1,
        status: TraceStatus::Error,
        http_method: Some("GET".to_string()),
        http_url: Some("https://api.example.com/users?page=2".to_string()),
        http_status_code: Some(500),
        endpoint: Some("/users".to_string()),
        root_span_id: SpanId::parse("a").unwrap(),
    };

    (trace, spans)
}

pub fn event_row(
    id: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    status: i64,
    latency_ms: i64,
) -> EnrichedEvent {
    let ctx = project();
    EnrichedEvent {
        id: id.to_string(),
        timestamp: timestamp.to_string(),
        org_id: ctx.org_id,
        project_id: ctx.project_id,
        method: method.to_string(),
        path: path.to_string(),
        url: None,
        host: None,
        status,
        latency_ms,
        req_size: 0,
        res_size: 128,
        ip: None,
        user_agent: None,
        body: None,
    }
}

/// Four requests over two hours of 2026-02-01: three in the 12:00 hour
/// (`/users` 200 and 500, `/orders` 201) and `/health` 404 at 13:05.
pub fn seed_events() -> Vec<EnrichedEvent> {
    vec![
        event_row("e1", "2026-02-01T12:01:00.000Z", "GET", "/users", 200, 10),
        event_row("e2", "2026-02-01T12:20:00.000Z", "GET", "/users", 500, 30),
        event_row("e3", "2026-02-01T12:40:00.000Z", "POST", "/orders", 201, 20),
        event_row("e4", "2026-02-01T13:05:00.000Z", "GET", "/health", 404, 40),
    ]
}

pub fn batch_body(api_key: &str, spans: &[RawSpan]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "api_key": api_key,
        "spans": spans,
    }))
    .unwrap()
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn int_kv(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

/// OTLP export carrying the seed trace: 16-byte trace id of `0x11`, span ids
/// `0xaa..`, `0xbb..`, `0xcc..`.
pub fn seed_otlp_request() -> ExportTraceServiceRequest {
    let trace_id = vec![0x11; 16];
    let make = |id: u8, parent: Option<u8>, start: u64, end: u64, code: i32| Span {
        trace_id: trace_id.clone(),
        span_id: vec![id; 8],
        parent_span_id: parent.map(|p| vec![p; 8]).unwrap_or_default(),
        name: format!("op {id:x}"),
        kind: span::SpanKind::Internal as i32,
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        status: Some(Status {
            message: String::new(),
            code,
        }),
        ..Default::default()
    };

    let mut root = make(0xaa, None, 0, 1_000_000_000, 1);
    root.name = "GET /users".to_string();
    root.kind = span::SpanKind::Server as i32;
    root.attributes = vec![
        string_kv("http.request.method", "GET"),
        string_kv("url.full", "https://api.example.com/users?page=2"),
        int_kv("http.response.status_code", 500),
    ];

    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(Resource {
                attributes: vec![string_kv("service.name", "api")],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans: vec![
                    root,
                    make(0xbb, Some(0xaa), 100_000_000, 400_000_000, 0),
                    make(0xcc, Some(0xaa), 200_000_000, 1_200_000_000, 2),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn seed_otlp_bytes() -> Vec<u8> {
    seed_otlp_request().encode_to_vec()
}

/// One request captured by [`spawn_recorder`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct Recorder {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl Recorder {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Local HTTP server that answers every request with `status` and `reply`
/// and keeps what it received.
pub async fn spawn_recorder(status: u16, reply: serde_json::Value) -> Recorder {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let app = axum::Router::new().fallback(move |req: Request| {
        let log = log.clone();
        let reply = reply.clone();
        async move {
            let (parts, body) = req.into_parts();
            let header = |name: &str| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            log.lock().unwrap().push(RecordedRequest {
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                query: parts.uri.query().map(str::to_string),
                authorization: header("authorization"),
                content_type: header("content-type"),
                body: body.to_vec(),
            });
            (HttpStatus::from_u16(status).unwrap(), axum::Json(reply))
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Recorder {
        base_url: format!("http://{addr}"),
        requests,
    }
}
