use std::sync::Arc;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, body::Bytes};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use pathwatch_core::error::PathwatchError;
use pathwatch_core::model::event::RequestEvent;
use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::RawSpan;
use pathwatch_core::model::trace::TraceSubmission;
use pathwatch_store::projects::ProjectLookup;
use prost::Message;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::dispatch::{Dispatcher, IngestSummary};
use crate::otlp::decode::decode_request;

#[derive(Clone)]
pub struct CollectorState {
    pub projects: Arc<dyn ProjectLookup>,
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Deserialize)]
struct TraceIngestRequest {
    api_key: String,
    #[serde(flatten)]
    trace: TraceSubmission,
}

#[derive(Debug, Deserialize)]
struct BatchIngestRequest {
    api_key: String,
    spans: Vec<RawSpan>,
}

/// Collector failure as sent to the client: `{success: false, error}`.
#[derive(Debug)]
pub struct CollectorError(PathwatchError);

impl From<PathwatchError> for CollectorError {
    fn from(err: PathwatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PathwatchError::Validation(_) | PathwatchError::Parse(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            PathwatchError::Unauthorized(_) => (StatusCode::FORBIDDEN, "Invalid API key".to_string()),
            other => {
                tracing::warn!(error = %other, "collector request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to store telemetry".to_string(),
                )
            }
        };
        (status, Json(json!({"success": false, "error": message}))).into_response()
    }
}

type CollectorResult = Result<Json<serde_json::Value>, CollectorError>;

pub fn router(state: CollectorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/", get(root))
        .route("/ingest", post(ingest_events))
        .route("/tracing/traces", post(ingest_trace))
        .route("/tracing/spans/batch", post(ingest_batch))
        .route("/v1/traces", post(export_traces))
        .layer(RequestDecompressionLayer::new())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn root() -> &'static str {
    "pathwatch collector"
}

async fn ingest_events(State(state): State<CollectorState>, body: Bytes) -> CollectorResult {
    let events: Vec<RequestEvent> = parse_json(&body)?;
    let Some(first) = events.first() else {
        return Err(PathwatchError::Validation("expected at least one event".to_string()).into());
    };
    let ctx = authenticate(&state, &first.api_key).await?;
    let count = state.dispatcher.ingest_events(&events, &ctx).await?;
    Ok(Json(json!({"success": true, "count": count})))
}

async fn ingest_trace(State(state): State<CollectorState>, body: Bytes) -> CollectorResult {
    let req: TraceIngestRequest = parse_json(&body)?;
    let ctx = authenticate(&state, &req.api_key).await?;
    let summary = state.dispatcher.ingest_trace(&req.trace, &ctx).await?;
    Ok(summary_json(summary))
}

async fn ingest_batch(State(state): State<CollectorState>, body: Bytes) -> CollectorResult {
    let req: BatchIngestRequest = parse_json(&body)?;
    let ctx = authenticate(&state, &req.api_key).await?;
    let summary = state.dispatcher.ingest_batch(&req.spans, &ctx).await?;
    Ok(summary_json(summary))
}

async fn export_traces(
    State(state): State<CollectorState>,
    headers: HeaderMap,
    body: Bytes,
) -> CollectorResult {
    let api_key = bearer_token(&headers).ok_or_else(|| {
        PathwatchError::Unauthorized("missing bearer token".to_string())
    })?;
    let ctx = authenticate(&state, api_key).await?;
    let req = ExportTraceServiceRequest::decode(body).map_err(|e| {
        tracing::warn!(error = ?e, "otlp http traces decode failed");
        PathwatchError::Validation(format!("invalid otlp payload: {e}"))
    })?;
    let spans = decode_request(&req)?;
    let summary = state.dispatcher.ingest_batch(&spans, &ctx).await?;
    Ok(summary_json(summary))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, PathwatchError> {
    serde_json::from_slice(body).map_err(|e| PathwatchError::Validation(e.to_string()))
}

async fn authenticate(state: &CollectorState, api_key: &str) -> Result<ProjectContext, PathwatchError> {
    state
        .projects
        .lookup(api_key)
        .await?
        .ok_or_else(|| PathwatchError::Unauthorized("unknown api key".to_string()))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn summary_json(summary: IngestSummary) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "spans": summary.spans,
        "traces": summary.traces,
    }))
}
