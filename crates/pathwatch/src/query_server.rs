use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use axum::{Json, Router};
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::ids::TraceId;
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::EnrichedSpan;
use pathwatch_core::model::trace::{TraceRow, TraceStatus};
use pathwatch_core::query::{
    AVG_LATENCY, AnalyticsRequest, DEFAULT_LIMIT, ERROR_RATE, Interval, LIST_REQUESTS, LIST_TRACES,
    REQUEST_COUNTS_BY_PERIOD, REQUESTS_OVER_TIME, RequestsRequest, TOP_PATHS, TOTAL_REQUESTS,
    TRACE_DETAILS, TRACE_SPANS, TraceDetails, TracesRequest, parse_date_param, trace_params,
};
use pathwatch_ingest::build_forest;
use pathwatch_ingest::http::bearer_token;
use pathwatch_store::{ProjectLookup, Sink};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

#[derive(Clone)]
pub struct QueryState {
    pub sink: Arc<dyn Sink>,
    pub projects: Arc<dyn ProjectLookup>,
}

pub async fn run_query_server(state: QueryState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind query listener on {addr}"))?;
    tracing::info!(addr = %addr, "query service listening");
    axum::serve(listener, router(state))
        .await
        .context("query server failed")
}

pub fn router(state: QueryState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/", get(whoami))
        .route("/tracing/traces", get(list_traces_handler))
        .route("/tracing/traces/{trace_id}", get(trace_details_handler))
        .route("/tracing/traces/{trace_id}/spans", get(trace_spans_handler))
        .route("/analytics/total-requests", summary_route(TOTAL_REQUESTS))
        .route("/analytics/error-rate", summary_route(ERROR_RATE))
        .route("/analytics/avg-latency", summary_route(AVG_LATENCY))
        .route("/analytics/top-paths", summary_route(TOP_PATHS))
        .route("/analytics/requests-over-time", series_route(REQUESTS_OVER_TIME))
        .route(
            "/analytics/request-counts-by-period",
            series_route(REQUEST_COUNTS_BY_PERIOD),
        )
        .route("/requests", get(list_requests_handler))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Named-query helpers shared by the HTTP handlers and the CLI.
pub async fn list_traces(
    sink: &dyn Sink,
    project: &ProjectContext,
    req: &TracesRequest,
) -> Result<Vec<TraceRow>> {
    req.validate()?;
    let rows = sink.query(LIST_TRACES, &req.to_params(project)).await?;
    decode_rows(rows)
}

pub async fn trace_details(
    sink: &dyn Sink,
    project: &ProjectContext,
    trace_id: &TraceId,
) -> Result<Option<TraceDetails>> {
    let params = trace_params(project, trace_id);
    let Some(trace) = decode_rows::<TraceRow>(sink.query(TRACE_DETAILS, &params).await?)?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };
    let spans = trace_spans(sink, project, trace_id).await?;
    Ok(Some(TraceDetails {
        trace,
        spans: build_forest(spans),
    }))
}

pub async fn trace_spans(
    sink: &dyn Sink,
    project: &ProjectContext,
    trace_id: &TraceId,
) -> Result<Vec<EnrichedSpan>> {
    let rows = sink
        .query(TRACE_SPANS, &trace_params(project, trace_id))
        .await?;
    decode_rows(rows)
}

/// Runs one of the event analytics queries. Rows pass through as the sink
/// shaped them.
pub async fn event_analytics(
    sink: &dyn Sink,
    project: &ProjectContext,
    name: &str,
    req: &AnalyticsRequest,
) -> Result<Vec<serde_json::Value>> {
    req.validate()?;
    sink.query(name, &req.to_params(project)).await
}

pub async fn list_requests(
    sink: &dyn Sink,
    project: &ProjectContext,
    req: &RequestsRequest,
) -> Result<Vec<EnrichedEvent>> {
    req.validate()?;
    let rows = sink.query(LIST_REQUESTS, &req.to_params(project)).await?;
    decode_rows(rows)
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<serde_json::Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| PathwatchError::Internal(format!("unexpected row shape: {e}")))
        })
        .collect()
}

/// Project resolved from the `Authorization: Bearer` header.
struct Authenticated(ProjectContext);

impl FromRequestParts<QueryState> for Authenticated {
    type Rejection = QueryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &QueryState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let key = bearer_token(&parts.headers).ok_or(QueryError::Unauthorized)?;
        match state.projects.lookup(key).await? {
            Some(project) => Ok(Self(project)),
            None => Err(QueryError::Unauthorized),
        }
    }
}

#[derive(Debug)]
pub enum QueryError {
    Unauthorized,
    NotFound(String),
    Failed(PathwatchError),
}

impl From<PathwatchError> for QueryError {
    fn from(err: PathwatchError) -> Self {
        Self::Failed(err)
    }
}

impl From<QueryRejection> for QueryError {
    fn from(err: QueryRejection) -> Self {
        Self::Failed(PathwatchError::Validation(err.body_text()))
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, what),
            Self::Failed(err) if err.is_client_error() => (StatusCode::BAD_REQUEST, err.to_string()),
            Self::Failed(err) => {
                tracing::warn!(error = %err, "query request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "query failed".to_string())
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

type QueryResult = std::result::Result<Json<serde_json::Value>, QueryError>;

#[derive(Debug, Default, Deserialize)]
struct ListTracesQuery {
    limit: Option<String>,
    service_name: Option<String>,
    status: Option<String>,
}

fn parse_limit(raw: Option<String>) -> Result<usize> {
    match raw {
        Some(raw) => raw.parse().map_err(|_| {
            PathwatchError::Validation(format!("limit must be a positive integer, got {raw}"))
        }),
        None => Ok(DEFAULT_LIMIT),
    }
}

impl ListTracesQuery {
    fn into_request(self) -> Result<TracesRequest> {
        Ok(TracesRequest {
            service_name: self.service_name.filter(|s| !s.is_empty()),
            status: self.status.map(|s| s.parse::<TraceStatus>()).transpose()?,
            limit: parse_limit(self.limit)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsQuery {
    interval: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RequestsQuery {
    method: Option<String>,
    status: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<String>,
}

impl RequestsQuery {
    fn into_request(self) -> Result<RequestsRequest> {
        let status = self
            .status
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    PathwatchError::Validation(format!("status must be an integer, got {raw}"))
                })
            })
            .transpose()?;
        Ok(RequestsRequest {
            method: self.method.filter(|m| !m.is_empty()),
            status,
            start_date: self
                .start_date
                .map(|raw| parse_date_param("start_date", &raw))
                .transpose()?,
            end_date: self
                .end_date
                .map(|raw| parse_date_param("end_date", &raw))
                .transpose()?,
            limit: parse_limit(self.limit)?,
        })
    }
}

async fn whoami(Authenticated(project): Authenticated) -> Json<serde_json::Value> {
    Json(json!({"org_id": project.org_id, "project_id": project.project_id}))
}

async fn list_traces_handler(
    State(state): State<QueryState>,
    Authenticated(project): Authenticated,
    query: std::result::Result<Query<ListTracesQuery>, QueryRejection>,
) -> QueryResult {
    let Query(query) = query?;
    let req = query.into_request()?;
    let traces = list_traces(state.sink.as_ref(), &project, &req).await?;
    Ok(Json(json!({"data": traces})))
}

async fn trace_details_handler(
    State(state): State<QueryState>,
    Authenticated(project): Authenticated,
    Path(trace_id): Path<String>,
) -> QueryResult {
    let trace_id = TraceId::parse(&trace_id)?;
    let details = trace_details(state.sink.as_ref(), &project, &trace_id)
        .await?
        .ok_or_else(|| QueryError::NotFound(format!("trace {trace_id} not found")))?;
    Ok(Json(json!({"data": details})))
}

async fn trace_spans_handler(
    State(state): State<QueryState>,
    Authenticated(project): Authenticated,
    Path(trace_id): Path<String>,
) -> QueryResult {
    let trace_id = TraceId::parse(&trace_id)?;
    let spans = trace_spans(state.sink.as_ref(), &project, &trace_id).await?;
    Ok(Json(json!({"data": spans})))
}

/// Totals over the whole tenant; `interval` is ignored.
fn summary_route(name: &'static str) -> MethodRouter<QueryState> {
    get(
        move |State(state): State<QueryState>,
              Authenticated(project): Authenticated,
              query: std::result::Result<Query<AnalyticsQuery>, QueryRejection>| async move {
            let Query(query) = query?;
            let req = AnalyticsRequest {
                interval: None,
                limit: parse_limit(query.limit)?,
            };
            let rows = event_analytics(state.sink.as_ref(), &project, name, &req).await?;
            Ok::<_, QueryError>(Json(json!({"data": rows})))
        },
    )
}

/// Bucketed by `interval`, one hour when absent.
fn series_route(name: &'static str) -> MethodRouter<QueryState> {
    get(
        move |State(state): State<QueryState>,
              Authenticated(project): Authenticated,
              query: std::result::Result<Query<AnalyticsQuery>, QueryRejection>| async move {
            let Query(query) = query?;
            let interval = query
                .interval
                .map(|raw| raw.parse::<Interval>())
                .transpose()?
                .unwrap_or_default();
            let req = AnalyticsRequest {
                interval: Some(interval),
                limit: parse_limit(query.limit)?,
            };
            let rows = event_analytics(state.sink.as_ref(), &project, name, &req).await?;
            Ok::<_, QueryError>(Json(json!({"data": rows})))
        },
    )
}

async fn list_requests_handler(
    State(state): State<QueryState>,
    Authenticated(project): Authenticated,
    query: std::result::Result<Query<RequestsQuery>, QueryRejection>,
) -> QueryResult {
    let Query(query) = query?;
    let req = query.into_request()?;
    let events = list_requests(state.sink.as_ref(), &project, &req).await?;
    Ok(Json(json!({"data": events})))
}
