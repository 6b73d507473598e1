//! Cloudflare R2 pipeline mirror for request events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::query::QueryParams;
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::analytics::event_millis;
use crate::sink::{Batch, Sink};

/// Event row in the pipeline's shape: epoch-millisecond timestamp.
#[derive(Debug, Serialize)]
struct PipelineEvent<'a> {
    id: &'a str,
    timestamp: i64,
    org_id: &'a str,
    project_id: &'a str,
    method: &'a str,
    path: &'a str,
    url: Option<&'a str>,
    host: Option<&'a str>,
    status: i64,
    latency_ms: i64,
    req_size: i64,
    res_size: i64,
    ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    body: Option<&'a str>,
}

impl<'a> PipelineEvent<'a> {
    fn from_row(event: &'a EnrichedEvent) -> Result<Self> {
        Ok(Self {
            id: &event.id,
            timestamp: event_millis(event)?,
            org_id: &event.org_id,
            project_id: &event.project_id,
            method: &event.method,
            path: &event.path,
            url: event.url.as_deref(),
            host: event.host.as_deref(),
            status: event.status,
            latency_ms: event.latency_ms,
            req_size: event.req_size,
            res_size: event.res_size,
            ip: event.ip.as_deref(),
            user_agent: event.user_agent.as_deref(),
            body: event.body.as_deref(),
        })
    }
}

/// Wraps a primary sink and posts every event batch it accepts to an R2
/// pipeline endpoint as a JSON array. Spans, traces and queries go to the
/// primary only.
#[derive(Clone)]
pub struct R2MirrorSink {
    primary: Arc<dyn Sink>,
    client: Client,
    pipeline_url: Url,
}

impl R2MirrorSink {
    pub fn new(primary: Arc<dyn Sink>, pipeline_url: &str, timeout: Duration) -> Result<Self> {
        let pipeline_url = Url::parse(pipeline_url).map_err(|e| {
            PathwatchError::Config(format!("bad r2 pipeline url {pipeline_url}: {e}"))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PathwatchError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            primary,
            client,
            pipeline_url,
        })
    }

    async fn mirror_events(&self, events: &[EnrichedEvent]) -> Result<()> {
        let rows = events
            .iter()
            .map(PipelineEvent::from_row)
            .collect::<Result<Vec<_>>>()?;

        let resp = self
            .client
            .post(self.pipeline_url.clone())
            .json(&rows)
            .send()
            .await
            .map_err(|e| PathwatchError::Sink(format!("r2 pipeline write failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PathwatchError::Sink(format!(
                "r2 pipeline rejected {} events with {status}: {text}",
                rows.len()
            )));
        }
        tracing::debug!(rows = rows.len(), "r2 pipeline write accepted");
        Ok(())
    }
}

#[async_trait]
impl Sink for R2MirrorSink {
    async fn write(&self, batch: Batch<'_>) -> Result<()> {
        self.primary.write(batch).await?;
        match batch {
            Batch::Events(rows) if !rows.is_empty() => self.mirror_events(rows).await,
            _ => Ok(()),
        }
    }

    async fn query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        self.primary.query(name, params).await
    }
}

#[cfg(test)]
mod tests {
    use pathwatch_core::query::TOTAL_REQUESTS;

    use super::*;
    use crate::MemorySink;

    fn mirror(primary: &MemorySink, url: &str) -> R2MirrorSink {
        R2MirrorSink::new(Arc::new(primary.clone()), url, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn events_reach_primary_and_pipeline() {
        let server = testkit::spawn_recorder(200, serde_json::json!({"success": true})).await;
        let primary = MemorySink::new();
        let sink = mirror(&primary, &format!("{}/ingest", server.base_url));
        let events = testkit::seed_events();

        sink.write(Batch::Events(&events)).await.unwrap();

        assert_eq!(primary.events(), events);
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/ingest");
        let posted: Vec<serde_json::Value> = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(posted.len(), 4);
        assert_eq!(posted[0]["id"], "e1");
        assert_eq!(posted[0]["timestamp"], 1_769_947_260_000_i64);
        assert_eq!(posted[0]["path"], "/users");
    }

    #[tokio::test]
    async fn spans_and_traces_are_not_mirrored() {
        let server = testkit::spawn_recorder(200, serde_json::json!({})).await;
        let primary = MemorySink::new();
        let sink = mirror(&primary, &server.base_url);
        let (trace, spans) = testkit::seed_rows();

        sink.write(Batch::Spans(&spans)).await.unwrap();
        sink.write(Batch::Traces(&[trace])).await.unwrap();

        assert_eq!(primary.spans().len(), 3);
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn pipeline_failure_surfaces_after_primary_write() {
        let server = testkit::spawn_recorder(502, serde_json::json!({"error": "down"})).await;
        let primary = MemorySink::new();
        let sink = mirror(&primary, &server.base_url);

        let err = sink
            .write(Batch::Events(&testkit::seed_events()))
            .await
            .unwrap_err();
        assert!(matches!(err, PathwatchError::Sink(_)));
        assert_eq!(primary.events().len(), 4);
    }

    #[tokio::test]
    async fn queries_go_to_primary() {
        let primary = MemorySink::new();
        primary
            .write(Batch::Events(&testkit::seed_events()))
            .await
            .unwrap();
        let sink = mirror(&primary, "http://127.0.0.1:9/unused");

        let rows = sink
            .query(
                TOTAL_REQUESTS,
                &pathwatch_core::query::AnalyticsRequest::default().to_params(&testkit::project()),
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["total_requests"], 4);
    }

    #[test]
    fn rejects_bad_pipeline_url() {
        let result = R2MirrorSink::new(
            Arc::new(MemorySink::new()),
            "not a url",
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(PathwatchError::Config(_))));
    }
}
