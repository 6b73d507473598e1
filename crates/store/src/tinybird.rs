use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use pathwatch_core::config::Config;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::query::QueryParams;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::sink::{Batch, Collection, Sink};

#[derive(Debug, Clone)]
pub struct TinybirdConfig {
    /// Events endpoint. Any query string is replaced by `?name=<collection>`.
    pub url: String,
    pub token: String,
    /// Base for pipe queries. Defaults to the origin of `url`.
    pub api_base: Option<String>,
    pub timeout: Duration,
    pub gzip: bool,
}

impl TinybirdConfig {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let url = cfg
            .tinybird_url
            .clone()
            .ok_or_else(|| PathwatchError::Config("TINYBIRD_URL is not set".to_string()))?;
        let token = cfg
            .tinybird_token
            .clone()
            .ok_or_else(|| PathwatchError::Config("TINYBIRD_TOKEN is not set".to_string()))?;
        Ok(Self {
            url,
            token,
            api_base: cfg.tinybird_api_base.clone(),
            timeout: cfg.sink_timeout,
            gzip: cfg.sink_gzip,
        })
    }
}

#[derive(Clone)]
pub struct TinybirdSink {
    client: Client,
    events_url: Url,
    api_base: String,
    token: String,
    gzip: bool,
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    successful_rows: u64,
    #[serde(default)]
    quarantined_rows: u64,
}

#[derive(Debug, Deserialize)]
struct PipeResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

impl TinybirdSink {
    pub fn new(cfg: TinybirdConfig) -> Result<Self> {
        let mut events_url = Url::parse(&cfg.url)
            .map_err(|e| PathwatchError::Config(format!("bad tinybird url {}: {e}", cfg.url)))?;
        events_url.set_query(None);
        events_url.set_fragment(None);

        let api_base = match cfg.api_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => events_url.origin().ascii_serialization(),
        };

        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| PathwatchError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            events_url,
            api_base,
            token: cfg.token,
            gzip: cfg.gzip,
        })
    }

    fn collection_url(&self, collection: Collection) -> Url {
        let mut url = self.events_url.clone();
        url.query_pairs_mut().append_pair("name", collection.name());
        url
    }

    fn pipe_url(&self, name: &str) -> String {
        format!("{}/v0/pipes/{name}.json", self.api_base)
    }
}

#[async_trait]
impl Sink for TinybirdSink {
    async fn write(&self, batch: Batch<'_>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let collection = batch.collection();
        let body = batch.to_ndjson()?.into_bytes();
        let (body, content_encoding) = maybe_gzip(body, self.gzip)?;

        let mut req = self
            .client
            .post(self.collection_url(collection))
            .bearer_auth(&self.token)
            .header("content-type", "application/x-ndjson");
        if let Some(encoding) = content_encoding {
            req = req.header("content-encoding", encoding);
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| PathwatchError::Sink(format!("{collection} write failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PathwatchError::Sink(format!(
                "{collection} write rejected with {status}: {text}"
            )));
        }

        match resp.json::<IngestResponse>().await {
            Ok(summary) if summary.quarantined_rows > 0 => {
                tracing::warn!(
                    collection = %collection,
                    quarantined_rows = summary.quarantined_rows,
                    successful_rows = summary.successful_rows,
                    "tinybird quarantined rows"
                );
            }
            Ok(summary) => {
                tracing::debug!(
                    collection = %collection,
                    rows = summary.successful_rows,
                    "tinybird write accepted"
                );
            }
            Err(e) => {
                tracing::debug!(error = ?e, collection = %collection, "unparsed tinybird response");
            }
        }
        Ok(())
    }

    async fn query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let url = self.pipe_url(name);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| PathwatchError::Sink(format!("pipe {name} request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PathwatchError::Sink(format!(
                "pipe {name} failed with {status}: {text}"
            )));
        }

        let parsed: PipeResponse = resp
            .json()
            .await
            .map_err(|e| PathwatchError::Sink(format!("pipe {name} returned bad json: {e}")))?;
        Ok(parsed.data)
    }
}

fn maybe_gzip(body: Vec<u8>, gzip: bool) -> Result<(Vec<u8>, Option<&'static str>)> {
    if !gzip {
        return Ok((body, None));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&body)
        .map_err(|e| PathwatchError::Internal(format!("gzip write failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| PathwatchError::Internal(format!("gzip finish failed: {e}")))?;
    Ok((compressed, Some("gzip")))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn make_sink(url: &str, api_base: Option<&str>) -> TinybirdSink {
        TinybirdSink::new(TinybirdConfig {
            url: url.to_string(),
            token: "tok".to_string(),
            api_base: api_base.map(str::to_string),
            timeout: Duration::from_secs(1),
            gzip: false,
        })
        .unwrap()
    }

    #[test]
    fn collection_url_replaces_query() {
        let sink = make_sink("https://api.tinybird.co/v0/events?name=legacy&wait=true", None);
        assert_eq!(
            sink.collection_url(Collection::Traces).as_str(),
            "https://api.tinybird.co/v0/events?name=traces"
        );
    }

    #[test]
    fn pipe_url_defaults_to_origin() {
        let sink = make_sink("https://api.tinybird.co/v0/events", None);
        assert_eq!(
            sink.pipe_url("list_traces"),
            "https://api.tinybird.co/v0/pipes/list_traces.json"
        );

        let custom = make_sink(
            "https://api.tinybird.co/v0/events",
            Some("https://api.europe-west2.gcp.tinybird.co/"),
        );
        assert_eq!(
            custom.pipe_url("trace_spans"),
            "https://api.europe-west2.gcp.tinybird.co/v0/pipes/trace_spans.json"
        );
    }

    #[test]
    fn rejects_unparseable_url() {
        let result = TinybirdSink::new(TinybirdConfig {
            url: "not a url".to_string(),
            token: "tok".to_string(),
            api_base: None,
            timeout: Duration::from_secs(1),
            gzip: false,
        });
        assert!(matches!(result, Err(PathwatchError::Config(_))));
    }

    #[tokio::test]
    async fn write_posts_ndjson_to_named_collection() {
        let server = testkit::spawn_recorder(
            200,
            serde_json::json!({"successful_rows": 2, "quarantined_rows": 1}),
        )
        .await;
        let sink = make_sink(&format!("{}/v0/events?name=legacy", server.base_url), None);
        let (_, spans) = testkit::seed_rows();

        sink.write(Batch::Spans(&spans[..2])).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/v0/events");
        assert_eq!(req.query.as_deref(), Some("name=spans"));
        assert_eq!(req.authorization.as_deref(), Some("Bearer tok"));
        assert_eq!(req.content_type.as_deref(), Some("application/x-ndjson"));
        let body = String::from_utf8(req.body.clone()).unwrap();
        assert_eq!(body.lines().count(), 2);
    }

    #[tokio::test]
    async fn rejected_write_is_sink_error() {
        let server =
            testkit::spawn_recorder(403, serde_json::json!({"error": "invalid token"})).await;
        let sink = make_sink(&format!("{}/v0/events", server.base_url), None);
        let (trace, _) = testkit::seed_rows();

        let err = sink.write(Batch::Traces(&[trace])).await.unwrap_err();
        match err {
            PathwatchError::Sink(msg) => {
                assert!(msg.contains("traces"));
                assert!(msg.contains("403"));
                assert!(msg.contains("invalid token"));
            }
            other => panic!("expected sink error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let server = testkit::spawn_recorder(200, serde_json::json!({})).await;
        let sink = make_sink(&format!("{}/v0/events", server.base_url), None);
        sink.write(Batch::Events(&[])).await.unwrap();
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn query_reads_pipe_data() {
        let server = testkit::spawn_recorder(
            200,
            serde_json::json!({"data": [{"total_requests": 4}], "rows": 1}),
        )
        .await;
        let sink = make_sink(&format!("{}/v0/events", server.base_url), None);
        let mut params = QueryParams::new();
        params.insert("org_id".into(), "org_1".into());

        let rows = sink.query("total_requests", &params).await.unwrap();
        assert_eq!(rows, vec![serde_json::json!({"total_requests": 4})]);
        let req = &server.requests()[0];
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/v0/pipes/total_requests.json");
        assert_eq!(req.query.as_deref(), Some("org_id=org_1"));
    }

    #[tokio::test]
    async fn failed_pipe_is_sink_error() {
        let server = testkit::spawn_recorder(500, serde_json::json!({"error": "boom"})).await;
        let sink = make_sink(&format!("{}/v0/events", server.base_url), None);
        let err = sink
            .query("list_traces", &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PathwatchError::Sink(_)));
    }

    #[test]
    fn gzip_body_decodes() {
        let (body, encoding) = maybe_gzip(b"{\"a\":1}\n{\"a\":2}".to_vec(), true).unwrap();
        assert_eq!(encoding, Some("gzip"));
        let mut out = String::new();
        GzDecoder::new(body.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "{\"a\":1}\n{\"a\":2}");

        let (plain, encoding) = maybe_gzip(b"x".to_vec(), false).unwrap();
        assert_eq!(plain, b"x");
        assert!(encoding.is_none());
    }
}
