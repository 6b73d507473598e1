use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use serial_test::serial;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_pathwatch")
}

/// A command isolated from the caller's pathwatch environment.
fn pathwatch(temp: &Path) -> Command {
    let mut cmd = Command::new(bin());
    cmd.env("HOME", temp)
        .env("PATHWATCH_CONFIG", temp.join("config.toml"))
        .env_remove("DATABASE_URL")
        .env_remove("TINYBIRD_URL")
        .env_remove("TINYBIRD_TOKEN")
        .env_remove("TB_TOKEN")
        .env_remove("CLOUDFLARE_R2_PIPELINE_URL")
        .env_remove("PATHWATCH_SINK")
        .env_remove("PATHWATCH_DB_PATH")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT");
    cmd
}

fn write_config(temp: &Path) {
    std::fs::write(
        temp.join("config.toml"),
        format!(
            r#"
sink = "duckdb"

[[api_keys]]
api_key = "{}"
project_id = "proj_1"
org_id = "org_1"
"#,
            testkit::API_KEY
        ),
    )
    .unwrap();
}

struct Server {
    child: Child,
    collector_port: u16,
    query_port: u16,
    db_path: PathBuf,
}

fn spawn_server(temp: &Path) -> Server {
    write_config(temp);
    let collector_port = free_port();
    let query_port = free_port();
    let db_path = temp.join("pathwatch.duckdb");

    let child = pathwatch(temp)
        .arg("--db-path")
        .arg(&db_path)
        .arg("run")
        .arg("--collector-addr")
        .arg(format!("127.0.0.1:{collector_port}"))
        .arg("--query-addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    Server {
        child,
        collector_port,
        query_port,
        db_path,
    }
}

async fn wait_ready(port: u16, child: &mut Child) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        assert!(child.try_wait().unwrap().is_none(), "pathwatch exited early");
        if client
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("port {port} never became ready");
}

fn interrupt(child: &mut Child) {
    let sent = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if sent {
        for _ in 0..50 {
            if child.try_wait().unwrap().is_some() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[tokio::test]
#[serial]
async fn e2e_batch_ingest_then_query() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = spawn_server(temp.path());
    wait_ready(server.collector_port, &mut server.child).await;
    wait_ready(server.query_port, &mut server.child).await;

    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!(
            "http://127.0.0.1:{}/tracing/spans/batch",
            server.collector_port
        ))
        .header("content-type", "application/json")
        .body(testkit::batch_body(testkit::API_KEY, &testkit::seed_spans()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp, serde_json::json!({"success": true, "spans": 3, "traces": 1}));

    let query = |path: &str| {
        client
            .get(format!("http://127.0.0.1:{}{path}", server.query_port))
            .bearer_auth(testkit::API_KEY)
            .send()
    };

    let list: serde_json::Value = query("/tracing/traces").await.unwrap().json().await.unwrap();
    let traces = list["data"].as_array().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["status"], "error");
    assert_eq!(traces[0]["endpoint"], "/users");

    let details: serde_json::Value = query("/tracing/traces/t1").await.unwrap().json().await.unwrap();
    assert_eq!(details["data"]["trace"]["span_count"], 3);
    assert_eq!(
        details["data"]["spans"][0]["children"]
            .as_array()
            .unwrap()
            .len(),
        2
    );

    let ingested: serde_json::Value = client
        .post(format!("http://127.0.0.1:{}/ingest", server.collector_port))
        .json(&serde_json::json!([
            {"api_key": testkit::API_KEY, "method": "GET", "path": "/users", "status": 200,
             "latency_ms": 12, "req_size": 0, "res_size": 64},
            {"api_key": testkit::API_KEY, "method": "GET", "path": "/users", "status": 503,
             "latency_ms": 40, "req_size": 0, "res_size": 0},
        ]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ingested, serde_json::json!({"success": true, "count": 2}));

    let rate: serde_json::Value = query("/analytics/error-rate").await.unwrap().json().await.unwrap();
    assert_eq!(rate["data"][0]["total_requests"], 2);
    assert_eq!(rate["data"][0]["error_rate"], 0.5);

    let requests: serde_json::Value = query("/requests?status=503").await.unwrap().json().await.unwrap();
    assert_eq!(requests["data"].as_array().unwrap().len(), 1);
    assert_eq!(requests["data"][0]["latency_ms"], 40);

    let unauthorized = client
        .get(format!("http://127.0.0.1:{}/tracing/traces", server.query_port))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    interrupt(&mut server.child);

    let listed = pathwatch(temp.path())
        .arg("--json")
        .arg("--db-path")
        .arg(&server.db_path)
        .arg("traces")
        .arg("--org-id")
        .arg("org_1")
        .arg("--project-id")
        .arg("proj_1")
        .output()
        .unwrap();
    let rows = stdout_json(&listed);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["trace_id"], "t1");

    let status = pathwatch(temp.path())
        .arg("--json")
        .arg("--db-path")
        .arg(&server.db_path)
        .arg("status")
        .output()
        .unwrap();
    let status = stdout_json(&status);
    assert_eq!(status["spans_count"], 3);
    assert_eq!(status["traces_count"], 1);
    assert_eq!(status["events_count"], 2);
}

#[tokio::test]
#[serial]
async fn e2e_rejected_key_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = spawn_server(temp.path());
    wait_ready(server.collector_port, &mut server.child).await;

    let resp = reqwest::Client::new()
        .post(format!(
            "http://127.0.0.1:{}/tracing/spans/batch",
            server.collector_port
        ))
        .body(testkit::batch_body("pw_unknown", &testkit::seed_spans()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

    interrupt(&mut server.child);

    let status = pathwatch(temp.path())
        .arg("--json")
        .arg("--db-path")
        .arg(&server.db_path)
        .arg("status")
        .output()
        .unwrap();
    let status = stdout_json(&status);
    assert_eq!(status["spans_count"], 0);
    assert_eq!(status["traces_count"], 0);
}

#[test]
fn aggregate_prints_seed_trace() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("spans.json");
    std::fs::write(&file, serde_json::to_vec(&testkit::seed_spans()).unwrap()).unwrap();

    let output = pathwatch(temp.path())
        .arg("aggregate")
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("trace=t1 status=error duration=1200ms spans=3 errors=1 root=a"));
    assert!(stdout.contains("GET /users -> 500"));
    assert!(stdout.contains("-- 3 spans, 1 traces --"));

    let json = pathwatch(temp.path())
        .arg("--json")
        .arg("aggregate")
        .arg(&file)
        .output()
        .unwrap();
    let value = stdout_json(&json);
    assert_eq!(value["traces"][0]["duration_ms"], 1200);
    assert_eq!(value["spans"].as_array().unwrap().len(), 3);
}

#[test]
fn run_reports_every_missing_setting() {
    let temp = tempfile::tempdir().unwrap();
    let output = pathwatch(temp.path())
        .arg("run")
        .arg("--sink")
        .arg("tinybird")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TINYBIRD_URL"));
    assert!(stderr.contains("TINYBIRD_TOKEN"));
    assert!(stderr.contains("DATABASE_URL"));
}
