mod output;
mod query_server;
mod telemetry;

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pathwatch_core::config::{Config, SinkKind};
use pathwatch_core::ids::TraceId;
use pathwatch_core::model::project::ProjectContext;
use pathwatch_core::model::span::RawSpan;
use pathwatch_core::query::{DEFAULT_LIMIT, TracesRequest};
use pathwatch_ingest::dispatch::prepare_spans;
use pathwatch_ingest::http::CollectorState;
use pathwatch_ingest::{
    Dispatcher, aggregate_trace, build_forest, enrich_span, group_by_trace, run_ingest_server,
};
use pathwatch_store::{
    CachedProjects, DuckDbSink, MemorySink, PgProjects, ProjectLookup, R2MirrorSink, Sink,
    StaticProjects, TinybirdConfig, TinybirdSink,
};
use serde::Deserialize;

use crate::output::{
    print_forest, print_status_human, print_trace_details_human, print_trace_row,
    print_traces_human,
};
use crate::query_server::QueryState;
use crate::telemetry::{LogFormat, init_cli_tracing, init_run_tracing, shutdown_tracing};

const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "pathwatch")]
#[command(about = "API telemetry collector, query service and trace aggregation tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Local DuckDB file (overrides config)")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the collector and query servers")]
    Run {
        #[arg(long)]
        collector_addr: Option<String>,
        #[arg(long)]
        query_addr: Option<String>,
        #[arg(long, help = "tinybird | duckdb | memory")]
        sink: Option<String>,
    },
    #[command(about = "Aggregate spans from a JSON array, batch record or NDJSON file (- for stdin)")]
    Aggregate {
        file: PathBuf,
        #[arg(long, default_value = "local")]
        org_id: String,
        #[arg(long, default_value = "local")]
        project_id: String,
    },
    #[command(about = "Show one stored trace with its span tree")]
    Trace {
        trace_id: String,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    #[command(about = "List stored traces, newest first")]
    Traces {
        #[command(flatten)]
        tenant: TenantArgs,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    #[command(about = "Summarize the local DuckDB store")]
    Status,
}

#[derive(Args, Debug)]
struct TenantArgs {
    #[arg(long, env = "PATHWATCH_ORG_ID")]
    org_id: String,
    #[arg(long, env = "PATHWATCH_PROJECT_ID")]
    project_id: String,
}

impl TenantArgs {
    fn project(self) -> ProjectContext {
        ProjectContext {
            project_id: self.project_id,
            org_id: self.org_id,
            log_full_url: false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            collector_addr,
            query_addr,
            sink,
        } => run_server(cli.db_path, collector_addr, query_addr, sink).await,
        Commands::Aggregate {
            file,
            org_id,
            project_id,
        } => {
            init_cli_tracing();
            let project = ProjectContext {
                project_id,
                org_id,
                log_full_url: false,
            };
            run_aggregate(&file, &project, cli.json)
        }
        Commands::Trace { trace_id, tenant } => {
            init_cli_tracing();
            let store = open_local_store(cli.db_path)?;
            let trace_id = TraceId::parse(&trace_id)?;
            let details = query_server::trace_details(&store, &tenant.project(), &trace_id)
                .await?
                .with_context(|| format!("trace {trace_id} not found"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print_trace_details_human(&details);
            }
            Ok(())
        }
        Commands::Traces {
            tenant,
            service,
            status,
            limit,
        } => {
            init_cli_tracing();
            let store = open_local_store(cli.db_path)?;
            let req = TracesRequest {
                service_name: service,
                status: status.map(|s| s.parse()).transpose()?,
                limit,
            };
            let rows = query_server::list_traces(&store, &tenant.project(), &req).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_traces_human(&rows);
            }
            Ok(())
        }
        Commands::Status => {
            init_cli_tracing();
            let status = open_local_store(cli.db_path)?.status()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status_human(&status);
            }
            Ok(())
        }
    }
}

async fn run_server(
    db_path: Option<PathBuf>,
    collector_addr: Option<String>,
    query_addr: Option<String>,
    sink: Option<String>,
) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = db_path {
        cfg.db_path = v;
    }
    if let Some(v) = collector_addr {
        cfg.collector_addr = v;
    }
    if let Some(v) = query_addr {
        cfg.query_addr = v;
    }
    if let Some(v) = sink {
        cfg.sink = v.parse()?;
    }
    cfg.validate()?;

    init_run_tracing(LogFormat::from_env());

    let collector_addr: SocketAddr = cfg
        .collector_addr
        .parse()
        .with_context(|| format!("bad collector address {}", cfg.collector_addr))?;
    let query_addr: SocketAddr = cfg
        .query_addr
        .parse()
        .with_context(|| format!("bad query address {}", cfg.query_addr))?;

    let (sink, local) = open_sink(&cfg)?;
    let projects = project_lookup(&cfg).await?;

    eprintln!("pathwatch run");
    eprintln!("  sink: {:?}", cfg.sink);
    if local.is_some() {
        eprintln!("  db: {}", cfg.db_path.display());
    }
    if let Some(url) = &cfg.r2_pipeline_url {
        eprintln!("  r2 pipeline: {url}");
    }
    eprintln!("  collector: {collector_addr}");
    eprintln!("  query: {query_addr}");

    let mut ingest_task = tokio::spawn(run_ingest_server(
        CollectorState {
            projects: projects.clone(),
            dispatcher: Dispatcher::new(sink.clone()),
        },
        collector_addr,
    ));
    let mut query_task = tokio::spawn(query_server::run_query_server(
        QueryState { sink, projects },
        query_addr,
    ));
    let retention_task = local.map(|store| tokio::spawn(run_retention(store, cfg.retention_ttl)));

    let outcome = tokio::select! {
        res = &mut ingest_task => res.map_err(anyhow::Error::from).and_then(|r| r.map_err(anyhow::Error::from)),
        res = &mut query_task => res.map_err(anyhow::Error::from).and_then(|r| r),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    };

    ingest_task.abort();
    query_task.abort();
    if let Some(task) = retention_task {
        task.abort();
    }
    shutdown_tracing();
    outcome
}

fn open_sink(cfg: &Config) -> anyhow::Result<(Arc<dyn Sink>, Option<DuckDbSink>)> {
    let (primary, local): (Arc<dyn Sink>, Option<DuckDbSink>) = match cfg.sink {
        SinkKind::Tinybird => {
            let sink = TinybirdSink::new(TinybirdConfig::from_config(cfg)?)?;
            (Arc::new(sink), None)
        }
        SinkKind::DuckDb => {
            let store = DuckDbSink::open(&cfg.db_path)
                .with_context(|| format!("open {}", cfg.db_path.display()))?;
            (Arc::new(store.clone()), Some(store))
        }
        SinkKind::Memory => (Arc::new(MemorySink::new()), None),
    };

    match &cfg.r2_pipeline_url {
        Some(url) => {
            let mirror = R2MirrorSink::new(primary, url, cfg.sink_timeout)?;
            Ok((Arc::new(mirror), local))
        }
        None => Ok((primary, local)),
    }
}

async fn project_lookup(cfg: &Config) -> anyhow::Result<Arc<dyn ProjectLookup>> {
    match &cfg.database_url {
        Some(url) => {
            let pg = PgProjects::connect(url)
                .await
                .context("connect to project database")?;
            Ok(Arc::new(CachedProjects::new(pg, cfg.api_key_cache_ttl)))
        }
        None => Ok(Arc::new(StaticProjects::new(&cfg.api_keys))),
    }
}

async fn run_retention(store: DuckDbSink, ttl: Duration) {
    let start = tokio::time::Instant::now() + RETENTION_INTERVAL;
    let mut interval = tokio::time::interval_at(start, RETENTION_INTERVAL);
    loop {
        interval.tick().await;
        match store.prune_ttl(ttl) {
            Ok(report) if report.spans + report.traces + report.events > 0 => {
                tracing::info!(
                    spans = report.spans,
                    traces = report.traces,
                    events = report.events,
                    "retention pruned rows"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = ?err, "retention task failed"),
        }
    }
}

fn open_local_store(db_path: Option<PathBuf>) -> anyhow::Result<DuckDbSink> {
    let path = match db_path {
        Some(path) => path,
        None => Config::load().context("load config")?.db_path,
    };
    DuckDbSink::open(&path).with_context(|| format!("open {}", path.display()))
}

#[derive(Deserialize)]
struct BatchFile {
    spans: Vec<RawSpan>,
}

/// Accepts a JSON array of spans, a batch record (`{"spans": [...]}`), or one
/// span per line.
fn parse_spans(raw: &str) -> anyhow::Result<Vec<RawSpan>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("parse span array");
    }
    if trimmed.starts_with('{')
        && let Ok(batch) = serde_json::from_str::<BatchFile>(trimmed)
    {
        return Ok(batch.spans);
    }

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("parse span on line {}", i + 1))
        })
        .collect()
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read spans from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))
}

fn run_aggregate(file: &Path, project: &ProjectContext, json: bool) -> anyhow::Result<()> {
    let spans = parse_spans(&read_input(file)?)?;

    if json {
        let prepared = prepare_spans(&spans, project);
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "spans": prepared.spans,
                "traces": prepared.traces,
            }))?
        );
        return Ok(());
    }

    let groups = group_by_trace(&spans);
    for group in &groups {
        let Some(row) = aggregate_trace(&group.spans, project) else {
            continue;
        };
        print_trace_row(&row);
        let enriched = group
            .spans
            .iter()
            .map(|s| enrich_span(s, project))
            .collect::<Vec<_>>();
        print_forest(&build_forest(enriched));
    }
    println!("-- {} spans, {} traces --", spans.len(), groups.len());
    Ok(())
}
