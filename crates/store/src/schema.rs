pub const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS spans_seq;
CREATE SEQUENCE IF NOT EXISTS traces_seq;
CREATE SEQUENCE IF NOT EXISTS events_seq;

CREATE TABLE IF NOT EXISTS spans (
  seq BIGINT PRIMARY KEY,
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span_id TEXT,
  timestamp BIGINT NOT NULL,
  org_id TEXT NOT NULL,
  project_id TEXT NOT NULL,
  service_name TEXT NOT NULL,
  span_name TEXT NOT NULL,
  span_kind TEXT NOT NULL,
  start_time_ms BIGINT NOT NULL,
  end_time_ms BIGINT NOT NULL,
  duration_ms DOUBLE NOT NULL,
  status_code TEXT NOT NULL,
  status_message TEXT,
  attributes TEXT NOT NULL,
  events TEXT NOT NULL,
  links TEXT NOT NULL,
  resource_attributes TEXT NOT NULL,
  http_method TEXT,
  http_url TEXT,
  http_status_code INTEGER,
  db_system TEXT,
  db_statement TEXT,
  error BOOLEAN NOT NULL
);

CREATE TABLE IF NOT EXISTS traces (
  seq BIGINT PRIMARY KEY,
  trace_id TEXT NOT NULL,
  timestamp BIGINT NOT NULL,
  org_id TEXT NOT NULL,
  project_id TEXT NOT NULL,
  service_name TEXT NOT NULL,
  trace_name TEXT NOT NULL,
  root_service_name TEXT NOT NULL,
  duration_ms BIGINT NOT NULL,
  span_count BIGINT NOT NULL,
  error_span_count BIGINT NOT NULL,
  status TEXT NOT NULL,
  http_method TEXT,
  http_url TEXT,
  http_status_code INTEGER,
  endpoint TEXT,
  root_span_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  seq BIGINT PRIMARY KEY,
  id TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  timestamp_ms BIGINT NOT NULL,
  org_id TEXT NOT NULL,
  project_id TEXT NOT NULL,
  method TEXT NOT NULL,
  path TEXT NOT NULL,
  url TEXT,
  host TEXT,
  status BIGINT NOT NULL,
  latency_ms BIGINT NOT NULL,
  req_size BIGINT NOT NULL,
  res_size BIGINT NOT NULL,
  ip TEXT,
  user_agent TEXT,
  body TEXT
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(org_id, project_id, trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_timestamp ON spans(timestamp);

CREATE INDEX IF NOT EXISTS idx_traces_tenant_ts ON traces(org_id, project_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_traces_trace ON traces(trace_id);

CREATE INDEX IF NOT EXISTS idx_events_tenant_ts ON events(org_id, project_id, timestamp_ms);
"#;
