use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::Connection;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::query::{LIST_TRACES, QueryParams, TRACE_DETAILS, TRACE_SPANS};
use serde::Serialize;

use crate::analytics::is_event_query;
use crate::schema::SCHEMA_SQL;
use crate::sink::{Batch, Sink};

/// Local single-file sink for development and self-hosting.
#[derive(Clone)]
pub struct DuckDbSink {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreStatus {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub traces_count: usize,
    pub events_count: usize,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

impl DuckDbSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| PathwatchError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PathwatchError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| PathwatchError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PathwatchError::Store(format!("failed to initialize schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PathwatchError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PathwatchError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        })
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let conn = self.conn();

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let traces_count = scalar_usize(&conn, "SELECT COUNT(*) FROM traces")?;
        let events_count = scalar_usize(&conn, "SELECT COUNT(*) FROM events")?;

        let oldest_timestamp = scalar_opt_i64(&conn, "SELECT MIN(timestamp) FROM traces")?;
        let newest_timestamp = scalar_opt_i64(&conn, "SELECT MAX(timestamp) FROM traces")?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStatus {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            traces_count,
            events_count,
            oldest_timestamp,
            newest_timestamp,
        })
    }
}

#[async_trait]
impl Sink for DuckDbSink {
    async fn write(&self, batch: Batch<'_>) -> Result<()> {
        match batch {
            Batch::Spans(rows) => self.insert_spans(rows),
            Batch::Traces(rows) => self.insert_traces(rows),
            Batch::Events(rows) => self.insert_events(rows),
        }
    }

    async fn query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        match name {
            LIST_TRACES => self.list_traces(params),
            TRACE_DETAILS => self.trace_details(params),
            TRACE_SPANS => self.trace_spans(params),
            name if is_event_query(name) => self.event_query(name, params),
            other => Err(PathwatchError::Validation(format!("unknown query: {other}"))),
        }
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| PathwatchError::Store(format!("query failed: {e}")))
}

fn scalar_opt_i64(conn: &Connection, sql: &str) -> Result<Option<i64>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .map_err(|e| PathwatchError::Store(format!("query failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_initializes() {
        let store = DuckDbSink::open_in_memory().unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 0);
        assert_eq!(status.traces_count, 0);
        assert_eq!(status.events_count, 0);
        assert_eq!(status.oldest_timestamp, None);
    }

    #[test]
    fn file_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pathwatch.duckdb");
        let store = DuckDbSink::open(&path).unwrap();
        assert!(path.parent().unwrap().exists());
        assert_eq!(store.status().unwrap().db_path, path.display().to_string());
    }

    #[tokio::test]
    async fn unknown_query_is_rejected() {
        let store = DuckDbSink::open_in_memory().unwrap();
        let err = store
            .query("top_endpoints", &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PathwatchError::Validation(_)));
    }
}
