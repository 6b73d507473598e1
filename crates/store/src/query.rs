use duckdb::types::Value;
use duckdb::{Row, params_from_iter};
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::query::{
    AVG_LATENCY, ERROR_RATE, LIST_REQUESTS, QueryParams, REQUEST_COUNTS_BY_PERIOD,
    REQUESTS_OVER_TIME, TOP_PATHS, TOTAL_REQUESTS,
};
use serde_json::json;

use crate::DuckDbSink;
use crate::analytics::{
    ERROR_STATUS, bucket_label, date_param, error_rate, interval_param, status_class, status_param,
};
use crate::sink::{limit_param, required_param};

const TRACE_COLUMNS: &str = "trace_id, timestamp, org_id, project_id, service_name, trace_name,
    root_service_name, duration_ms, span_count, error_span_count, status, http_method, http_url,
    http_status_code, endpoint, root_span_id";

const EVENT_COLUMNS: &str = "id, timestamp, org_id, project_id, method, path, url, host, status,
    latency_ms, req_size, res_size, ip, user_agent, body";

const SPAN_COLUMNS: &str = "trace_id, span_id, parent_span_id, timestamp, org_id, project_id,
    service_name, span_name, span_kind, start_time_ms, end_time_ms, duration_ms, status_code,
    status_message, attributes, events, links, resource_attributes, http_method, http_url,
    http_status_code, db_system, db_statement, error";

impl DuckDbSink {
    pub(crate) fn list_traces(&self, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let mut sql = format!("SELECT {TRACE_COLUMNS} FROM traces WHERE org_id = ? AND project_id = ?");
        let mut args = tenant_args(params)?;

        if let Some(service) = params.get("service_name") {
            sql.push_str(" AND service_name = ?");
            args.push(Value::Text(service.clone()));
        }
        if let Some(status) = params.get("status") {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.clone()));
        }
        sql.push_str(" ORDER BY timestamp DESC, seq DESC LIMIT ?");
        args.push(Value::BigInt(limit_param(params)? as i64));

        self.select(&sql, args, trace_json)
    }

    /// Latest stored aggregate for one trace. Several rows can exist when a
    /// trace was submitted more than once; the newest write wins.
    pub(crate) fn trace_details(&self, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let sql = format!(
            "SELECT {TRACE_COLUMNS} FROM traces
             WHERE org_id = ? AND project_id = ? AND trace_id = ?
             ORDER BY seq DESC LIMIT 1"
        );
        let mut args = tenant_args(params)?;
        args.push(Value::Text(required_param(params, "trace_id")?.to_string()));
        self.select(&sql, args, trace_json)
    }

    pub(crate) fn trace_spans(&self, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM spans
             WHERE org_id = ? AND project_id = ? AND trace_id = ?
             ORDER BY start_time_ms ASC, seq ASC"
        );
        let mut args = tenant_args(params)?;
        args.push(Value::Text(required_param(params, "trace_id")?.to_string()));
        self.select(&sql, args, span_json)
    }

    pub(crate) fn event_query(&self, name: &str, params: &QueryParams) -> Result<Vec<serde_json::Value>> {
        let tenant = "FROM events WHERE org_id = ? AND project_id = ?";
        let mut args = tenant_args(params)?;

        match name {
            TOTAL_REQUESTS => self.select(&format!("SELECT COUNT(*) {tenant}"), args, |row| {
                Ok(json!({"total_requests": row.get::<_, i64>(0)?}))
            }),
            ERROR_RATE => {
                let sql = format!(
                    "SELECT COUNT(*), COUNT(CASE WHEN status >= {ERROR_STATUS} THEN 1 END) {tenant}"
                );
                self.select(&sql, args, |row| {
                    let total = row.get::<_, i64>(0)?;
                    let errors = row.get::<_, i64>(1)?;
                    Ok(json!({
                        "total_requests": total,
                        "error_requests": errors,
                        "error_rate": error_rate(total, errors),
                    }))
                })
            }
            AVG_LATENCY => self.select(&format!("SELECT AVG(latency_ms) {tenant}"), args, |row| {
                Ok(json!({"avg_latency_ms": row.get::<_, Option<f64>>(0)?}))
            }),
            TOP_PATHS => {
                let sql = format!(
                    "SELECT path, COUNT(*) AS requests,
                            COUNT(CASE WHEN status >= {ERROR_STATUS} THEN 1 END),
                            AVG(latency_ms)
                     {tenant}
                     GROUP BY path
                     ORDER BY requests DESC, path ASC
                     LIMIT ?"
                );
                args.push(Value::BigInt(limit_param(params)? as i64));
                self.select(&sql, args, |row| {
                    Ok(json!({
                        "path": row.get::<_, String>(0)?,
                        "requests": row.get::<_, i64>(1)?,
                        "error_requests": row.get::<_, i64>(2)?,
                        "avg_latency_ms": row.get::<_, Option<f64>>(3)?,
                    }))
                })
            }
            REQUESTS_OVER_TIME => {
                let width = interval_param(params)?.as_millis();
                let sql = format!(
                    "SELECT timestamp_ms - (timestamp_ms % {width}) AS bucket, COUNT(*),
                            COUNT(CASE WHEN status >= {ERROR_STATUS} THEN 1 END),
                            AVG(latency_ms)
                     {tenant}
                     GROUP BY bucket
                     ORDER BY bucket DESC
                     LIMIT ?"
                );
                args.push(Value::BigInt(limit_param(params)? as i64));
                self.select(&sql, args, |row| {
                    Ok(json!({
                        "bucket": bucket_label(row.get::<_, i64>(0)?),
                        "requests": row.get::<_, i64>(1)?,
                        "error_requests": row.get::<_, i64>(2)?,
                        "avg_latency_ms": row.get::<_, Option<f64>>(3)?,
                    }))
                })
            }
            REQUEST_COUNTS_BY_PERIOD => {
                let width = interval_param(params)?.as_millis();
                let sql = format!(
                    "SELECT timestamp_ms - (timestamp_ms % {width}) AS bucket,
                            status - (status % 100) AS status_class, COUNT(*)
                     {tenant}
                     GROUP BY bucket, status_class
                     ORDER BY bucket DESC, status_class ASC
                     LIMIT ?"
                );
                args.push(Value::BigInt(limit_param(params)? as i64));
                self.select(&sql, args, |row| {
                    Ok(json!({
                        "bucket": bucket_label(row.get::<_, i64>(0)?),
                        "status_class": status_class(row.get::<_, i64>(1)?),
                        "requests": row.get::<_, i64>(2)?,
                    }))
                })
            }
            LIST_REQUESTS => {
                let mut sql = format!("SELECT {EVENT_COLUMNS} {tenant}");
                if let Some(method) = params.get("method") {
                    sql.push_str(" AND UPPER(method) = UPPER(?)");
                    args.push(Value::Text(method.clone()));
                }
                if let Some(status) = status_param(params)? {
                    sql.push_str(" AND status = ?");
                    args.push(Value::BigInt(status));
                }
                if let Some(start) = date_param(params, "start_date")? {
                    sql.push_str(" AND timestamp_ms >= ?");
                    args.push(Value::BigInt(start));
                }
                if let Some(end) = date_param(params, "end_date")? {
                    sql.push_str(" AND timestamp_ms <= ?");
                    args.push(Value::BigInt(end));
                }
                sql.push_str(" ORDER BY timestamp_ms DESC, seq DESC LIMIT ?");
                args.push(Value::BigInt(limit_param(params)? as i64));
                self.select(&sql, args, event_json)
            }
            other => Err(PathwatchError::Validation(format!("unknown query: {other}"))),
        }
    }

    fn select<F>(&self, sql: &str, args: Vec<Value>, map: F) -> Result<Vec<serde_json::Value>>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<serde_json::Value>,
    {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| PathwatchError::Store(format!("prepare query failed: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(args.iter()), map)
            .map_err(|e| PathwatchError::Store(format!("query failed: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| PathwatchError::Store(format!("map row failed: {e}")))?);
        }
        Ok(out)
    }
}

fn tenant_args(params: &QueryParams) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(required_param(params, "org_id")?.to_string()),
        Value::Text(required_param(params, "project_id")?.to_string()),
    ])
}

fn trace_json(row: &Row<'_>) -> duckdb::Result<serde_json::Value> {
    Ok(json!({
        "trace_id": row.get::<_, String>(0)?,
        "timestamp": row.get::<_, i64>(1)?,
        "org_id": row.get::<_, String>(2)?,
        "project_id": row.get::<_, String>(3)?,
        "service_name": row.get::<_, String>(4)?,
        "trace_name": row.get::<_, String>(5)?,
        "root_service_name": row.get::<_, String>(6)?,
        "duration_ms": row.get::<_, i64>(7)?,
        "span_count": row.get::<_, i64>(8)?,
        "error_span_count": row.get::<_, i64>(9)?,
        "status": row.get::<_, String>(10)?,
        "http_method": row.get::<_, Option<String>>(11)?,
        "http_url": row.get::<_, Option<String>>(12)?,
        "http_status_code": row.get::<_, Option<i32>>(13)?,
        "endpoint": row.get::<_, Option<String>>(14)?,
        "root_span_id": row.get::<_, String>(15)?,
    }))
}

fn event_json(row: &Row<'_>) -> duckdb::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "timestamp": row.get::<_, String>(1)?,
        "org_id": row.get::<_, String>(2)?,
        "project_id": row.get::<_, String>(3)?,
        "method": row.get::<_, String>(4)?,
        "path": row.get::<_, String>(5)?,
        "url": row.get::<_, Option<String>>(6)?,
        "host": row.get::<_, Option<String>>(7)?,
        "status": row.get::<_, i64>(8)?,
        "latency_ms": row.get::<_, i64>(9)?,
        "req_size": row.get::<_, i64>(10)?,
        "res_size": row.get::<_, i64>(11)?,
        "ip": row.get::<_, Option<String>>(12)?,
        "user_agent": row.get::<_, Option<String>>(13)?,
        "body": row.get::<_, Option<String>>(14)?,
    }))
}

fn span_json(row: &Row<'_>) -> duckdb::Result<serde_json::Value> {
    Ok(json!({
        "trace_id": row.get::<_, String>(0)?,
        "span_id": row.get::<_, String>(1)?,
        "parent_span_id": row.get::<_, Option<String>>(2)?,
        "timestamp": row.get::<_, i64>(3)?,
        "org_id": row.get::<_, String>(4)?,
        "project_id": row.get::<_, String>(5)?,
        "service_name": row.get::<_, String>(6)?,
        "span_name": row.get::<_, String>(7)?,
        "span_kind": row.get::<_, String>(8)?,
        "start_time_ms": row.get::<_, i64>(9)?,
        "end_time_ms": row.get::<_, i64>(10)?,
        "duration_ms": row.get::<_, f64>(11)?,
        "status_code": row.get::<_, String>(12)?,
        "status_message": row.get::<_, Option<String>>(13)?,
        "attributes": row.get::<_, String>(14)?,
        "events": row.get::<_, String>(15)?,
        "links": row.get::<_, String>(16)?,
        "resource_attributes": row.get::<_, String>(17)?,
        "http_method": row.get::<_, Option<String>>(18)?,
        "http_url": row.get::<_, Option<String>>(19)?,
        "http_status_code": row.get::<_, Option<i32>>(20)?,
        "db_system": row.get::<_, Option<String>>(21)?,
        "db_statement": row.get::<_, Option<String>>(22)?,
        "error": row.get::<_, bool>(23)?,
    }))
}
