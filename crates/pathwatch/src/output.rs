use std::io::IsTerminal;

use chrono::{DateTime, SecondsFormat};
use owo_colors::OwoColorize;
use pathwatch_core::model::span::{EnrichedSpan, SpanNode, StatusCode};
use pathwatch_core::model::trace::{TraceRow, TraceStatus};
use pathwatch_core::query::TraceDetails;
use pathwatch_store::StoreStatus;

fn colored() -> bool {
    std::io::stdout().is_terminal()
}

fn trace_status_label(status: TraceStatus) -> String {
    if !colored() {
        return status.to_string();
    }
    match status {
        TraceStatus::Success => status.green().to_string(),
        TraceStatus::Error => status.red().to_string(),
        TraceStatus::Pending => status.yellow().to_string(),
    }
}

fn span_status_label(status: StatusCode) -> String {
    if !colored() {
        return status.to_string();
    }
    match status {
        StatusCode::Ok => status.green().to_string(),
        StatusCode::Error => status.red().to_string(),
        StatusCode::Unset => status.bright_black().to_string(),
    }
}

pub fn print_trace_row(row: &TraceRow) {
    println!(
        "trace={} status={} duration={}ms spans={} errors={} root={} name=\"{}\"",
        row.trace_id,
        trace_status_label(row.status),
        row.duration_ms,
        row.span_count,
        row.error_span_count,
        row.root_span_id,
        row.trace_name
    );
    if let Some(endpoint) = &row.endpoint {
        let method = row.http_method.as_deref().unwrap_or("-");
        let code = row
            .http_status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {method} {endpoint} -> {code}");
    }
}

pub fn print_traces_human(rows: &[TraceRow]) {
    for row in rows {
        print_trace_row(row);
    }
    println!("-- {} traces --", rows.len());
}

pub fn print_trace_details_human(details: &TraceDetails) {
    print_trace_row(&details.trace);
    print_forest(&details.spans);
}

pub fn print_forest(nodes: &[SpanNode<EnrichedSpan>]) {
    let mut stack = nodes.iter().rev().map(|n| (n, 0usize)).collect::<Vec<_>>();
    while let Some((node, depth)) = stack.pop() {
        let span = &node.span;
        println!(
            "{}{} {} ({:.1}ms) {}",
            "  ".repeat(depth),
            span.service_name,
            span.span_name,
            span.duration_ms,
            span_status_label(span.status_code)
        );
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
}

pub fn print_status_human(status: &StoreStatus) {
    println!("db_path={}", status.db_path);
    println!("db_size_bytes={}", status.db_size_bytes);
    println!(
        "spans={} traces={} events={}",
        status.spans_count, status.traces_count, status.events_count
    );
    for (label, ts) in [
        ("oldest", status.oldest_timestamp),
        ("newest", status.newest_timestamp),
    ] {
        if let Some(dt) = ts.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            println!("{label}={}", dt.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }
}
