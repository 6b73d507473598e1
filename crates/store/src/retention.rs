use std::time::Duration;

use chrono::Utc;
use duckdb::params;
use pathwatch_core::error::{PathwatchError, Result};

use crate::DuckDbSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub spans: usize,
    pub traces: usize,
    pub events: usize,
}

impl DuckDbSink {
    /// Deletes rows whose timestamp is older than `ttl` before now.
    pub fn prune_ttl(&self, ttl: Duration) -> Result<PruneReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| PathwatchError::Internal(format!("ttl conversion failed: {e}")))?;
        let cutoff_secs = cutoff.timestamp();
        let cutoff_millis = cutoff.timestamp_millis();

        let conn = self.conn();
        let spans = conn
            .execute("DELETE FROM spans WHERE timestamp < ?", params![cutoff_secs])
            .map_err(|e| PathwatchError::Store(format!("retention spans delete failed: {e}")))?;
        let traces = conn
            .execute("DELETE FROM traces WHERE timestamp < ?", params![cutoff_secs])
            .map_err(|e| PathwatchError::Store(format!("retention traces delete failed: {e}")))?;
        let events = conn
            .execute("DELETE FROM events WHERE timestamp_ms < ?", params![cutoff_millis])
            .map_err(|e| PathwatchError::Store(format!("retention events delete failed: {e}")))?;

        Ok(PruneReport {
            spans,
            traces,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pathwatch_core::model::event::EnrichedEvent;

    use crate::DuckDbSink;

    fn event(id: &str, timestamp: &str) -> EnrichedEvent {
        EnrichedEvent {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            org_id: "org_1".into(),
            project_id: "proj_1".into(),
            method: "GET".into(),
            path: "/users".into(),
            url: None,
            host: None,
            status: 200,
            latency_ms: 12,
            req_size: 0,
            res_size: 64,
            ip: None,
            user_agent: None,
            body: None,
        }
    }

    #[test]
    fn ttl_prunes_old_rows() {
        let store = DuckDbSink::open_in_memory().unwrap();
        let (old_trace, old_spans) = testkit::seed_rows();
        let (mut fresh_trace, _) = testkit::seed_rows();
        fresh_trace.timestamp = chrono::Utc::now().timestamp() as u64;

        store.insert_spans(&old_spans).unwrap();
        store.insert_traces(&[old_trace, fresh_trace]).unwrap();
        store
            .insert_events(&[
                event("e1", "2000-01-01T00:00:00.000Z"),
                event("e2", "2999-01-01T00:00:00.000Z"),
            ])
            .unwrap();

        let report = store.prune_ttl(Duration::from_secs(60)).unwrap();
        assert_eq!(report.spans, 3);
        assert_eq!(report.traces, 1);
        assert_eq!(report.events, 1);

        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 0);
        assert_eq!(status.traces_count, 1);
        assert_eq!(status.events_count, 1);
    }
}
