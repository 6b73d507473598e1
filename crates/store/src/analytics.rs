//! Request-event analytics: parameter decoding shared by the sinks and the
//! in-process evaluation used by [`crate::MemorySink`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::event::EnrichedEvent;
use pathwatch_core::query::{
    AVG_LATENCY, ERROR_RATE, Interval, LIST_REQUESTS, QueryParams, REQUEST_COUNTS_BY_PERIOD,
    REQUESTS_OVER_TIME, TOP_PATHS, TOTAL_REQUESTS,
};
use serde_json::json;

use crate::sink::limit_param;

/// Status codes at or above this count as failed requests.
pub const ERROR_STATUS: i64 = 400;

pub fn is_event_query(name: &str) -> bool {
    matches!(
        name,
        TOTAL_REQUESTS
            | ERROR_RATE
            | AVG_LATENCY
            | TOP_PATHS
            | REQUESTS_OVER_TIME
            | REQUEST_COUNTS_BY_PERIOD
            | LIST_REQUESTS
    )
}

pub(crate) fn interval_param(params: &QueryParams) -> Result<Interval> {
    params
        .get("interval")
        .map(|raw| raw.parse())
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Epoch milliseconds of an RFC 3339 date parameter.
pub(crate) fn date_param(params: &QueryParams, key: &str) -> Result<Option<i64>> {
    params
        .get(key)
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.timestamp_millis())
                .map_err(|e| PathwatchError::Validation(format!("bad {key} {raw}: {e}")))
        })
        .transpose()
}

pub(crate) fn status_param(params: &QueryParams) -> Result<Option<i64>> {
    params
        .get("status")
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|e| PathwatchError::Validation(format!("bad status {raw}: {e}")))
        })
        .transpose()
}

pub(crate) fn event_millis(event: &EnrichedEvent) -> Result<i64> {
    DateTime::parse_from_rfc3339(&event.timestamp)
        .map(|ts| ts.timestamp_millis())
        .map_err(|e| {
            PathwatchError::Store(format!(
                "event {} has bad timestamp {}: {e}",
                event.id, event.timestamp
            ))
        })
}

pub(crate) fn bucket_start(millis: i64, interval: Interval) -> i64 {
    millis - millis.rem_euclid(interval.as_millis())
}

pub(crate) fn bucket_label(bucket_millis: i64) -> String {
    DateTime::from_timestamp_millis(bucket_millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| bucket_millis.to_string())
}

pub(crate) fn status_class(status: i64) -> String {
    format!("{}xx", status.div_euclid(100))
}

pub(crate) fn error_rate(total: i64, errors: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64
    }
}

#[derive(Default)]
struct Tally {
    requests: i64,
    errors: i64,
    latency_sum: i64,
}

impl Tally {
    fn add(&mut self, event: &EnrichedEvent) {
        self.requests += 1;
        if event.status >= ERROR_STATUS {
            self.errors += 1;
        }
        self.latency_sum += event.latency_ms;
    }

    fn avg_latency(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.latency_sum as f64 / self.requests as f64)
    }
}

/// Answers an event query over rows already scoped to one tenant.
pub(crate) fn evaluate(
    name: &str,
    events: &[(usize, &EnrichedEvent)],
    params: &QueryParams,
) -> Result<Vec<serde_json::Value>> {
    let limit = limit_param(params)?;
    match name {
        TOTAL_REQUESTS => Ok(vec![json!({"total_requests": events.len()})]),
        ERROR_RATE => {
            let mut tally = Tally::default();
            events.iter().for_each(|(_, e)| tally.add(e));
            Ok(vec![json!({
                "total_requests": tally.requests,
                "error_requests": tally.errors,
                "error_rate": error_rate(tally.requests, tally.errors),
            })])
        }
        AVG_LATENCY => {
            let mut tally = Tally::default();
            events.iter().for_each(|(_, e)| tally.add(e));
            Ok(vec![json!({"avg_latency_ms": tally.avg_latency()})])
        }
        TOP_PATHS => {
            let mut by_path: BTreeMap<&str, Tally> = BTreeMap::new();
            for (_, event) in events {
                by_path.entry(event.path.as_str()).or_default().add(event);
            }
            let mut rows = by_path.into_iter().collect::<Vec<_>>();
            rows.sort_by(|(pa, a), (pb, b)| b.requests.cmp(&a.requests).then_with(|| pa.cmp(pb)));
            Ok(rows
                .into_iter()
                .take(limit)
                .map(|(path, t)| {
                    json!({
                        "path": path,
                        "requests": t.requests,
                        "error_requests": t.errors,
                        "avg_latency_ms": t.avg_latency(),
                    })
                })
                .collect())
        }
        REQUESTS_OVER_TIME => {
            let interval = interval_param(params)?;
            let mut buckets: BTreeMap<i64, Tally> = BTreeMap::new();
            for (_, event) in events {
                let bucket = bucket_start(event_millis(event)?, interval);
                buckets.entry(bucket).or_default().add(event);
            }
            Ok(buckets
                .into_iter()
                .rev()
                .take(limit)
                .map(|(bucket, t)| {
                    json!({
                        "bucket": bucket_label(bucket),
                        "requests": t.requests,
                        "error_requests": t.errors,
                        "avg_latency_ms": t.avg_latency(),
                    })
                })
                .collect())
        }
        REQUEST_COUNTS_BY_PERIOD => {
            let interval = interval_param(params)?;
            let mut counts: BTreeMap<(i64, String), i64> = BTreeMap::new();
            for (_, event) in events {
                let bucket = bucket_start(event_millis(event)?, interval);
                *counts.entry((bucket, status_class(event.status))).or_default() += 1;
            }
            let mut rows = counts.into_iter().collect::<Vec<_>>();
            rows.sort_by(|((ba, ca), _), ((bb, cb), _)| bb.cmp(ba).then_with(|| ca.cmp(cb)));
            Ok(rows
                .into_iter()
                .take(limit)
                .map(|((bucket, class), requests)| {
                    json!({
                        "bucket": bucket_label(bucket),
                        "status_class": class,
                        "requests": requests,
                    })
                })
                .collect())
        }
        LIST_REQUESTS => {
            let method = params.get("method");
            let status = status_param(params)?;
            let start = date_param(params, "start_date")?;
            let end = date_param(params, "end_date")?;

            let mut rows = Vec::new();
            for (seq, event) in events {
                let millis = event_millis(event)?;
                let keep = method.is_none_or(|m| event.method.eq_ignore_ascii_case(m))
                    && status.is_none_or(|s| event.status == s)
                    && start.is_none_or(|s| millis >= s)
                    && end.is_none_or(|e| millis <= e);
                if keep {
                    rows.push((millis, *seq, *event));
                }
            }
            rows.sort_by(|(ma, sa, _), (mb, sb, _)| mb.cmp(ma).then_with(|| sb.cmp(sa)));
            rows.into_iter()
                .take(limit)
                .map(|(_, _, event)| {
                    serde_json::to_value(event).map_err(|e| {
                        PathwatchError::Internal(format!("row serialization failed: {e}"))
                    })
                })
                .collect()
        }
        other => Err(PathwatchError::Validation(format!("unknown query: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_floor_to_interval() {
        let ms = DateTime::parse_from_rfc3339("2026-02-01T12:34:56.789Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(
            bucket_label(bucket_start(ms, Interval::FifteenMinutes)),
            "2026-02-01T12:30:00Z"
        );
        assert_eq!(
            bucket_label(bucket_start(ms, Interval::OneDay)),
            "2026-02-01T00:00:00Z"
        );
    }

    #[test]
    fn status_classes_and_rates() {
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(error_rate(0, 0), 0.0);
        assert_eq!(error_rate(4, 1), 0.25);
    }

    #[test]
    fn bad_interval_is_validation_error() {
        let mut params = QueryParams::new();
        params.insert("interval".into(), "2h".into());
        assert!(matches!(
            interval_param(&params),
            Err(PathwatchError::Validation(_))
        ));
        assert_eq!(interval_param(&QueryParams::new()).unwrap(), Interval::OneHour);
    }
}
