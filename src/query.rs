//! Read-only query surface (§4.J): pure functions over `&Aggregates`
//! that the HTTP layer renders as JSON. None of these mutate state
//! beyond the LRU-touch side effect of `TraceStore::get`.

use crate::aggregates::Aggregates;
use crate::error::ApiError;
use crate::util::sparkline;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusHistogramOut {
    #[serde(rename = "2xx")]
    pub c2xx: u64,
    #[serde(rename = "3xx")]
    pub c3xx: u64,
    #[serde(rename = "4xx")]
    pub c4xx: u64,
    #[serde(rename = "5xx")]
    pub c5xx: u64,
}

impl From<&crate::aggregates::window::StatusHistogram> for StatusHistogramOut {
    fn from(h: &crate::aggregates::window::StatusHistogram) -> Self {
        Self { c2xx: h.c2xx, c3xx: h.c3xx, c4xx: h.c4xx, c5xx: h.c5xx }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusRatesOut {
    #[serde(rename = "2xx")]
    pub c2xx: f64,
    #[serde(rename = "3xx")]
    pub c3xx: f64,
    #[serde(rename = "4xx")]
    pub c4xx: f64,
    #[serde(rename = "5xx")]
    pub c5xx: f64,
}

impl From<&crate::aggregates::window::StatusHistogram> for StatusRatesOut {
    fn from(h: &crate::aggregates::window::StatusHistogram) -> Self {
        let total = h.total().max(1) as f64;
        let rate = |n: u64| if h.total() == 0 { 0.0 } else { n as f64 / total };
        Self {
            c2xx: rate(h.c2xx),
            c3xx: rate(h.c3xx),
            c4xx: rate(h.c4xx),
            c5xx: rate(h.c5xx),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TailRatesOut {
    pub gt250: f64,
    pub gt500: f64,
    pub gt1000: f64,
    pub gt2000: f64,
}

impl From<[(&'static str, f64); 4]> for TailRatesOut {
    fn from(tails: [(&'static str, f64); 4]) -> Self {
        let by_key: std::collections::HashMap<_, _> = tails.into_iter().collect();
        Self {
            gt250: by_key["gt250"],
            gt500: by_key["gt500"],
            gt1000: by_key["gt1000"],
            gt2000: by_key["gt2000"],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrendsOut {
    pub rps: String,
    pub err5xx: String,
    pub p95: String,
}

#[derive(Debug, Serialize)]
pub struct GlobalMetrics {
    pub window_s: f64,
    pub count: usize,
    pub rps: f64,
    pub status: StatusHistogramOut,
    pub error_rate_5xx: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub inflight: i64,
    pub latency_available: bool,
    pub trends: TrendsOut,
}

pub fn global_metrics(agg: &Aggregates) -> GlobalMetrics {
    let m = agg.global.metrics(agg.window_s);
    GlobalMetrics {
        window_s: agg.window_s,
        count: m.count,
        rps: m.rps,
        status: (&m.status).into(),
        error_rate_5xx: m.error_rate_5xx,
        p50_ms: m.p50_ms,
        p95_ms: m.p95_ms,
        p99_ms: m.p99_ms,
        inflight: agg.inflight.global_count(),
        latency_available: m.latency_available,
        trends: TrendsOut {
            rps: sparkline(&agg.trend.rps_series()),
            err5xx: sparkline(&agg.trend.error_rate_series()),
            p95: sparkline(&agg.trend.p95_series()),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct EndpointRow {
    pub endpoint: String,
    pub count: usize,
    pub rps: f64,
    pub status: StatusHistogramOut,
    pub status_rates: StatusRatesOut,
    pub error_rate_5xx: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub tails: TailRatesOut,
    pub latency_available: bool,
}

/// `sort_by` in `{"p95","error","rps","count"}`, default `p95`; a
/// missing `p95` sorts as `0.0` (§4.C).
pub fn endpoint_metrics(agg: &Aggregates, limit: usize, sort_by: &str) -> Vec<EndpointRow> {
    let mut rows: Vec<EndpointRow> = agg
        .per_endpoint
        .iter()
        .filter(|(_, w)| !w.is_empty())
        .map(|(key, w)| {
            let m = w.metrics(agg.window_s);
            EndpointRow {
                endpoint: key.clone(),
                count: m.count,
                rps: m.rps,
                status: (&m.status).into(),
                status_rates: (&m.status).into(),
                error_rate_5xx: m.error_rate_5xx,
                p50_ms: m.p50_ms,
                p95_ms: m.p95_ms,
                p99_ms: m.p99_ms,
                tails: m.tails.into(),
                latency_available: m.latency_available,
            }
        })
        .collect();

    let sort_key = |r: &EndpointRow| -> f64 {
        match sort_by {
            "error" => r.error_rate_5xx,
            "rps" => r.rps,
            "count" => r.count as f64,
            _ => r.p95_ms.unwrap_or(0.0),
        }
    };
    rows.sort_by(|a, b| sort_key(b).partial_cmp(&sort_key(a)).unwrap_or(std::cmp::Ordering::Equal));
    rows.truncate(limit);
    rows
}

#[derive(Debug, Serialize)]
pub struct ErrorSigRow {
    pub sig: String,
    pub count: usize,
}

pub fn top_error_signatures(agg: &Aggregates, limit: usize) -> Vec<ErrorSigRow> {
    agg.error_sigs
        .top(limit)
        .into_iter()
        .map(|s| ErrorSigRow { sig: s.signature, count: s.count })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct RecentRequestOut {
    pub ts: f64,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub service: String,
    pub method: String,
    pub path: Option<String>,
    pub route: Option<String>,
    pub endpoint: String,
    pub status: i64,
    pub duration_ms: Option<f64>,
}

impl From<&crate::aggregates::RecentRequest> for RecentRequestOut {
    fn from(r: &crate::aggregates::RecentRequest) -> Self {
        Self {
            ts: r.ts,
            request_id: r.request_id.clone(),
            trace_id: r.trace_id.clone(),
            span_id: r.span_id.clone(),
            service: r.service.clone(),
            method: r.method.clone(),
            path: r.path.clone(),
            route: r.route.clone(),
            endpoint: r.endpoint.clone(),
            status: r.status,
            duration_ms: r.duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TracesView {
    pub window_s: f64,
    pub recent: Vec<RecentRequestOut>,
    pub top_slow: Vec<RecentRequestOut>,
}

/// `recent` is newest-first (§4.J); `top_slow` is the `slow_limit`
/// requests with the highest `duration_ms`, nulls excluded.
pub fn traces_view(agg: &Aggregates, limit: usize, slow_limit: usize) -> TracesView {
    let recent: Vec<RecentRequestOut> = agg.recent.iter().rev().take(limit).map(RecentRequestOut::from).collect();

    let mut slow: Vec<&crate::aggregates::RecentRequest> =
        agg.recent.iter().filter(|r| r.duration_ms.is_some()).collect();
    slow.sort_by(|a, b| b.duration_ms.partial_cmp(&a.duration_ms).unwrap_or(std::cmp::Ordering::Equal));
    slow.truncate(slow_limit);

    TracesView {
        window_s: agg.window_s,
        recent,
        top_slow: slow.into_iter().map(RecentRequestOut::from).collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct TraceRequestSummary {
    pub request_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub service: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub route: Option<String>,
    pub endpoint: String,
    pub status: Option<i64>,
    pub duration_ms: Option<f64>,
    pub start_ts: Option<f64>,
    pub end_ts: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct TraceLogOut {
    pub ts: f64,
    pub level: crate::model::LogLevel,
    pub logger: String,
    pub message: String,
    pub trace: Option<String>,
    pub meta: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct TraceDetail {
    pub request: TraceRequestSummary,
    pub headers: Map<String, Value>,
    pub meta: Map<String, Value>,
    pub logs: Vec<TraceLogOut>,
    pub spans: Vec<crate::model::SpanEvent>,
}

/// Merges `req_start`/`req_end` (end wins on key collision, §4.J, §9
/// open question) and sorts logs/spans ascending by `ts`.
pub fn trace_detail(agg: &mut Aggregates, request_id: &str) -> Result<TraceDetail, ApiError> {
    let bundle = agg
        .trace_store
        .get(request_id)
        .ok_or_else(|| ApiError::NotFound(format!("trace {request_id} not found")))?;

    let method = bundle.req_end.as_ref().map(|e| e.method.clone()).or_else(|| bundle.req_start.as_ref().map(|e| e.method.clone()));
    let path = bundle.req_end.as_ref().and_then(|e| e.path.clone()).or_else(|| bundle.req_start.as_ref().and_then(|e| e.path.clone()));
    let route = bundle.req_end.as_ref().and_then(|e| e.route.clone()).or_else(|| bundle.req_start.as_ref().and_then(|e| e.route.clone()));
    let service = bundle.req_end.as_ref().map(|e| e.envelope.service.clone()).or_else(|| bundle.req_start.as_ref().map(|e| e.envelope.service.clone()));
    let trace_id = bundle.req_end.as_ref().and_then(|e| e.envelope.trace_id.clone()).or_else(|| bundle.req_start.as_ref().and_then(|e| e.envelope.trace_id.clone()));
    let span_id = bundle.req_end.as_ref().and_then(|e| e.envelope.span_id.clone()).or_else(|| bundle.req_start.as_ref().and_then(|e| e.envelope.span_id.clone()));

    let endpoint_method = method.clone().unwrap_or_else(|| "GET".to_string());
    let endpoint = format!("{} {}", endpoint_method, route.clone().or_else(|| path.clone()).unwrap_or_else(|| "unknown".to_string()));

    let request = TraceRequestSummary {
        request_id: request_id.to_string(),
        trace_id,
        span_id,
        service,
        method,
        path,
        route,
        endpoint,
        status: bundle.req_end.as_ref().map(|e| e.status),
        duration_ms: bundle.req_end.as_ref().and_then(|e| e.duration_ms),
        start_ts: bundle.req_start.as_ref().map(|e| e.envelope.ts),
        end_ts: bundle.req_end.as_ref().map(|e| e.envelope.ts),
    };

    let mut meta = Map::new();
    if let Some(start) = &bundle.req_start {
        for (k, v) in &start.meta {
            meta.insert(k.clone(), v.clone());
        }
    }
    if let Some(end) = &bundle.req_end {
        for (k, v) in &end.meta {
            meta.insert(k.clone(), v.clone());
        }
    }

    let mut logs: Vec<TraceLogOut> = bundle
        .logs()
        .map(|l| TraceLogOut {
            ts: l.ts,
            level: l.level,
            logger: l.logger.clone(),
            message: l.message.clone(),
            trace: l.trace.clone(),
            meta: l.meta.clone(),
        })
        .collect();
    logs.sort_by(|a, b| a.ts.partial_cmp(&b.ts).unwrap_or(std::cmp::Ordering::Equal));

    let mut spans: Vec<crate::model::SpanEvent> = bundle.spans().cloned().collect();
    spans.sort_by(|a, b| a.envelope.ts.partial_cmp(&b.envelope.ts).unwrap_or(std::cmp::Ordering::Equal));

    let headers = bundle.headers.clone();

    Ok(TraceDetail { request, headers, meta, logs, spans })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::Aggregates;
    use crate::model::{Envelope, Event, LogEvent, LogLevel, ReqEndEvent, ReqStartEvent};
    use serde_json::Map as JsonMap;

    fn envelope(ts: f64, request_id: &str) -> Envelope {
        Envelope {
            ts,
            service: "svc".to_string(),
            trace_id: Some("t1".into()),
            span_id: None,
            request_id: Some(request_id.to_string()),
        }
    }

    #[test]
    fn global_metrics_reports_inflight_and_trends() {
        let mut agg = Aggregates::new(120, 750.0, 0.0, 100, 50, 50, 100, 1000);
        agg.trend.push(crate::aggregates::trend::TrendPoint { rps: 1.0, error_rate_5xx: 0.0, p95_ms: 5.0 });
        let m = global_metrics(&agg);
        assert_eq!(m.inflight, 0);
        assert!(!m.trends.rps.is_empty());
    }

    #[test]
    fn trace_detail_merges_start_and_end_with_end_precedence() {
        let mut agg = Aggregates::new(120, 750.0, 0.0, 100, 50, 50, 100, 1000);
        let mut start_meta = JsonMap::new();
        start_meta.insert("client".into(), serde_json::json!("1.2.3.4"));
        start_meta.insert("shared".into(), serde_json::json!("start"));
        let start = Event::ReqStart(ReqStartEvent {
            envelope: envelope(0.0, "r1"),
            method: "GET".into(),
            path: Some("/x".into()),
            route: None,
            meta: start_meta,
        });
        agg.ingest(&start, 0.0);

        let mut end_meta = JsonMap::new();
        end_meta.insert("shared".into(), serde_json::json!("end"));
        let end = Event::ReqEnd(ReqEndEvent {
            envelope: envelope(1.0, "r1"),
            method: "GET".into(),
            path: Some("/x".into()),
            route: None,
            status: 200,
            duration_ms: Some(5.0),
            meta: end_meta,
        });
        agg.ingest(&end, 1.0);

        let detail = trace_detail(&mut agg, "r1").unwrap();
        assert_eq!(detail.meta["client"], serde_json::json!("1.2.3.4"));
        assert_eq!(detail.meta["shared"], serde_json::json!("end"));
        assert_eq!(detail.request.status, Some(200));
    }

    #[test]
    fn trace_detail_missing_id_is_not_found() {
        let mut agg = Aggregates::new(120, 750.0, 0.0, 100, 50, 50, 100, 1000);
        assert!(trace_detail(&mut agg, "ghost").is_err());
    }

    #[test]
    fn trace_detail_logs_sorted_ascending_by_ts() {
        let mut agg = Aggregates::new(120, 750.0, 0.0, 100, 50, 50, 100, 1000);
        let start = Event::ReqStart(ReqStartEvent {
            envelope: envelope(0.0, "r2"),
            method: "GET".into(),
            path: Some("/x".into()),
            route: None,
            meta: JsonMap::new(),
        });
        agg.ingest(&start, 0.0);
        for ts in [3.0, 1.0, 2.0] {
            let log = Event::Log(LogEvent {
                envelope: envelope(ts, "r2"),
                level: LogLevel::Info,
                logger: "app".into(),
                message: format!("m{ts}"),
                trace: None,
                meta: JsonMap::new(),
            });
            agg.ingest(&log, ts);
        }
        let detail = trace_detail(&mut agg, "r2").unwrap();
        let timestamps: Vec<f64> = detail.logs.iter().map(|l| l.ts).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn endpoint_metrics_sorts_by_requested_key() {
        let mut agg = Aggregates::new(120, 750.0, 0.0, 100, 50, 50, 100, 1000);
        for (path, status) in [("/fast", 200), ("/slow", 500)] {
            let end = Event::ReqEnd(ReqEndEvent {
                envelope: envelope(0.0, path),
                method: "GET".into(),
                path: Some(path.into()),
                route: None,
                status,
                duration_ms: Some(1.0),
                meta: JsonMap::new(),
            });
            agg.ingest(&end, 0.0);
        }
        let rows = endpoint_metrics(&agg, 10, "error");
        assert_eq!(rows[0].endpoint, "GET /slow");
    }
}
