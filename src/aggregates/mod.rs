//! The single in-memory aggregation domain (§4, §5): one `Mutex`-guarded
//! `Aggregates` struct owns the global window, per-endpoint windows, the
//! trace store, the in-flight tracker, the error-signature aggregator,
//! the recent-requests ring and the trend ring. Every ingested event is
//! folded into all of these under one lock acquisition — per §5, "do not
//! split an aggregate across locks" — so a reader never observes a torn
//! cross-aggregate view.

pub mod error_sig;
pub mod inflight;
pub mod trace_store;
pub mod trend;
pub mod window;

use crate::model::{bucket_status, endpoint_key, Event};
use error_sig::ErrorSignatureAggregator;
use inflight::InFlightTracker;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use trace_store::{LogSummary, TraceStore};
use trend::{TrendPoint, TrendRing};
use window::{RollingWindow, Sample};

#[derive(Debug, Clone)]
pub struct RecentRequest {
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

pub struct Aggregates {
    pub window_s: f64,
    pub slow_ms: f64,
    pub sample_rate: f64,
    pub recent_reqs_max: usize,
    pub max_events: usize,

    pub global: RollingWindow,
    pub per_endpoint: HashMap<String, RollingWindow>,
    pub trace_store: TraceStore,
    pub inflight: InFlightTracker,
    pub error_sigs: ErrorSignatureAggregator,
    pub trend: TrendRing,
    pub recent: VecDeque<RecentRequest>,
    /// Ring of every published event, capped at `max_events` (§4.A).
    /// Not surfaced through the query endpoints itself, but kept so a
    /// future debug surface (or a restart replay) has somewhere to read
    /// recent traffic from without re-deriving it from the aggregates.
    pub events: VecDeque<serde_json::Value>,
    pub events_ingested: u64,
    /// Events that did not clear the sampling gate (§4.H) and so were
    /// never pushed to `events` or offered to subscribers.
    pub events_suppressed: u64,
}

impl Aggregates {
    pub fn new(
        window_s: u64,
        slow_ms: f64,
        sample_rate: f64,
        trace_store_max: usize,
        trace_logs_max: usize,
        trace_spans_max: usize,
        recent_reqs_max: usize,
        max_events: usize,
    ) -> Self {
        Self {
            window_s: window_s as f64,
            slow_ms,
            sample_rate,
            recent_reqs_max,
            max_events,
            global: RollingWindow::new(),
            per_endpoint: HashMap::new(),
            trace_store: TraceStore::new(trace_store_max, trace_logs_max, trace_spans_max),
            inflight: InFlightTracker::new(),
            error_sigs: ErrorSignatureAggregator::new(),
            trend: TrendRing::new(),
            recent: VecDeque::new(),
            events: VecDeque::new(),
            events_ingested: 0,
            events_suppressed: 0,
        }
    }

    fn prune_windows(&mut self, now: f64) {
        self.global.prune(now, self.window_s);
        for w in self.per_endpoint.values_mut() {
            w.prune(now, self.window_s);
        }
        self.error_sigs.prune(now, self.window_s);
    }

    /// `sample_ts` is the event's own `ts` (client- or tailer-supplied,
    /// defaulting to ingest time if absent upstream); `now` is the actual
    /// wall-clock ingest time used only as the pruning threshold — they
    /// coincide unless a producer stamped its own `ts` (§9 "now = time.time()").
    fn record_request_sample(&mut self, sample_ts: f64, now: f64, method: &str, route: Option<&str>, path: Option<&str>, status: i64, duration_ms: Option<f64>) {
        let sample = Sample { ts: sample_ts, duration_ms, status };
        self.global.push(sample, now, self.window_s);
        let key = endpoint_key(method, route, path);
        self.per_endpoint
            .entry(key)
            .or_insert_with(RollingWindow::new)
            .push(sample, now, self.window_s);
    }

    fn push_recent(&mut self, req: RecentRequest) {
        if self.recent_reqs_max > 0 && self.recent.len() >= self.recent_reqs_max {
            self.recent.pop_front();
        }
        self.recent.push_back(req);
    }

    /// Applies one event to every affected aggregate (§4.G dispatch
    /// table) and returns whether it should fan out to SSE subscribers
    /// (§4.H, §7). `req_start`, `log` and `gauge` are never published;
    /// `req`/`req_end` go through the sampling gate (always for 5xx or
    /// slow, otherwise `sample_rate` probability); `span` follows the
    /// default-publish path and always publishes.
    pub fn ingest(&mut self, event: &Event, now: f64) -> bool {
        self.events_ingested += 1;
        self.prune_windows(now);

        let request_id = event.request_id().map(str::to_string);

        if event.creates_trace_bundle() {
            if let Some(rid) = &request_id {
                if let Some(bundle) = self.trace_store.get_or_create(rid, true) {
                    apply_event_to_bundle(bundle, event);
                }
            }
        }

        let publish = match event {
            Event::ReqStart(e) => {
                if let Some(rid) = &request_id {
                    // in-flight start time is the ingest wall clock, not the
                    // event's own `ts` (source: `INFLIGHT_REQUESTS[rid] = (svc, now)`).
                    self.inflight.on_req_start(rid, &e.envelope.service, now);
                }
                false
            }
            Event::ReqEnd(e) => {
                if let Some(rid) = &request_id {
                    self.inflight.on_req_end(rid);
                }
                self.record_request_sample(e.envelope.ts, now, &e.method, e.route.as_deref(), e.path.as_deref(), e.status, e.duration_ms);
                self.push_recent(RecentRequest {
                    ts: e.envelope.ts,
                    request_id: request_id.clone(),
                    trace_id: e.envelope.trace_id.clone(),
                    span_id: e.envelope.span_id.clone(),
                    service: e.envelope.service.clone(),
                    method: e.method.clone(),
                    path: e.path.clone(),
                    route: e.route.clone(),
                    endpoint: endpoint_key(&e.method, e.route.as_deref(), e.path.as_deref()),
                    status: e.status,
                    duration_ms: e.duration_ms,
                });
                should_publish(e.status, e.duration_ms, self.slow_ms, self.sample_rate)
            }
            Event::Req(e) => {
                self.record_request_sample(e.envelope.ts, now, &e.method, e.route.as_deref(), e.path.as_deref(), e.status, e.duration_ms);
                self.push_recent(RecentRequest {
                    ts: e.envelope.ts,
                    request_id: request_id.clone(),
                    trace_id: e.envelope.trace_id.clone(),
                    span_id: e.envelope.span_id.clone(),
                    service: e.envelope.service.clone(),
                    method: e.method.clone(),
                    path: e.path.clone(),
                    route: e.route.clone(),
                    endpoint: endpoint_key(&e.method, e.route.as_deref(), e.path.as_deref()),
                    status: e.status,
                    duration_ms: e.duration_ms,
                });
                should_publish(e.status, e.duration_ms, self.slow_ms, self.sample_rate)
            }
            Event::Log(e) => {
                self.error_sigs.record(e.envelope.ts, &e.message, e.trace.as_deref());
                false
            }
            Event::Span(_) => true,
            Event::Gauge(e) => {
                if e.name == "inflight_delta" {
                    self.inflight.apply_delta(&e.envelope.service, e.value as i64);
                }
                false
            }
        };

        if publish {
            if let Ok(value) = serde_json::to_value(event) {
                if self.max_events > 0 && self.events.len() >= self.max_events {
                    self.events.pop_front();
                }
                self.events.push_back(value);
            }
        } else {
            self.events_suppressed += 1;
        }

        publish
    }

    pub fn sample_trend_point(&self) -> TrendPoint {
        let m = self.global.metrics(self.window_s);
        TrendPoint {
            rps: m.rps,
            error_rate_5xx: m.error_rate_5xx,
            p95_ms: m.p95_ms.unwrap_or(0.0),
        }
    }

    pub fn tick_trend(&mut self, now: f64) {
        self.prune_windows(now);
        let point = self.sample_trend_point();
        self.trend.push(point);
    }
}

fn should_publish(status: i64, duration_ms: Option<f64>, slow_ms: f64, sample_rate: f64) -> bool {
    if bucket_status(status) == "5xx" {
        return true;
    }
    if let Some(d) = duration_ms {
        if d >= slow_ms {
            return true;
        }
    }
    if sample_rate > 0.0 {
        return rand::thread_rng().gen::<f64>() < sample_rate;
    }
    false
}

/// Replaces (not merges) `bundle.headers` when `meta.headers` is present
/// (§4.B `apply_req_start`/`apply_req_end`: "if `event.meta.headers` is
/// present, replaces `bundle.headers`").
fn replace_headers_from_meta(bundle: &mut trace_store::TraceBundle, meta: &serde_json::Map<String, serde_json::Value>) {
    if let Some(headers) = meta.get("headers").and_then(|v| v.as_object()) {
        bundle.headers = headers.clone();
    }
}

fn apply_event_to_bundle(bundle: &mut trace_store::TraceBundle, event: &Event) {
    match event {
        Event::ReqStart(e) => {
            bundle.req_start = Some(e.clone());
            replace_headers_from_meta(bundle, &e.meta);
        }
        Event::ReqEnd(e) => {
            bundle.req_end = Some(e.clone());
            replace_headers_from_meta(bundle, &e.meta);
        }
        Event::Req(e) => {
            bundle.req_end = Some(e.clone());
        }
        Event::Log(e) => {
            bundle.push_log(LogSummary {
                ts: e.envelope.ts,
                level: e.level,
                logger: e.logger.clone(),
                message: e.message.clone(),
                trace: e.trace.clone(),
                meta: e.meta.clone(),
            });
        }
        Event::Span(e) => {
            bundle.push_span(e.clone());
        }
        Event::Gauge(_) => {}
    }
}
