//! Event model: the tagged sum of event kinds a producer may push to
//! `/ingest`, plus the common envelope fields shared by all of them.
//!
//! Deserialization is internally tagged on `kind`; an unrecognized kind
//! fails to parse, which the ingest handler turns into a 4xx (see
//! `crate::error`). Fields inside `meta` are opaque `serde_json::Value`
//! and are never interpreted structurally by the collector itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn default_service() -> String {
    "unknown".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_logger() -> String {
    "app".to_string()
}

fn default_meta() -> Map<String, Value> {
    Map::new()
}

/// Fields common to every event kind (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "now_epoch_secs")]
    pub ts: f64,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            ts: now_epoch_secs(),
            service: default_service(),
            trace_id: None,
            span_id: None,
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReqStartEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default = "default_meta")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReqEndEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    pub status: i64,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default = "default_meta")]
    pub meta: Map<String, Value>,
}

/// Identical shape to `ReqEndEvent`; emitted by the access-log tailer
/// instead of paired with a `req_start` (§3).
pub type ReqEvent = ReqEndEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "default_logger")]
    pub logger: String,
    pub message: String,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(default = "default_meta")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub name: String,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default = "default_meta")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaugeEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    ReqStart(ReqStartEvent),
    ReqEnd(ReqEndEvent),
    Req(ReqEvent),
    Log(LogEvent),
    Span(SpanEvent),
    Gauge(GaugeEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ReqStart(_) => "req_start",
            Event::ReqEnd(_) => "req_end",
            Event::Req(_) => "req",
            Event::Log(_) => "log",
            Event::Span(_) => "span",
            Event::Gauge(_) => "gauge",
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            Event::ReqStart(e) => &e.envelope,
            Event::ReqEnd(e) => &e.envelope,
            Event::Req(e) => &e.envelope,
            Event::Log(e) => &e.envelope,
            Event::Span(e) => &e.envelope,
            Event::Gauge(e) => &e.envelope,
        }
    }

    pub fn ts(&self) -> f64 {
        self.envelope().ts
    }

    pub fn service(&self) -> &str {
        &self.envelope().service
    }

    pub fn request_id(&self) -> Option<&str> {
        self.envelope().request_id.as_deref()
    }

    /// Bundle store (4.B) creates lazily for these five kinds.
    pub fn creates_trace_bundle(&self) -> bool {
        !matches!(self, Event::Gauge(_))
    }
}

/// Status-class bucket: "2xx".."5xx", clamped to 5xx for >=500 (§4.C).
pub fn bucket_status(status: i64) -> &'static str {
    match status / 100 {
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        _ => "5xx",
    }
}

/// `"{METHOD} {route-or-path-or-unknown}"` (§3, §8 round-trip law).
pub fn endpoint_key(method: &str, route: Option<&str>, path: Option<&str>) -> String {
    let method = if method.is_empty() { "GET" } else { method };
    let tail = route.or(path).unwrap_or("unknown");
    format!("{} {}", method, tail)
}
