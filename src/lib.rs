//! Core library for the Stillpoint collector. Wires the ingest dispatcher,
//! rolling-window aggregates, trace-bundle store, subscriber fan-out and
//! access-log tailer together behind one axum `Router`. Kept lightweight
//! and easy to embed.

pub mod aggregates;
mod config;
pub mod error;
pub mod fanout;
pub mod model;
pub mod query;
pub mod tailer;
pub mod util;

pub use config::AppConfig;

use aggregates::Aggregates;
use axum::extract::{
    rejection::JsonRejection,
    Path, Query, State,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Json, Router};
use error::ApiError;
use fanout::SubscriberRegistry;
use model::Event;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Shared process state: one mutex-guarded aggregation domain (§5 "do not
/// split an aggregate across locks") plus the subscriber registry and the
/// bearer token checked on `/ingest`.
#[derive(Clone)]
pub struct AppState {
    pub aggregates: Arc<Mutex<Aggregates>>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub token: String,
}

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Builds process state from `OBS_*` environment variables, spawns one
/// tailer task per configured log file, and starts the 1 Hz trend sampler.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    let aggregates = Arc::new(Mutex::new(Aggregates::new(
        config.window_s,
        config.slow_ms,
        config.sample_rate,
        config.trace_store_max,
        config.trace_logs_max,
        config.trace_spans_max,
        config.recent_reqs_max,
        config.max_events,
    )));
    let subscribers = Arc::new(SubscriberRegistry::new(fanout::DEFAULT_SUBSCRIBER_CAPACITY));

    let state = AppState {
        aggregates,
        subscribers,
        token: config.token.clone(),
    };

    for (service, path) in tailer::parse_log_files(&config.log_files) {
        let mut rx = tailer::spawn_tailer(service.clone(), path.clone(), config.tail_from_start);
        let tailer_state = state.clone();
        tracing::info!(service = %service, path = %path, "starting access-log tailer");
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                ingest_and_publish(&tailer_state, &event);
            }
            tracing::warn!(service = %service, "access-log tailer channel closed");
        });
    }

    spawn_trend_sampler(state.clone());

    Ok(state)
}

/// The 1 Hz trend sampler (§4.F): a cooperative task that never holds the
/// aggregates lock longer than a single percentile pass.
fn spawn_trend_sampler(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let now = now_epoch_secs();
            let mut agg = state.aggregates.lock().unwrap();
            agg.tick_trend(now);
        }
    });
}

/// Folds one event into the aggregates under the single lock, then fans
/// it out to live subscribers if it cleared the publish gate (§4.G).
fn ingest_and_publish(state: &AppState, event: &Event) {
    let now = now_epoch_secs();
    let publish = {
        let mut agg = state.aggregates.lock().unwrap();
        agg.ingest(event, now)
    };
    if publish {
        if let Ok(value) = serde_json::to_value(event) {
            state.subscribers.publish(&value);
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/stream", get(stream_handler))
        .route("/metrics", get(global_metrics_handler))
        .route("/metrics/endpoints", get(endpoint_metrics_handler))
        .route("/metrics/errorsigs", get(error_signatures_handler))
        .route("/metrics/traces", get(traces_handler))
        .route("/trace/:request_id", get(trace_detail_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(ApiError::Unauthorized);
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(ApiError::Unauthorized);
    }
    Ok(token.to_string())
}

fn ensure_authorized(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let token = extract_bearer_token(headers)?;
    if token != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Event>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_authorized(&headers, &state.token)?;
    let Json(event) = payload.map_err(|e| ApiError::MalformedEvent(e.to_string()))?;
    ingest_and_publish(&state, &event);
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let (id, rx) = state.subscribers.subscribe();
    let subscribers = state.subscribers.clone();
    let stream = ReceiverStream::new(rx).map(|value| Ok(SseEvent::default().json_data(value).unwrap_or_else(|_| SseEvent::default().data("{}"))));
    // dropped when the client disconnects, unregistering this subscriber (§5 "released
    // when their HTTP request disconnects").
    let stream = GuardedStream { inner: stream, id, subscribers };
    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

/// Wraps the subscriber's receiver stream so dropping it (client
/// disconnect) also removes the entry from the registry — there is no
/// other hook for "this SSE body will never be polled again".
struct GuardedStream<S> {
    inner: S,
    id: u64,
    subscribers: Arc<SubscriberRegistry>,
}

impl<S> Drop for GuardedStream<S> {
    fn drop(&mut self) {
        self.subscribers.unsubscribe(self.id);
    }
}

impl<S: tokio_stream::Stream + Unpin> tokio_stream::Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_next(cx)
    }
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let subscribers = state.subscribers.subscriber_count();
    Json(serde_json::json!({"status": "ok", "subscribers": subscribers}))
}

async fn global_metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let agg = state.aggregates.lock().unwrap();
    Json(query::global_metrics(&agg))
}

#[derive(Debug, serde::Deserialize)]
struct EndpointQuery {
    limit: Option<usize>,
    sort_by: Option<String>,
}

async fn endpoint_metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<EndpointQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50);
    let sort_by = params.sort_by.unwrap_or_else(|| "p95".to_string());
    let agg = state.aggregates.lock().unwrap();
    let endpoints = query::endpoint_metrics(&agg, limit, &sort_by);
    Json(serde_json::json!({"window_s": agg.window_s, "endpoints": endpoints}))
}

#[derive(Debug, serde::Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn error_signatures_handler(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20);
    let agg = state.aggregates.lock().unwrap();
    let signatures = query::top_error_signatures(&agg, limit);
    Json(serde_json::json!({"window_s": agg.window_s, "signatures": signatures}))
}

#[derive(Debug, serde::Deserialize)]
struct TracesQuery {
    limit: Option<usize>,
    slow_limit: Option<usize>,
}

async fn traces_handler(
    State(state): State<AppState>,
    Query(params): Query<TracesQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50);
    let slow_limit = params.slow_limit.unwrap_or(20);
    let agg = state.aggregates.lock().unwrap();
    Json(query::traces_view(&agg, limit, slow_limit))
}

async fn trace_detail_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<query::TraceDetail>, ApiError> {
    let mut agg = state.aggregates.lock().unwrap();
    query::trace_detail(&mut agg, &request_id).map(Json)
}
