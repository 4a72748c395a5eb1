//! In-flight request tracker (§4.D): counts requests that have a
//! `req_start` without a matching `req_end` yet, globally and per
//! service. Counters are floored at zero — an unmatched `req_end`
//! (duplicate, or arriving after eviction) must never drive a counter
//! negative.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InFlightTracker {
    global: i64,
    per_service: HashMap<String, i64>,
    started: HashMap<String, (String, f64)>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_req_start(&mut self, request_id: &str, service: &str, ts: f64) {
        self.global += 1;
        *self.per_service.entry(service.to_string()).or_insert(0) += 1;
        self.started.insert(request_id.to_string(), (service.to_string(), ts));
    }

    /// Decrements only when a matching start was observed; unmatched
    /// ends are a no-op (invariant: counters never go negative).
    pub fn on_req_end(&mut self, request_id: &str) {
        if let Some((service, _)) = self.started.remove(request_id) {
            self.global = (self.global - 1).max(0);
            if let Some(c) = self.per_service.get_mut(&service) {
                *c = (*c - 1).max(0);
            }
        }
    }

    /// Applies a raw `gauge{name="inflight_delta"}` adjustment (§4.D):
    /// used when an external agent reports in-flight counts directly
    /// instead of emitting paired `req_start`/`req_end` events. Floored
    /// at zero same as the paired path.
    pub fn apply_delta(&mut self, service: &str, delta: i64) {
        self.global = (self.global + delta).max(0);
        let entry = self.per_service.entry(service.to_string()).or_insert(0);
        *entry = (*entry + delta).max(0);
    }

    pub fn global_count(&self) -> i64 {
        self.global
    }

    pub fn per_service_counts(&self) -> &HashMap<String, i64> {
        &self.per_service
    }
}
