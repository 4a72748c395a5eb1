//! Rolling-window request statistics (§4.C): a deque of `(ts, duration_ms,
//! status)` samples, pruned from the head on every read and append, plus
//! the derived metrics (rps, status histogram, percentiles, tail rates).

use crate::model::bucket_status;
use crate::util::{percentile, tail_rates};
use serde::Serialize;
use std::collections::VecDeque;

/// One `(ts, duration_ms_or_null, status)` sample (§3 "Request sample").
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub ts: f64,
    pub duration_ms: Option<f64>,
    pub status: i64,
}

/// A single rolling deque, global or per-endpoint. Pruning discipline:
/// remove head elements with `now - head.ts > window_s` before any read
/// and on every append (§4.C, invariant 3).
#[derive(Debug, Default)]
pub struct RollingWindow {
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self { samples: VecDeque::new() }
    }

    pub fn push(&mut self, sample: Sample, now: f64, window_s: f64) {
        self.samples.push_back(sample);
        self.prune(now, window_s);
    }

    pub fn prune(&mut self, now: f64, window_s: f64) {
        while let Some(front) = self.samples.front() {
            if now - front.ts > window_s {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn metrics(&self, window_s: f64) -> WindowMetrics {
        let n = self.samples.len();
        let mut status = StatusHistogram::default();
        let mut durs: Vec<f64> = Vec::new();
        let mut err5xx = 0usize;

        for s in &self.samples {
            let b = bucket_status(s.status);
            status.bump(b);
            if b == "5xx" {
                err5xx += 1;
            }
            if let Some(d) = s.duration_ms {
                durs.push(d);
            }
        }
        durs.sort_by(|a, b| a.partial_cmp(b).unwrap());

        WindowMetrics {
            count: n,
            rps: if window_s > 0.0 { n as f64 / window_s } else { 0.0 },
            status,
            error_rate_5xx: if n > 0 { err5xx as f64 / n as f64 } else { 0.0 },
            p50_ms: percentile(&durs, 50.0),
            p95_ms: percentile(&durs, 95.0),
            p99_ms: percentile(&durs, 99.0),
            tails: tail_rates(&durs),
            latency_available: !durs.is_empty(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusHistogram {
    #[serde(rename = "2xx")]
    pub c2xx: u64,
    #[serde(rename = "3xx")]
    pub c3xx: u64,
    #[serde(rename = "4xx")]
    pub c4xx: u64,
    #[serde(rename = "5xx")]
    pub c5xx: u64,
}

impl StatusHistogram {
    fn bump(&mut self, class: &str) {
        match class {
            "2xx" => self.c2xx += 1,
            "3xx" => self.c3xx += 1,
            "4xx" => self.c4xx += 1,
            _ => self.c5xx += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.c2xx + self.c3xx + self.c4xx + self.c5xx
    }
}

#[derive(Debug, Clone)]
pub struct WindowMetrics {
    pub count: usize,
    pub rps: f64,
    pub status: StatusHistogram,
    pub error_rate_5xx: f64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub tails: [(&'static str, f64); 4],
    pub latency_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64, dur: Option<f64>, status: i64) -> Sample {
        Sample { ts, duration_ms: dur, status }
    }

    #[test]
    fn prunes_head_elements_outside_window() {
        let mut w = RollingWindow::new();
        w.push(sample(0.0, Some(10.0), 200), 0.0, 120.0);
        w.push(sample(200.0, Some(20.0), 200), 200.0, 120.0);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn rps_is_zero_when_window_non_positive() {
        let mut w = RollingWindow::new();
        w.push(sample(0.0, None, 200), 0.0, 120.0);
        let m = w.metrics(0.0);
        assert_eq!(m.rps, 0.0);
    }

    #[test]
    fn percentile_monotonicity_on_fixed_window() {
        let mut w = RollingWindow::new();
        for (i, d) in [5.0, 800.0, 1200.0, 15.0, 300.0, 2.0, 900.0].iter().enumerate() {
            w.push(sample(i as f64, Some(*d), 200), 10.0, 120.0);
        }
        let m = w.metrics(120.0);
        let p50 = m.p50_ms.unwrap();
        let p95 = m.p95_ms.unwrap();
        let p99 = m.p99_ms.unwrap();
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn error_rate_counts_5xx_class() {
        let mut w = RollingWindow::new();
        w.push(sample(0.0, Some(1.0), 200), 0.0, 120.0);
        w.push(sample(0.0, Some(1.0), 503), 0.0, 120.0);
        let m = w.metrics(120.0);
        assert_eq!(m.error_rate_5xx, 0.5);
        assert_eq!(m.status.c5xx, 1);
    }

    #[test]
    fn empty_window_has_zero_count_and_no_percentiles() {
        let w = RollingWindow::new();
        let m = w.metrics(120.0);
        assert_eq!(m.count, 0);
        assert_eq!(m.p95_ms, None);
        assert_eq!(m.error_rate_5xx, 0.0);
    }
}
