//! Error-signature aggregator (§4.E): any `log` event carrying a
//! non-empty `trace` is fingerprinted (`signature_from_trace`) and
//! counted over the same rolling window as request stats, regardless of
//! its `level`. Counts are windowed by
//! re-deriving from a timestamped occurrence deque rather than a bare
//! running total, so a signature's count decays once its occurrences
//! age out.

use crate::util::signature_from_trace;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct Occurrence {
    ts: f64,
    signature: String,
    sample_message: String,
}

#[derive(Debug, Default)]
pub struct ErrorSignatureAggregator {
    occurrences: VecDeque<Occurrence>,
}

#[derive(Debug, Clone)]
pub struct SignatureCount {
    pub signature: String,
    pub count: usize,
    pub sample_message: String,
    pub last_seen: f64,
}

impl ErrorSignatureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence if `trace` is present; no-op otherwise
    /// (only traceback-bearing logs get a signature, §4.E — no `level`
    /// restriction).
    pub fn record(&mut self, ts: f64, message: &str, trace: Option<&str>) {
        let Some(trace) = trace else { return };
        let signature = signature_from_trace(trace);
        self.occurrences.push_back(Occurrence {
            ts,
            signature,
            sample_message: message.to_string(),
        });
    }

    pub fn prune(&mut self, now: f64, window_s: f64) {
        while let Some(front) = self.occurrences.front() {
            if now - front.ts > window_s {
                self.occurrences.pop_front();
            } else {
                break;
            }
        }
    }

    /// Top signatures by count, descending, stable on ties (§4.E):
    /// first-seen order within the window is preserved for signatures
    /// that tie on count, rather than re-sorting by recency.
    pub fn top(&self, limit: usize) -> Vec<SignatureCount> {
        let mut order: Vec<&str> = Vec::new();
        let mut by_sig: HashMap<&str, (usize, f64, &str)> = HashMap::new();
        for occ in &self.occurrences {
            let entry = by_sig.entry(&occ.signature).or_insert_with(|| {
                order.push(&occ.signature);
                (0, occ.ts, occ.sample_message.as_str())
            });
            entry.0 += 1;
            entry.1 = occ.ts;
            entry.2 = &occ.sample_message;
        }
        let mut out: Vec<SignatureCount> = order
            .into_iter()
            .map(|sig| {
                let (count, last_seen, msg) = by_sig[sig];
                SignatureCount {
                    signature: sig.to_string(),
                    count,
                    sample_message: msg.to_string(),
                    last_seen,
                }
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count));
        out.truncate(limit);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_without_trace_are_ignored() {
        let mut agg = ErrorSignatureAggregator::new();
        agg.record(0.0, "oops", None);
        assert!(agg.top(10).is_empty());
    }

    #[test]
    fn repeated_trace_accumulates_single_signature() {
        let mut agg = ErrorSignatureAggregator::new();
        let trace = "File \"a.py\", line 1\nValueError: bad\n";
        agg.record(0.0, "bad 1", Some(trace));
        agg.record(1.0, "bad 2", Some(trace));
        let top = agg.top(10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 2);
        assert_eq!(top[0].sample_message, "bad 2");
    }

    #[test]
    fn prune_drops_stale_occurrences() {
        let mut agg = ErrorSignatureAggregator::new();
        agg.record(0.0, "old", Some("File \"a.py\", line 1\nValueError: x\n"));
        agg.prune(200.0, 120.0);
        assert!(agg.top(10).is_empty());
    }

    #[test]
    fn top_orders_by_count_descending() {
        let mut agg = ErrorSignatureAggregator::new();
        let t1 = "File \"a.py\", line 1\nValueError: one\n";
        let t2 = "File \"b.py\", line 2\nKeyError: two\n";
        agg.record(0.0, "m1", Some(t1));
        agg.record(1.0, "m2", Some(t2));
        agg.record(2.0, "m2b", Some(t2));
        let top = agg.top(10);
        assert_eq!(top[0].count, 2);
        assert_eq!(top[1].count, 1);
    }
}
