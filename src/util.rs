//! Pure helper functions shared across the aggregate components: latency
//! percentile interpolation, tail-rate buckets, sparkline rendering and
//! the error-signature fingerprint. Kept dependency-free and
//! side-effect-free so each is trivially unit-testable in isolation.

use sha1::{Digest, Sha1};

const TAIL_THRESHOLDS_MS: [f64; 4] = [250.0, 500.0, 1000.0, 2000.0];

/// Linear-interpolation percentile over an ascending-sorted slice (§4.C).
/// `p` is clamped to `[0, 100]` at the edges; `None` on an empty slice.
pub fn percentile(sorted_vals: &[f64], p: f64) -> Option<f64> {
    if sorted_vals.is_empty() {
        return None;
    }
    if p <= 0.0 {
        return Some(sorted_vals[0]);
    }
    if p >= 100.0 {
        return Some(sorted_vals[sorted_vals.len() - 1]);
    }
    let k = (sorted_vals.len() - 1) as f64 * (p / 100.0);
    let f = k.floor() as usize;
    let c = (f + 1).min(sorted_vals.len() - 1);
    if f == c {
        return Some(sorted_vals[f]);
    }
    Some(sorted_vals[f] + (sorted_vals[c] - sorted_vals[f]) * (k - f as f64))
}

/// Fraction of durations strictly greater than each fixed threshold,
/// keyed `gt250`/`gt500`/`gt1000`/`gt2000` (§4.C, per-endpoint only).
pub fn tail_rates(durs: &[f64]) -> [(&'static str, f64); 4] {
    const KEYS: [&str; 4] = ["gt250", "gt500", "gt1000", "gt2000"];
    let mut out = [(KEYS[0], 0.0), (KEYS[1], 0.0), (KEYS[2], 0.0), (KEYS[3], 0.0)];
    if durs.is_empty() {
        return out;
    }
    let n = durs.len() as f64;
    for (i, threshold) in TAIL_THRESHOLDS_MS.iter().enumerate() {
        let count = durs.iter().filter(|&&d| d > *threshold).count() as f64;
        out[i].1 = count / n;
    }
    out
}

const SPARK_BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Renders a short time series as a block-ramp sparkline (§6, GLOSSARY).
pub fn sparkline(vals: &[f64]) -> String {
    if vals.is_empty() {
        return String::new();
    }
    let mn = vals.iter().cloned().fold(f64::INFINITY, f64::min);
    let mx = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if mx - mn < 1e-9 {
        return SPARK_BLOCKS[0].to_string().repeat(vals.len());
    }
    vals.iter()
        .map(|&v| {
            let idx = ((v - mn) / (mx - mn) * (SPARK_BLOCKS.len() - 1) as f64) as usize;
            SPARK_BLOCKS[idx.min(SPARK_BLOCKS.len() - 1)]
        })
        .collect()
}

/// Stable 10-hex-char fingerprint over a traceback (§4.E, GLOSSARY):
/// SHA1 of `last_nonblank_line + "\n" + first_three_"File "_frames`.
pub fn signature_from_trace(trace: &str) -> String {
    let lines: Vec<&str> = trace
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail = lines.last().copied().unwrap_or("Exception");
    let frames: Vec<&str> = lines.iter().filter(|l| l.starts_with("File ")).copied().collect();
    let head = frames.iter().take(3).cloned().collect::<Vec<_>>().join("\n");
    let base = format!("{}\n{}", tail, head);

    let mut hasher = Sha1::new();
    hasher.update(base.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..10.min(digest.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_linear_interpolation_example() {
        let durs = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&durs, 50.0), Some(30.0));
        assert!((percentile(&durs, 95.0).unwrap() - 48.0).abs() < 1e-9);
        assert!((percentile(&durs, 99.0).unwrap() - 49.6).abs() < 1e-9);
    }

    #[test]
    fn percentile_empty_is_none() {
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn percentile_edges_clamp_to_ends() {
        let durs = vec![1.0, 2.0, 3.0];
        assert_eq!(percentile(&durs, 0.0), Some(1.0));
        assert_eq!(percentile(&durs, 100.0), Some(3.0));
    }

    #[test]
    fn tail_rates_empty_is_all_zero() {
        let rates = tail_rates(&[]);
        assert!(rates.iter().all(|(_, v)| *v == 0.0));
    }

    #[test]
    fn tail_rates_counts_strictly_greater() {
        let rates = tail_rates(&[100.0, 250.0, 300.0, 600.0]);
        let by_key: std::collections::HashMap<_, _> = rates.into_iter().collect();
        assert!((by_key["gt250"] - 0.5).abs() < 1e-9); // 300, 600 > 250
        assert!((by_key["gt500"] - 0.25).abs() < 1e-9); // 600 > 500
    }

    #[test]
    fn sparkline_constant_series_is_low_block() {
        assert_eq!(sparkline(&[5.0, 5.0, 5.0]), "▁▁▁");
    }

    #[test]
    fn sparkline_empty_is_empty() {
        assert_eq!(sparkline(&[]), "");
    }

    #[test]
    fn sparkline_spans_full_ramp() {
        let spark = sparkline(&[0.0, 50.0, 100.0]);
        assert_eq!(spark.chars().next().unwrap(), '▁');
        assert_eq!(spark.chars().last().unwrap(), '█');
    }

    #[test]
    fn signature_is_ten_hex_chars_and_stable() {
        let trace = "Traceback (most recent call last):\n  File \"a.py\", line 1\n  File \"b.py\", line 2\nValueError: bad\n";
        let sig1 = signature_from_trace(trace);
        let sig2 = signature_from_trace(trace);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 10);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_differs_for_different_traces() {
        let a = signature_from_trace("File \"a.py\", line 1\nValueError: a\n");
        let b = signature_from_trace("File \"a.py\", line 1\nValueError: b\n");
        assert_ne!(a, b);
    }
}
