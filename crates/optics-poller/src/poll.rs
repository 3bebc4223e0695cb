//! The `Poll` record a poller hands to every registered backend, and the
//! normalization helper that turns one into a flat stream of `(ts, sub_key,
//! value)` tuples.

use optics_lens::{distribution::DistReadout, histogram::HistoReadout};
use optics_support::Key;

/// A lens's freshly-read, not-yet-normalized value. Carries the same shape
/// each lens type's `read` returns.
#[derive(Debug, Clone)]
pub enum PollValue {
    Counter(i64),
    Gauge(f64),
    Distribution(DistReadout),
    Histogram(HistoReadout),
    Quantile(f64),
}

/// One lens's poll delivery: enough context for a backend to either consume
/// the raw value or run it through [`normalize`].
#[derive(Debug, Clone)]
pub struct Poll<'a> {
    pub host: &'a str,
    pub prefix: &'a str,
    pub source: &'a str,
    /// Pre-joined `prefix.source.name`, already clamped to NAME_MAX.
    pub key: &'a str,
    pub value: PollValue,
    pub ts: u64,
    pub elapsed: u64,
}

/// Expands a `Poll` into one or more `(ts, sub_key, value)` tuples:
/// counter and histogram counts divide by `elapsed`; gauge and quantile
/// pass through unchanged; distribution
/// expands into `.count/.p50/.p90/.p99/.max`; histogram expands into
/// `.below/.bucket_<lo>_<hi>/.above`, each divided by `elapsed`.
///
/// `emit` returns whether to keep going; returning `false` stops the
/// remaining sub-keys for this poll from being emitted.
pub fn normalize(poll: &Poll<'_>, mut emit: impl FnMut(u64, &str, f64) -> bool) {
    let elapsed = poll.elapsed.max(1) as f64;
    match &poll.value {
        PollValue::Counter(v) => {
            emit(poll.ts, poll.key, *v as f64 / elapsed);
        }
        PollValue::Gauge(v) => {
            emit(poll.ts, poll.key, *v);
        }
        PollValue::Quantile(v) => {
            emit(poll.ts, poll.key, *v);
        }
        PollValue::Distribution(readout) => {
            let q = optics_lens::distribution::quantiles(readout);
            let mut key = Key::new();
            key.push(poll.key);
            let subs = [
                ("count", q.n as f64 / elapsed),
                ("p50", q.p50),
                ("p90", q.p90),
                ("p99", q.p99),
                ("max", q.max),
            ];
            for (sub, value) in subs {
                let mark = key.push(sub);
                let keep_going = emit(poll.ts, key.as_str(), value);
                key.pop(mark);
                if !keep_going {
                    return;
                }
            }
        }
        PollValue::Histogram(readout) => {
            let mut key = Key::new();
            key.push(poll.key);

            let mark = key.push("below");
            let keep_going = emit(poll.ts, key.as_str(), readout.below as f64 / elapsed);
            key.pop(mark);
            if !keep_going {
                return;
            }

            for (lo, hi, count) in &readout.buckets {
                let mark = key.pushf(format_args!("bucket_{lo}_{hi}"));
                let keep_going = emit(poll.ts, key.as_str(), *count as f64 / elapsed);
                key.pop(mark);
                if !keep_going {
                    return;
                }
            }

            let mark = key.push("above");
            emit(poll.ts, key.as_str(), readout.above as f64 / elapsed);
            key.pop(mark);
        }
    }
}
