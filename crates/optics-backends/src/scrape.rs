//! The Prometheus and JSON scrape backends: both accumulate one poll
//! round's raw (non-flattened) readings into a shared snapshot, served by
//! an embedded axum HTTP resource at `/metrics/prometheus` and
//! `/metrics/json`.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use optics_poller::{Backend, Poll, PollValue};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;

/// A single series' already-elapsed-normalized value, structured the way
/// each lens type's `read` shaped it rather than flattened into sub-keys.
#[derive(Debug, Clone)]
enum ScrapeValue {
    Scalar(f64),
    Distribution { count: f64, p50: f64, p90: f64, p99: f64, max: f64 },
    Histogram { below: f64, above: f64, buckets: Vec<(f64, f64, f64)> },
}

fn to_scrape_value(value: &PollValue, elapsed: u64) -> ScrapeValue {
    let elapsed = elapsed.max(1) as f64;
    match value {
        PollValue::Counter(v) => ScrapeValue::Scalar(*v as f64 / elapsed),
        PollValue::Gauge(v) => ScrapeValue::Scalar(*v),
        PollValue::Quantile(v) => ScrapeValue::Scalar(*v),
        PollValue::Distribution(readout) => {
            let q = optics_lens::distribution::quantiles(readout);
            ScrapeValue::Distribution { count: q.n as f64 / elapsed, p50: q.p50, p90: q.p90, p99: q.p99, max: q.max }
        }
        PollValue::Histogram(readout) => ScrapeValue::Histogram {
            below: readout.below as f64 / elapsed,
            above: readout.above as f64 / elapsed,
            buckets: readout.buckets.iter().map(|(lo, hi, count)| (*lo, *hi, *count as f64 / elapsed)).collect(),
        },
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    host: String,
    source: String,
    series: Vec<(String, ScrapeValue)>,
}

/// Shared accumulator between the backend (which fills it in once per poll
/// round) and the axum routes (which read it on every GET). A round's
/// series list is cleared on `begin` and rebuilt by `poll`, so a GET mid-
/// round always sees either the previous complete round or the current one
/// in progress — never a torn mix across two different rounds' clears.
#[derive(Clone, Default)]
pub struct ScrapeState {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl ScrapeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a `Backend` feeding this state. Registered once with the
    /// poller regardless of whether one or both scrape routes are mounted.
    pub fn backend(&self) -> Box<dyn Backend> {
        Box::new(ScrapeBackend { snapshot: self.snapshot.clone() })
    }

    /// Builds the axum router exposing the requested routes over this
    /// state.
    pub fn router(&self, prometheus: bool, json: bool) -> Router {
        let mut router: Router<Arc<Mutex<Snapshot>>> = Router::new();
        if prometheus {
            router = router.route("/metrics/prometheus", get(prometheus_handler));
        }
        if json {
            router = router.route("/metrics/json", get(json_handler));
        }
        router.with_state(self.snapshot.clone())
    }
}

struct ScrapeBackend {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl Backend for ScrapeBackend {
    fn begin(&mut self) {
        self.snapshot.lock().series.clear();
    }

    fn poll(&mut self, poll: &Poll<'_>) {
        let mut snapshot = self.snapshot.lock();
        snapshot.host = poll.host.to_string();
        snapshot.source = poll.source.to_string();
        snapshot.series.push((poll.key.to_string(), to_scrape_value(&poll.value, poll.elapsed)));
    }
}

fn sanitize(key: &str) -> String {
    key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' }).collect()
}

fn labels(host: &str, source: &str) -> String {
    if source.is_empty() {
        format!("host=\"{host}\"")
    } else {
        format!("host=\"{host}\",source=\"{source}\"")
    }
}

fn render_prometheus(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let base = labels(&snapshot.host, &snapshot.source);
    for (key, value) in &snapshot.series {
        let name = sanitize(key);
        match value {
            ScrapeValue::Scalar(v) => {
                let _ = writeln!(out, "# TYPE {name} gauge");
                let _ = writeln!(out, "{name}{{{base}}} {v}");
            }
            ScrapeValue::Distribution { count, p50, p90, p99, max: _ } => {
                let _ = writeln!(out, "# TYPE {name} summary");
                let _ = writeln!(out, "{name}{{{base},quantile=\"0.5\"}} {p50}");
                let _ = writeln!(out, "{name}{{{base},quantile=\"0.9\"}} {p90}");
                let _ = writeln!(out, "{name}{{{base},quantile=\"0.99\"}} {p99}");
                let _ = writeln!(out, "{name}_count{{{base}}} {count}");
            }
            ScrapeValue::Histogram { below, above, buckets } => {
                let _ = writeln!(out, "# TYPE {name} histogram");
                let mut cumulative = *below;
                for (_lo, hi, count) in buckets {
                    cumulative += count;
                    let _ = writeln!(out, "{name}_bucket{{{base},le=\"{hi}\"}} {cumulative}");
                }
                cumulative += above;
                let _ = writeln!(out, "{name}_bucket{{{base},le=\"+Inf\"}} {cumulative}");
                let _ = writeln!(out, "{name}_count{{{base}}} {cumulative}");
            }
        }
    }
    out
}

fn render_json(snapshot: &Snapshot) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in &snapshot.series {
        let rendered = match value {
            ScrapeValue::Scalar(v) => serde_json::json!(v),
            ScrapeValue::Distribution { count, p50, p90, p99, max } => {
                serde_json::json!({ "count": count, "p50": p50, "p90": p90, "p99": p99, "max": max })
            }
            ScrapeValue::Histogram { below, above, buckets } => {
                let mut obj = serde_json::Map::new();
                obj.insert("below".to_string(), serde_json::json!(below));
                obj.insert("above".to_string(), serde_json::json!(above));
                for (lo, hi, count) in buckets {
                    obj.insert(format!("bucket_{lo}-{hi}"), serde_json::json!(count));
                }
                serde_json::Value::Object(obj)
            }
        };
        map.insert(key.clone(), rendered);
    }
    serde_json::Value::Object(map)
}

async fn prometheus_handler(State(snapshot): State<Arc<Mutex<Snapshot>>>) -> String {
    render_prometheus(&snapshot.lock())
}

async fn json_handler(State(snapshot): State<Arc<Mutex<Snapshot>>>) -> axum::Json<serde_json::Value> {
    axum::Json(render_json(&snapshot.lock()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_renders_as_prometheus_gauge() {
        let snapshot = Snapshot { host: "h".into(), source: "".into(), series: vec![("p.c".into(), ScrapeValue::Scalar(3.0))] };
        let text = render_prometheus(&snapshot);
        assert!(text.contains("# TYPE p.c gauge"));
        assert!(text.contains("p.c{host=\"h\"} 3"));
    }

    #[test]
    fn distribution_renders_quantile_labels_and_count() {
        let snapshot = Snapshot {
            host: "h".into(),
            source: "src".into(),
            series: vec![("p.d".into(), ScrapeValue::Distribution { count: 2.0, p50: 1.0, p90: 2.0, p99: 3.0, max: 9.0 })],
        };
        let text = render_prometheus(&snapshot);
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains("p.d_count{host=\"h\",source=\"src\"} 2"));
    }

    #[test]
    fn histogram_renders_cumulative_buckets_and_plus_inf() {
        let snapshot = Snapshot {
            host: "h".into(),
            source: "".into(),
            series: vec![("p.h".into(), ScrapeValue::Histogram { below: 1.0, above: 1.0, buckets: vec![(0.0, 1.0, 2.0)] })],
        };
        let text = render_prometheus(&snapshot);
        assert!(text.contains("p.h_bucket{host=\"h\",le=\"1\"} 3"));
        assert!(text.contains("p.h_bucket{host=\"h\",le=\"+Inf\"} 4"));
        assert!(text.contains("p.h_count{host=\"h\"} 4"));
    }

    #[test]
    fn json_maps_distribution_to_an_object() {
        let snapshot = Snapshot {
            host: "h".into(),
            source: "".into(),
            series: vec![("p.d".into(), ScrapeValue::Distribution { count: 2.0, p50: 1.0, p90: 2.0, p99: 3.0, max: 9.0 })],
        };
        let value = render_json(&snapshot);
        assert_eq!(value["p.d"]["p50"], 1.0);
        assert_eq!(value["p.d"]["max"], 9.0);
    }

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize("req.count-total"), "req_count_total");
    }
}
