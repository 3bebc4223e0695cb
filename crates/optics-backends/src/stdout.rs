//! The plainest backend: one normalized line per metric on stdout.

use optics_poller::{normalize, Backend, Poll};

#[derive(Debug, Default)]
pub struct StdoutBackend;

impl StdoutBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for StdoutBackend {
    fn poll(&mut self, poll: &Poll<'_>) {
        normalize(poll, |ts, key, value| {
            println!("[{ts}] {key}: {value}");
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optics_poller::PollValue;

    #[test]
    fn poll_does_not_panic_on_every_value_shape() {
        let mut backend = StdoutBackend::new();
        backend.poll(&Poll { host: "h", prefix: "p", source: "", key: "p.c", value: PollValue::Counter(3), ts: 1, elapsed: 1 });
        backend.poll(&Poll { host: "h", prefix: "p", source: "", key: "p.g", value: PollValue::Gauge(1.5), ts: 1, elapsed: 1 });
    }
}
