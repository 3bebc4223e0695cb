//! The poller: enumerates regions, flips their epoch, traverses their lens
//! lists, and fans each reading out to every registered backend.

use crate::backend::Backend;
use crate::error::{PollerError, PollerResult};
use crate::poll::{Poll, PollValue};
use optics_lens::{distribution::DistRead, LensHeader, LensType};
use optics_support::Key;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bounded backend count.
pub const MAX_BACKENDS: usize = 8;

fn now_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Drives the discover-flip-traverse-normalize-fanout cycle over every
/// region under the shared-memory directory.
pub struct Poller {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    /// Registers a backend. Errors once the bounded backend count is
    /// reached.
    pub fn add_backend(&mut self, backend: Box<dyn Backend>) -> PollerResult<()> {
        if self.backends.len() >= MAX_BACKENDS {
            return Err(PollerError::TooManyBackends);
        }
        self.backends.push(backend);
        Ok(())
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Runs one poll round using the current wall-clock second as `ts`.
    pub fn poll(&mut self) -> PollerResult<()> {
        self.poll_at(now_seconds())
    }

    /// Runs one poll round at a caller-supplied timestamp: enumerate,
    /// flip, yield for stragglers, traverse and fan out, then close.
    pub fn poll_at(&mut self, ts: u64) -> PollerResult<()> {
        // Enumerate, open, warn-and-skip on failure.
        let names = optics_region::naming::list_region_names()?;
        let mut opened = Vec::with_capacity(names.len());
        for name in names {
            match optics_core::Optics::open(&name) {
                Ok(optics) => opened.push(optics),
                Err(err) => tracing::warn!(region = %name, error = %err, "failed to open region, skipping"),
            }
        }

        // Flip every region's epoch and remember what it returns.
        let mut windows = Vec::with_capacity(opened.len());
        for optics in &opened {
            let (inactive_epoch, window_start) = optics.epoch_inc_at(ts)?;
            windows.push((inactive_epoch, window_start));
        }

        // Let stragglers that had already selected the now-inactive
        // epoch finish writing before we read it.
        std::thread::yield_now();

        for backend in &mut self.backends {
            backend.begin();
        }

        // Per region, per lens, normalize and fan out.
        for (optics, (inactive_epoch, window_start)) in opened.iter().zip(windows.iter()) {
            let elapsed = ts.saturating_sub(*window_start).max(1);
            let epoch = *inactive_epoch as usize;
            let host = optics.host();
            let prefix = optics.prefix();
            let source = optics.source();

            let mut key = Key::new();
            if !prefix.is_empty() {
                key.push(prefix);
            }
            if !source.is_empty() {
                key.push(source);
            }

            let result = optics.foreach_lens(|_, header| {
                // SAFETY: `foreach_lens` only yields validated header
                // pointers for the lifetime of this callback.
                let name = unsafe { (*header).name() };
                let lens_type = unsafe { (*header).lens_type() };

                let mark = key.push(name);
                if let Some(value) = read_lens(header, lens_type, epoch, name) {
                    let poll = Poll { host, prefix, source, key: key.as_str(), value, ts, elapsed };
                    for backend in &mut self.backends {
                        backend.poll(&poll);
                    }
                }
                key.pop(mark);
            });
            result?;
        }

        for backend in &mut self.backends {
            backend.done();
        }

        // Regions close as `opened` drops at the end of this scope.
        Ok(())
    }
}

/// Reads a lens's inactive slot and dispatches to its type's `read`,
/// warning and returning `None` on `Busy` (distribution only) or a read
/// error rather than failing the whole round.
fn read_lens(header: *mut LensHeader, lens_type: LensType, epoch: usize, name: &str) -> Option<PollValue> {
    match lens_type {
        LensType::Counter => match optics_lens::counter::read(header, epoch) {
            Ok(v) => Some(PollValue::Counter(v)),
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "counter read failed, skipping");
                None
            }
        },
        LensType::Gauge => match optics_lens::gauge::read(header, epoch) {
            Ok(v) => Some(PollValue::Gauge(v)),
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "gauge read failed, skipping");
                None
            }
        },
        LensType::Dist => match optics_lens::distribution::read(header, epoch) {
            Ok(DistRead::Ready(readout)) => Some(PollValue::Distribution(readout)),
            Ok(DistRead::Busy) => {
                tracing::warn!(lens = name, "distribution slot busy, skipping for this round");
                None
            }
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "distribution read failed, skipping");
                None
            }
        },
        LensType::Histo => match optics_lens::histogram::read(header, epoch) {
            Ok(readout) => Some(PollValue::Histogram(readout)),
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "histogram read failed, skipping");
                None
            }
        },
        LensType::Quantile => match optics_lens::quantile::read(header) {
            Ok(v) => Some(PollValue::Quantile(v)),
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "quantile read failed, skipping");
                None
            }
        },
        LensType::Streaming => match optics_lens::streaming::read(header) {
            Ok(v) => Some(PollValue::Quantile(v)),
            Err(err) => {
                tracing::warn!(lens = name, error = %err, "streaming quantile read failed, skipping");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optics_core::{LensType as CoreLensType, Optics};
    use std::sync::{Arc, Mutex};

    struct RecordingBackend {
        seen: Arc<Mutex<Vec<(String, PollValue)>>>,
    }

    impl Backend for RecordingBackend {
        fn poll(&mut self, poll: &Poll<'_>) {
            self.seen.lock().unwrap().push((poll.key.to_string(), poll.value.clone()));
        }
    }

    fn with_shm_dir<R>(f: impl FnOnce() -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OPTICS_SHM_DIR", dir.path());
        let result = f();
        std::env::remove_var("OPTICS_SHM_DIR");
        result
    }

    #[test]
    fn poll_at_delivers_a_normalized_counter_rate() {
        with_shm_dir(|| {
            let optics = Optics::create("poller-test-counter").unwrap();
            optics.set_prefix("pfx").unwrap();
            optics.set_host("h").unwrap();
            let off = optics
                .lens_create("c", CoreLensType::Counter, optics_lens::counter::CounterPayload::PAYLOAD_LEN)
                .unwrap();
            let header = optics_lens::header_ptr(optics.region(), off).unwrap();
            optics_lens::counter::inc(header, optics.epoch() as usize, 4).unwrap();
            drop(optics);

            let seen = Arc::new(Mutex::new(Vec::new()));
            let mut poller = Poller::new();
            poller.add_backend(Box::new(RecordingBackend { seen: seen.clone() })).unwrap();
            poller.poll_at(2).unwrap();

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].0, "pfx.c");
            assert!(matches!(seen[0].1, PollValue::Counter(4)));

            Optics::unlink("poller-test-counter").ok();
        })
    }

    #[test]
    fn add_backend_rejects_past_the_bound() {
        struct Noop;
        impl Backend for Noop {
            fn poll(&mut self, _poll: &Poll<'_>) {}
        }

        let mut poller = Poller::new();
        for _ in 0..MAX_BACKENDS {
            poller.add_backend(Box::new(Noop)).unwrap();
        }
        assert!(matches!(poller.add_backend(Box::new(Noop)), Err(PollerError::TooManyBackends)));
    }
}
