//! Monotonic and coarse-realtime clock helpers.
//!
//! Sub-microsecond fidelity is out of scope for the timer helper, so this
//! wraps `std::time` directly rather than reaching for a platform TSC
//! reader.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A fixed point in monotonic time, usable for measuring elapsed durations.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Coarse wall-clock seconds since the Unix epoch, the unit `poll_at`
/// timestamps are expressed in.
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Sleeps the current thread for `nanos` nanoseconds.
pub fn nsleep(nanos: u64) {
    std::thread::sleep(Duration::from_nanos(nanos));
}

/// Best-effort yield to let a straggling writer make progress before the
/// poller reads the slot it just made inactive. Not a correctness
/// requirement — the two-slot epoch scheme tolerates stragglers regardless.
pub fn yield_now() {
    std::thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_seconds_is_plausible() {
        // Sanity bound: any time after this crate was written.
        assert!(now_seconds() > 1_700_000_000);
    }

    #[test]
    fn nsleep_blocks_for_roughly_the_requested_duration() {
        let start = monotonic_now();
        nsleep(1_000_000); // 1ms
        assert!(start.elapsed() >= Duration::from_micros(500));
    }
}
