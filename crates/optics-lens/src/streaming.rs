//! Streaming-quantile lens: the same probabilistic adjustment as
//! [`crate::quantile`], but with a plain (non-atomic) estimate instead of a
//! multiplier indirection, which makes it cheaper at the cost of requiring a
//! single writer.
//!
//! This restriction is a deliberate trade, not an oversight: call `update`
//! from more than one thread and the write is a plain, unsynchronized store,
//! so the usual tearing/lost-update hazards of a data race apply. Use
//! [`crate::quantile`] instead when writers aren't known to be
//! single-threaded.

use crate::header::{payload, LensHeader, LensType};
use crate::LensResult;
use std::cell::UnsafeCell;

#[repr(C)]
pub struct StreamingPayload {
    /// Target quantile in `(0, 1)`, fixed at allocation time.
    quantile: f64,
    estimate: UnsafeCell<f64>,
    adjustment_value: f64,
}

// SAFETY: `estimate` is only ever accessed from `update`/`read`, which this
// module's doc comment requires callers to restrict to a single writer
// thread; readers racing a writer see a torn or stale `f64`, which is the
// documented trade-off, not unsoundness (no reference ever outlives the
// access, and no other field is ever mutated).
unsafe impl Sync for StreamingPayload {}

impl StreamingPayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<StreamingPayload>();
}

/// Writes the fixed parameters and the starting estimate at allocation time.
pub fn init(header: *mut LensHeader, quantile: f64, initial_estimate: f64, adjustment_value: f64) -> LensResult<()> {
    let ptr = payload::<StreamingPayload>(header, LensType::Streaming)?;
    // SAFETY: `payload` validated the type tag; this runs once, before the
    // lens is linked into any list a reader could traverse.
    unsafe {
        (*ptr).quantile = quantile;
        (*ptr).adjustment_value = adjustment_value;
        *(*ptr).estimate.get() = initial_estimate;
    }
    Ok(())
}

/// Single-writer-only: nudges `estimate` directly by one `adjustment_value`
/// step, in the direction a biased coin flip (weighted by `quantile`)
/// indicates.
pub fn update(header: *mut LensHeader, value: f64) -> LensResult<()> {
    let ptr = payload::<StreamingPayload>(header, LensType::Streaming)?;
    // SAFETY: validated above; caller contract restricts this to one writer.
    unsafe {
        let quantile = (*ptr).quantile;
        let adjustment_value = (*ptr).adjustment_value;
        let estimate = (*ptr).estimate.get();

        let smaller_than_quantile = optics_support::gen_prob(quantile);
        if value < *estimate && !smaller_than_quantile {
            *estimate -= adjustment_value;
        } else if smaller_than_quantile {
            *estimate += adjustment_value;
        }
    }
    Ok(())
}

/// Reads the current estimate.
pub fn read(header: *mut LensHeader) -> LensResult<f64> {
    let ptr = payload::<StreamingPayload>(header, LensType::Streaming)?;
    // SAFETY: validated above.
    Ok(unsafe { *(*ptr).estimate.get() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use optics_alloc::AllocState;
    use optics_region::Region;

    fn new_streaming(quantile: f64, initial: f64, step: f64) -> (Region, AllocState, *mut LensHeader) {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off = header::alloc(
            &alloc_state,
            &region,
            LensType::Streaming,
            StreamingPayload::PAYLOAD_LEN,
            "s",
        )
        .unwrap();
        let h = header::header_ptr(&region, off).unwrap();
        init(h, quantile, initial, step).unwrap();
        (region, alloc_state, h)
    }

    #[test]
    fn read_before_any_update_returns_initial_estimate() {
        let (_region, _alloc, h) = new_streaming(0.5, 10.0, 1.0);
        assert_eq!(read(h).unwrap(), 10.0);
    }

    #[test]
    fn repeated_updates_above_the_estimate_drift_it_upward() {
        let (_region, _alloc, h) = new_streaming(0.99, 0.0, 1.0);
        for _ in 0..200 {
            update(h, 1_000.0).unwrap();
        }
        assert!(read(h).unwrap() > 0.0);
    }

    #[test]
    fn repeated_updates_below_the_estimate_drift_it_downward() {
        let (_region, _alloc, h) = new_streaming(0.01, 1_000.0, 1.0);
        for _ in 0..200 {
            update(h, 0.0).unwrap();
        }
        assert!(read(h).unwrap() < 1_000.0);
    }
}
