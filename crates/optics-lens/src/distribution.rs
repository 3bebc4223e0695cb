//! Distribution lens: per-epoch spinlock-guarded reservoir sampling with a
//! sample-aware merge for cross-region aggregation.

use crate::header::{payload, LensHeader, LensType};
use crate::LensResult;
use optics_support::Spinlock;
use std::cell::UnsafeCell;

/// Fixed reservoir capacity.
pub const DIST_SAMPLES: usize = 300;

struct DistSlot {
    lock: Spinlock,
    n: UnsafeCell<u64>,
    max: UnsafeCell<f64>,
    samples: UnsafeCell<[f64; DIST_SAMPLES]>,
}

// SAFETY: every field other than `lock` is only ever touched while `lock`
// is held (`record`) or has just been acquired (`read`).
unsafe impl Sync for DistSlot {}

#[repr(C)]
pub struct DistributionPayload {
    slots: [DistSlot; 2],
}

impl DistributionPayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<DistributionPayload>();
}

/// A snapshot pulled out of one epoch slot (or merged from several).
#[derive(Debug, Clone, PartialEq)]
pub struct DistReadout {
    pub n: u64,
    pub max: f64,
    pub samples: Vec<f64>,
}

/// The normalized quantile report a poll delivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistQuantiles {
    pub n: u64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Result of a non-blocking read attempt: `Busy` means the slot's spinlock
/// was held, so the poller should skip this lens for the current round
/// rather than wait.
pub enum DistRead {
    Ready(DistReadout),
    Busy,
}

/// Records `value` into the active epoch's reservoir.
pub fn record(header: *mut LensHeader, epoch: usize, value: f64) -> LensResult<()> {
    let ptr = payload::<DistributionPayload>(header, LensType::Dist)?;
    // SAFETY: `payload` validated the type tag and returned a pointer to a
    // live `DistributionPayload`; `epoch` is always 0 or 1.
    let slot = unsafe { &(*ptr).slots[epoch] };

    slot.lock.lock();
    // SAFETY: exclusive access established by the spinlock above.
    unsafe {
        let n = *slot.n.get();
        let i = if n < DIST_SAMPLES as u64 {
            n as usize
        } else {
            optics_support::gen_range(0, n) as usize
        };
        if i < DIST_SAMPLES {
            (*slot.samples.get())[i] = value;
        }
        *slot.n.get() = n + 1;

        let max = slot.max.get();
        if value > *max {
            *max = value;
        }
    }
    slot.lock.unlock();

    Ok(())
}

/// Attempts a non-blocking read of the inactive epoch's reservoir, resetting
/// it in place on success.
pub fn read(header: *mut LensHeader, epoch: usize) -> LensResult<DistRead> {
    let ptr = payload::<DistributionPayload>(header, LensType::Dist)?;
    // SAFETY: same as `record`.
    let slot = unsafe { &(*ptr).slots[epoch] };

    if !slot.lock.try_lock() {
        return Ok(DistRead::Busy);
    }

    // SAFETY: exclusive access established by `try_lock` above.
    let (n, max, samples) = unsafe {
        let n = *slot.n.get();
        let max = *slot.max.get();
        let len = n.min(DIST_SAMPLES as u64) as usize;
        let samples = (*slot.samples.get())[..len].to_vec();

        *slot.n.get() = 0;
        *slot.max.get() = 0.0;

        (n, max, samples)
    };
    slot.lock.unlock();

    Ok(DistRead::Ready(DistReadout { n, max, samples }))
}

/// Produces a reservoir representing the union of `lhs` and `rhs`, for
/// combining reads of same-named lenses across regions.
pub fn merge(lhs: DistReadout, rhs: DistReadout) -> DistReadout {
    let n = lhs.n + rhs.n;
    let max = f64::max(lhs.max, rhs.max);

    let (mut dst, mut extra) = if lhs.samples.len() >= rhs.samples.len() {
        (lhs.samples, rhs.samples)
    } else {
        (rhs.samples, lhs.samples)
    };

    if dst.len() < DIST_SAMPLES && !extra.is_empty() {
        let to_move = (DIST_SAMPLES - dst.len()).min(extra.len());
        dst.extend(extra.drain(..to_move));
    }

    if extra.is_empty() {
        return DistReadout { n, max, samples: dst };
    }

    if extra.len() <= DIST_SAMPLES {
        for v in extra {
            let idx = optics_support::gen_range(0, dst.len() as u64) as usize;
            dst[idx] = v;
        }
    } else {
        let rate = extra.len() as f64 / (extra.len() + dst.len()) as f64;
        for i in 0..dst.len() {
            if optics_support::gen_prob(rate) {
                dst[i] = extra[i];
            }
        }
    }

    DistReadout { n, max, samples: dst }
}

/// Sorts a readout's samples and reports quantiles at `floor(len * p)` for
/// p in {0.50, 0.90, 0.99}, alongside the passed-through `n`/`max`.
pub fn quantiles(readout: &DistReadout) -> DistQuantiles {
    let mut sorted = readout.samples.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("distribution samples are never NaN"));

    let pick = |p: f64| -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    };

    DistQuantiles {
        n: readout.n,
        max: readout.max,
        p50: pick(0.50),
        p90: pick(0.90),
        p99: pick(0.99),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use optics_alloc::AllocState;
    use optics_region::Region;

    fn new_dist() -> (Region, AllocState, *mut LensHeader) {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off = header::alloc(
            &alloc_state,
            &region,
            LensType::Dist,
            DistributionPayload::PAYLOAD_LEN,
            "d",
        )
        .unwrap();
        let h = header::header_ptr(&region, off).unwrap();
        (region, alloc_state, h)
    }

    #[test]
    fn under_capacity_population_is_exact() {
        let (_region, _alloc, h) = new_dist();
        for i in 0..100 {
            record(h, 0, i as f64).unwrap();
        }

        let readout = match read(h, 0).unwrap() {
            DistRead::Ready(r) => r,
            DistRead::Busy => panic!("uncontended read must not be busy"),
        };
        assert_eq!(readout.n, 100);
        assert_eq!(readout.max, 99.0);
        assert_eq!(readout.samples.len(), 100);

        let q = quantiles(&readout);
        assert!((q.p50 - 50.0).abs() <= 2.0, "p50 = {}", q.p50);
        assert!((q.p90 - 90.0).abs() <= 2.0, "p90 = {}", q.p90);
        assert!((q.p99 - 99.0).abs() <= 2.0, "p99 = {}", q.p99);
        assert_eq!(q.max, 99.0);
    }

    #[test]
    fn read_resets_the_slot() {
        let (_region, _alloc, h) = new_dist();
        record(h, 0, 1.0).unwrap();
        let _ = read(h, 0).unwrap();

        match read(h, 0).unwrap() {
            DistRead::Ready(r) => assert_eq!(r.n, 0),
            DistRead::Busy => panic!("uncontended read must not be busy"),
        }
    }

    #[test]
    fn read_reports_busy_while_locked() {
        let (_region, _alloc, h) = new_dist();
        let ptr = payload::<DistributionPayload>(h, LensType::Dist).unwrap();
        // SAFETY: test-only direct lock acquisition to simulate a writer
        // mid-record.
        unsafe { (*ptr).slots[0].lock.lock() };

        assert!(matches!(read(h, 0).unwrap(), DistRead::Busy));

        unsafe { (*ptr).slots[0].lock.unlock() };
    }

    #[test]
    fn merge_with_empty_accumulator_is_identity() {
        let readout = DistReadout { n: 5, max: 9.0, samples: vec![1.0, 2.0, 9.0, 4.0, 5.0] };
        let empty = DistReadout { n: 0, max: 0.0, samples: Vec::new() };
        let merged = merge(readout.clone(), empty);
        assert_eq!(merged.n, 5);
        assert_eq!(merged.max, 9.0);
        assert_eq!(merged.samples.len(), 5);
    }

    #[test]
    fn merge_combines_counts_and_caps_samples_at_capacity() {
        let lhs = DistReadout { n: 200, max: 199.0, samples: (0..200).map(|v| v as f64).collect() };
        let rhs = DistReadout { n: 200, max: 399.0, samples: (200..400).map(|v| v as f64).collect() };
        let merged = merge(lhs, rhs);
        assert_eq!(merged.n, 400);
        assert_eq!(merged.max, 399.0);
        assert!(merged.samples.len() <= DIST_SAMPLES);
    }

    #[test]
    fn merge_of_two_full_reservoirs_stays_at_capacity() {
        let lhs = DistReadout {
            n: 10_000,
            max: 1.0,
            samples: vec![1.0; DIST_SAMPLES],
        };
        let rhs = DistReadout {
            n: 20_000,
            max: 2.0,
            samples: vec![2.0; DIST_SAMPLES],
        };
        let merged = merge(lhs, rhs);
        assert_eq!(merged.n, 30_000);
        assert_eq!(merged.samples.len(), DIST_SAMPLES);
    }
}
