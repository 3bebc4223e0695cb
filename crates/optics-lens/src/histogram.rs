//! Histogram lens: a shared, immutable set of bucket edges plus per-epoch
//! atomic bucket counters.

use crate::header::{payload, LensHeader, LensType};
use crate::error::{LensError, LensResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of edges a histogram may be allocated with.
pub const BUCKETS_MAX: usize = 9;
const COUNTS_LEN: usize = BUCKETS_MAX - 1;

struct HistoSlot {
    below: AtomicU64,
    above: AtomicU64,
    counts: [AtomicU64; COUNTS_LEN],
}

#[repr(C)]
pub struct HistogramPayload {
    slots: [HistoSlot; 2],
    buckets: [f64; BUCKETS_MAX],
    buckets_len: u64,
}

impl HistogramPayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<HistogramPayload>();

    fn edges(&self) -> &[f64] {
        &self.buckets[..self.buckets_len as usize]
    }
}

/// A read-out, reset-on-read snapshot of one epoch's bucket counters, ready
/// for normalized delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoReadout {
    pub below: u64,
    pub above: u64,
    /// `(lo, hi, count)` for each interior bucket, half-open `[lo, hi)`.
    pub buckets: Vec<(f64, f64, u64)>,
}

/// Writes the shared, immutable bucket edges at allocation time. `edges`
/// must be strictly increasing and between 2 and [`BUCKETS_MAX`] long: fewer
/// than two edges leaves no interior `[e[0], e[1])` bucket, only `below` and
/// `above`.
pub fn init_buckets(header: *mut LensHeader, edges: &[f64]) -> LensResult<()> {
    if edges.len() < 2 || edges.len() > BUCKETS_MAX {
        return Err(LensError::InvalidBuckets {
            reason: format!("bucket count must be in 2..={BUCKETS_MAX}, got {}", edges.len()),
        });
    }
    if !edges.windows(2).all(|w| w[0] < w[1]) {
        return Err(LensError::InvalidBuckets {
            reason: "bucket edges must be strictly increasing".to_string(),
        });
    }

    let ptr = payload::<HistogramPayload>(header, LensType::Histo)?;
    // SAFETY: `payload` validated the type tag; this runs once, immediately
    // after `header::alloc` zero-filled the payload, before the lens is
    // linked into any list a reader could traverse.
    unsafe {
        for (i, &edge) in edges.iter().enumerate() {
            (*ptr).buckets[i] = edge;
        }
        (*ptr).buckets_len = edges.len() as u64;
    }
    Ok(())
}

/// Finds the bucket `value` falls in and increments its active-epoch
/// counter. Buckets are interior `[edges[i], edges[i+1])` spans; values
/// below `edges[0]` count as `below`, values at or above the last edge
/// count as `above`.
pub fn inc(header: *mut LensHeader, epoch: usize, value: f64) -> LensResult<()> {
    let ptr = payload::<HistogramPayload>(header, LensType::Histo)?;
    // SAFETY: validated above.
    let slot = unsafe { &(*ptr).slots[epoch] };
    // SAFETY: edges are written once at alloc time and never mutated again.
    let edges = unsafe { (*ptr).edges() };

    if value < edges[0] {
        slot.below.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }
    if value >= edges[edges.len() - 1] {
        slot.above.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    for i in 0..edges.len() - 1 {
        if value >= edges[i] && value < edges[i + 1] {
            slot.counts[i].fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    }
    unreachable!("value is within [edges[0], edges[last]) but matched no interior bucket");
}

/// Exchanges every counter in the inactive epoch's slot with zero and pairs
/// each interior count with its `(lo, hi)` edge span.
pub fn read(header: *mut LensHeader, epoch: usize) -> LensResult<HistoReadout> {
    let ptr = payload::<HistogramPayload>(header, LensType::Histo)?;
    // SAFETY: validated above.
    let slot = unsafe { &(*ptr).slots[epoch] };
    let edges = unsafe { (*ptr).edges() }.to_vec();

    let below = slot.below.swap(0, Ordering::Relaxed);
    let above = slot.above.swap(0, Ordering::Relaxed);

    let buckets = (0..edges.len() - 1)
        .map(|i| {
            let count = slot.counts[i].swap(0, Ordering::Relaxed);
            (edges[i], edges[i + 1], count)
        })
        .collect();

    Ok(HistoReadout { below, above, buckets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use optics_alloc::AllocState;
    use optics_region::Region;

    fn new_histo(edges: &[f64]) -> (Region, AllocState, *mut LensHeader) {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off =
            header::alloc(&alloc_state, &region, LensType::Histo, HistogramPayload::PAYLOAD_LEN, "h").unwrap();
        let h = header::header_ptr(&region, off).unwrap();
        init_buckets(h, edges).unwrap();
        (region, alloc_state, h)
    }

    #[test]
    fn rejects_too_few_or_unsorted_edges() {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off =
            header::alloc(&alloc_state, &region, LensType::Histo, HistogramPayload::PAYLOAD_LEN, "h").unwrap();
        let h = header::header_ptr(&region, off).unwrap();

        assert!(init_buckets(h, &[]).is_err());
        assert!(init_buckets(h, &[1.0]).is_err());
        assert!(init_buckets(h, &[1.0, 1.0, 2.0]).is_err());
        assert!(init_buckets(h, &[2.0, 1.0]).is_err());
    }

    #[test]
    fn values_land_in_below_interior_above() {
        let (_region, _alloc, h) = new_histo(&[0.0, 10.0, 100.0]);
        inc(h, 0, -5.0).unwrap();
        inc(h, 0, 5.0).unwrap();
        inc(h, 0, 50.0).unwrap();
        inc(h, 0, 500.0).unwrap();

        let readout = read(h, 0).unwrap();
        assert_eq!(readout.below, 1);
        assert_eq!(readout.above, 1);
        assert_eq!(readout.buckets, vec![(0.0, 10.0, 1), (10.0, 100.0, 1)]);
    }

    #[test]
    fn boundary_value_belongs_to_upper_bucket() {
        let (_region, _alloc, h) = new_histo(&[0.0, 10.0, 20.0]);
        inc(h, 0, 10.0).unwrap();
        let readout = read(h, 0).unwrap();
        assert_eq!(readout.buckets, vec![(0.0, 10.0, 0), (10.0, 20.0, 1)]);
    }

    #[test]
    fn read_resets_counters() {
        let (_region, _alloc, h) = new_histo(&[0.0, 10.0]);
        inc(h, 0, 5.0).unwrap();
        let _ = read(h, 0).unwrap();
        let readout = read(h, 0).unwrap();
        assert_eq!(readout.below, 0);
        assert_eq!(readout.above, 0);
    }
}
