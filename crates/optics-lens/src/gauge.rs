//! Gauge lens: a single atomic 64-bit value interpreted as an f64 bit
//! pattern, unlike every other lens type not epoch-sliced — it is meant to
//! represent "the current value", so it should survive an idle poll window
//! rather than reset.
//!
//! `set` uses a plain store rather than a `fetch_add` on the bit pattern:
//! under concurrent writers, adding two IEEE-754 bit patterns as integers
//! produces arithmetic garbage. A plain store is last-writer-wins, same as
//! any other single-value gauge library.

use crate::header::{payload, LensHeader, LensType};
use crate::LensResult;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(C)]
pub struct GaugePayload {
    value: AtomicU64,
}

impl GaugePayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<GaugePayload>();
}

/// Sets the gauge's value. `epoch` is accepted for interface uniformity
/// with the other lens types but unused: a gauge has no per-epoch slot, so
/// a `set` is visible to every subsequent `read` regardless of epoch.
pub fn set(header: *mut LensHeader, _epoch: usize, value: f64) -> LensResult<()> {
    let ptr = payload::<GaugePayload>(header, LensType::Gauge)?;
    // SAFETY: `payload` validated the type tag and returned a pointer to a
    // live `GaugePayload`.
    unsafe { (*ptr).value.store(value.to_bits(), Ordering::Relaxed) };
    Ok(())
}

/// Reads the gauge's current value, unaffected by epoch flips.
pub fn read(header: *mut LensHeader, _epoch: usize) -> LensResult<f64> {
    let ptr = payload::<GaugePayload>(header, LensType::Gauge)?;
    // SAFETY: same as `set`.
    let bits = unsafe { (*ptr).value.load(Ordering::Relaxed) };
    Ok(f64::from_bits(bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use optics_alloc::AllocState;
    use optics_region::Region;

    fn new_gauge() -> (Region, AllocState, *mut LensHeader) {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off = header::alloc(&alloc_state, &region, LensType::Gauge, GaugePayload::PAYLOAD_LEN, "g").unwrap();
        let h = header::header_ptr(&region, off).unwrap();
        (region, alloc_state, h)
    }

    #[test]
    fn set_then_read_round_trips() {
        let (_region, _alloc, h) = new_gauge();
        set(h, 0, 7.0).unwrap();
        assert_eq!(read(h, 0).unwrap(), 7.0);
    }

    #[test]
    fn value_survives_epoch_flip_with_no_intervening_writes() {
        let (_region, _alloc, h) = new_gauge();
        set(h, 0, 7.0).unwrap();
        assert_eq!(read(h, 1).unwrap(), 7.0, "gauge has no per-epoch slot to reset");
        assert_eq!(read(h, 1).unwrap(), 7.0, "reading does not reset a gauge");
    }

    #[test]
    fn last_write_wins() {
        let (_region, _alloc, h) = new_gauge();
        set(h, 0, 1.0).unwrap();
        set(h, 0, 2.0).unwrap();
        assert_eq!(read(h, 0).unwrap(), 2.0);
    }
}
