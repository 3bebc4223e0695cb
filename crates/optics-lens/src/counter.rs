//! Counter lens: two atomic 64-bit signed accumulators, one per epoch slot.

use crate::header::{payload, LensHeader, LensType};
use crate::LensResult;
use std::sync::atomic::{AtomicI64, Ordering};

#[repr(C)]
pub struct CounterPayload {
    value: [AtomicI64; 2],
}

impl CounterPayload {
    pub const PAYLOAD_LEN: usize = std::mem::size_of::<CounterPayload>();
}

/// Relaxed fetch-add on the active epoch's slot. Commutative, so no
/// stronger ordering is needed — the epoch flip itself is the barrier that
/// separates one polling window's increments from the next.
pub fn inc(header: *mut LensHeader, epoch: usize, delta: i64) -> LensResult<()> {
    let ptr = payload::<CounterPayload>(header, LensType::Counter)?;
    // SAFETY: `payload` validated the type tag and returned a pointer to a
    // live `CounterPayload`.
    unsafe { (*ptr).value[epoch].fetch_add(delta, Ordering::Relaxed) };
    Ok(())
}

/// Exchanges the inactive epoch's slot with zero, returning what had
/// accumulated since the last read. Resetting on read means a subsequent
/// poll only observes increments made after this one.
pub fn read(header: *mut LensHeader, epoch: usize) -> LensResult<i64> {
    let ptr = payload::<CounterPayload>(header, LensType::Counter)?;
    // SAFETY: same as `inc`.
    Ok(unsafe { (*ptr).value[epoch].swap(0, Ordering::Relaxed) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header;
    use optics_alloc::AllocState;
    use optics_region::Region;

    fn new_counter() -> (Region, AllocState, *mut LensHeader) {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let off = header::alloc(
            &alloc_state,
            &region,
            LensType::Counter,
            CounterPayload::PAYLOAD_LEN,
            "c",
        )
        .unwrap();
        let h = header::header_ptr(&region, off).unwrap();
        (region, alloc_state, h)
    }

    #[test]
    fn inc_then_read_sums_and_resets() {
        let (_region, _alloc, h) = new_counter();
        inc(h, 0, 1).unwrap();
        inc(h, 0, 2).unwrap();
        assert_eq!(read(h, 0).unwrap(), 3);
        assert_eq!(read(h, 0).unwrap(), 0, "read must reset the slot");
    }

    #[test]
    fn epoch_slots_are_independent() {
        let (_region, _alloc, h) = new_counter();
        inc(h, 0, 5).unwrap();
        inc(h, 1, 7).unwrap();
        assert_eq!(read(h, 1).unwrap(), 7);
        assert_eq!(read(h, 0).unwrap(), 5);
    }
}
