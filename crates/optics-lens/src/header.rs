//! The lens header: a cache-line-sized prefix stored in-region before the
//! type-specific payload and the null-terminated name.

use crate::error::{LensError, LensResult};
use optics_alloc::AllocState;
use optics_region::Region;
use optics_support::NAME_MAX;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte width every [`LensHeader`] is padded out to a multiple of, avoiding
/// false sharing between a lens header and its own payload's first
/// atomics. This is a size constraint, not a pointer-alignment one: the
/// allocator only guarantees blocks aligned to their size class's boundary
/// (`optics_alloc::size_class`), so `LensHeader` itself stays 8-aligned —
/// the "multiple of the cache line size" invariant is about `total_len`,
/// not about `&LensHeader`'s address.
pub const CACHE_LINE: usize = 64;

/// The type tag stored in a lens's header, dispatching record/read calls to
/// the matching payload module.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LensType {
    Counter = 0,
    Gauge = 1,
    Dist = 2,
    Histo = 3,
    Streaming = 4,
    Quantile = 5,
}

impl LensType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(LensType::Counter),
            1 => Some(LensType::Gauge),
            2 => Some(LensType::Dist),
            3 => Some(LensType::Histo),
            4 => Some(LensType::Streaming),
            5 => Some(LensType::Quantile),
            _ => None,
        }
    }
}

/// Self-offset, total payload length, name length, intrusive list linkage
/// and type tag for a lens. `next` is mutated lock-free
/// by writers and readers alike (traversal tolerates a stale load because
/// nodes are epoch-retired, never freed out from under a reader); `prev` is
/// mutated only while the opener-private lock is held, but is modeled as an
/// atomic for the same reason `AllocClass::alloc` is in `optics-alloc`: it
/// sits in memory that, in the multi-process case, is genuinely shared.
#[repr(C, align(8))]
pub struct LensHeader {
    self_off: u64,
    payload_len: u64,
    name_len: u64,
    next: AtomicU64,
    prev: AtomicU64,
    lens_type: u32,
    _padding: [u8; 20],
}

const _: () = assert!(
    size_of::<LensHeader>() % CACHE_LINE == 0,
    "lens header must align to a cache line"
);

impl LensHeader {
    pub fn self_off(&self) -> u64 {
        self.self_off
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    pub fn name_len(&self) -> u64 {
        self.name_len
    }

    pub fn lens_type(&self) -> LensType {
        LensType::from_u32(self.lens_type)
            .expect("lens header carries an unrecognized type tag; region is corrupt")
    }

    pub fn next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn prev(&self) -> u64 {
        self.prev.load(Ordering::Relaxed)
    }

    /// Total in-region footprint: header + payload + name (including the
    /// trailing NUL).
    pub fn total_len(&self) -> u64 {
        size_of::<LensHeader>() as u64 + self.payload_len + self.name_len
    }

    /// The lens's name, re-derived from the header rather than cached, so a
    /// stale copy can never diverge from what's actually stored in-region.
    pub fn name(&self) -> &str {
        let ptr = self as *const LensHeader as *const u8;
        let name_off = size_of::<LensHeader>() + self.payload_len as usize;
        let len = self.name_len as usize - 1;
        // SAFETY: `name_off + len` is within this lens's allocated span by
        // construction (`alloc` below sizes the allocation to exactly fit
        // header + payload + name_len).
        let bytes = unsafe { std::slice::from_raw_parts(ptr.add(name_off), len) };
        std::str::from_utf8(bytes).expect("lens names are always written as UTF-8")
    }
}

/// Resolves `off` to a header pointer, re-validating through
/// [`Region::ptr`] against the header's own recorded total length so a
/// region that has (hypothetically) shrunk the object cannot be addressed
/// past its real bounds.
pub fn header_ptr(region: &Region, off: u64) -> LensResult<*mut LensHeader> {
    let probe_len = size_of::<LensHeader>();
    let raw = region.ptr(off, probe_len)?;
    let header = raw as *mut LensHeader;
    // SAFETY: `raw` addresses `probe_len` validated bytes, enough to read
    // every fixed field of `LensHeader`.
    let total = unsafe { (*header).total_len() } as usize;
    region.ptr(off, total)?;
    Ok(header)
}

/// Raw pointer to the payload bytes immediately following the header.
pub fn payload_ptr(header: *mut LensHeader) -> *mut u8 {
    // SAFETY: `header` was produced by `header_ptr`, which validated at
    // least `size_of::<LensHeader>()` bytes at this address.
    unsafe { (header as *mut u8).add(size_of::<LensHeader>()) }
}

/// Type-checked payload accessor: reinterprets the payload bytes as `*mut
/// T` if the stored type tag matches `expected`, else `WrongType`.
pub fn payload<T>(header: *mut LensHeader, expected: LensType) -> LensResult<*mut T> {
    // SAFETY: `header` is a validated pointer from `header_ptr`.
    let actual = unsafe { (*header).lens_type() };
    if actual != expected {
        return Err(LensError::WrongType { expected, actual });
    }
    Ok(payload_ptr(header) as *mut T)
}

/// Allocates a lens (header + zeroed payload + name), without inserting it
/// into any list.
pub fn alloc(
    alloc_state: &AllocState,
    region: &Region,
    lens_type: LensType,
    payload_len: usize,
    name: &str,
) -> LensResult<u64> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() >= NAME_MAX {
        return Err(LensError::NameTooLong { name: name.to_string() });
    }
    let name_len = name_bytes.len() + 1;
    let header_len = size_of::<LensHeader>();
    let total = header_len + payload_len + name_len;

    let off = optics_alloc::alloc(alloc_state, region, total)?;
    let ptr = region.ptr(off, total)? as *mut LensHeader;

    // SAFETY: `optics_alloc::alloc` zero-fills a fresh, exclusively-owned
    // block of exactly `total` bytes at `off`; nothing else can observe
    // `ptr` until this function returns `off` to its caller.
    unsafe {
        (*ptr).self_off = off;
        (*ptr).payload_len = payload_len as u64;
        (*ptr).name_len = name_len as u64;
        (*ptr).next = AtomicU64::new(0);
        (*ptr).prev = AtomicU64::new(0);
        (*ptr).lens_type = lens_type as u32;

        let name_dst = (ptr as *mut u8).add(header_len + payload_len);
        std::ptr::copy_nonoverlapping(name_bytes.as_ptr(), name_dst, name_bytes.len());
        *name_dst.add(name_bytes.len()) = 0;
    }

    Ok(off)
}

/// Returns a lens's entire footprint to the allocator immediately. Most
/// callers want [`crate::deferred_free`] instead.
pub fn free(alloc_state: &AllocState, region: &Region, off: u64) -> LensResult<()> {
    let header = header_ptr(region, off)?;
    // SAFETY: validated by `header_ptr`.
    let total = unsafe { (*header).total_len() } as usize;
    optics_alloc::free(alloc_state, region, off, total);
    Ok(())
}

/// Queues a lens's footprint onto `defer_head`'s deferred-free list instead
/// of freeing it immediately, so a concurrent poller mid-traversal never
/// dereferences reclaimed memory.
pub fn deferred_free(
    alloc_state: &AllocState,
    region: &Region,
    defer_head: &AtomicU64,
    off: u64,
) -> LensResult<()> {
    let header = header_ptr(region, off)?;
    // SAFETY: validated by `header_ptr`.
    let total = unsafe { (*header).total_len() } as usize;
    crate::defer::push(alloc_state, region, defer_head, off, total)?;
    Ok(())
}

/// Lock-free `next` read. Safe to race with concurrent
/// unlinking: the node stays valid until the next epoch flip retires it.
pub fn next(header: *const LensHeader) -> u64 {
    // SAFETY: `header` is a validated pointer from `header_ptr`.
    unsafe { (*header).next() }
}

/// Links `lens` in front of the list, setting `lens.next = next` and (if
/// `next` is non-null) `next.prev = lens`. Must be called while holding the
/// opener-private lock.
pub fn set_next(region: &Region, header: *mut LensHeader, next: u64) -> LensResult<()> {
    // SAFETY: `header` is a validated pointer from `header_ptr`.
    unsafe { (*header).next.store(next, Ordering::Relaxed) };
    if next == 0 {
        return Ok(());
    }

    let next_header = header_ptr(region, next)?;
    // SAFETY: both pointers are validated; `self_off` is read-only after
    // allocation.
    unsafe {
        debug_assert_eq!(
            (*next_header).prev.load(Ordering::Relaxed),
            0,
            "adding a node that is already linked into a list"
        );
        (*next_header).prev.store((*header).self_off, Ordering::Relaxed);
    }
    Ok(())
}

/// Unlinks `lens` from the list by swinging its neighbors' pointers. Must be
/// called while holding the opener-private lock.
pub fn kill(region: &Region, header: *mut LensHeader) -> LensResult<()> {
    // SAFETY: `header` is a validated pointer from `header_ptr`.
    let (next_off, prev_off, self_off) =
        unsafe { ((*header).next(), (*header).prev(), (*header).self_off) };

    if next_off != 0 {
        let next_header = header_ptr(region, next_off)?;
        // SAFETY: validated pointer.
        unsafe {
            debug_assert_eq!(
                (*next_header).prev.load(Ordering::Relaxed),
                self_off,
                "corrupted lens list: next.prev does not point back to self"
            );
            (*next_header).prev.store(prev_off, Ordering::Relaxed);
        }
    }

    if prev_off != 0 {
        let prev_header = header_ptr(region, prev_off)?;
        // SAFETY: validated pointer.
        unsafe {
            debug_assert_eq!(
                (*prev_header).next.load(Ordering::Relaxed),
                self_off,
                "corrupted lens list: prev.next does not point back to self"
            );
            (*prev_header).next.store(next_off, Ordering::Relaxed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::create_anonymous(64).unwrap()
    }

    #[test]
    fn header_size_is_cache_line_multiple() {
        assert_eq!(size_of::<LensHeader>() % CACHE_LINE, 0);
    }

    #[test]
    fn alloc_round_trips_fields() {
        let region = region();
        let alloc_state = AllocState::new();
        let off = alloc(&alloc_state, &region, LensType::Counter, 16, "req.count").unwrap();

        let header = header_ptr(&region, off).unwrap();
        // SAFETY: header_ptr validated this pointer.
        unsafe {
            assert_eq!((*header).self_off(), off);
            assert_eq!((*header).payload_len(), 16);
            assert_eq!((*header).lens_type(), LensType::Counter);
            assert_eq!((*header).name(), "req.count");
        }
    }

    #[test]
    fn rejects_name_too_long() {
        let region = region();
        let alloc_state = AllocState::new();
        let long_name = "x".repeat(NAME_MAX);
        let err = alloc(&alloc_state, &region, LensType::Gauge, 8, &long_name).unwrap_err();
        assert!(matches!(err, LensError::NameTooLong { .. }));
    }

    #[test]
    fn set_next_links_prev_back() {
        let region = region();
        let alloc_state = AllocState::new();
        let a = alloc(&alloc_state, &region, LensType::Counter, 16, "a").unwrap();
        let b = alloc(&alloc_state, &region, LensType::Counter, 16, "b").unwrap();

        let a_header = header_ptr(&region, a).unwrap();
        set_next(&region, a_header, b).unwrap();

        let b_header = header_ptr(&region, b).unwrap();
        // SAFETY: validated pointers.
        unsafe {
            assert_eq!((*a_header).next(), b);
            assert_eq!((*b_header).prev(), a);
        }
    }

    #[test]
    fn kill_swings_neighbor_pointers() {
        let region = region();
        let alloc_state = AllocState::new();
        let a = alloc(&alloc_state, &region, LensType::Counter, 16, "a").unwrap();
        let b = alloc(&alloc_state, &region, LensType::Counter, 16, "b").unwrap();
        let c = alloc(&alloc_state, &region, LensType::Counter, 16, "c").unwrap();

        let a_header = header_ptr(&region, a).unwrap();
        let b_header = header_ptr(&region, b).unwrap();
        set_next(&region, a_header, b).unwrap();
        set_next(&region, b_header, c).unwrap();

        kill(&region, b_header).unwrap();

        let a_header = header_ptr(&region, a).unwrap();
        let c_header = header_ptr(&region, c).unwrap();
        // SAFETY: validated pointers.
        unsafe {
            assert_eq!((*a_header).next(), c);
            assert_eq!((*c_header).prev(), a);
        }
    }

    #[test]
    fn payload_rejects_wrong_type() {
        let region = region();
        let alloc_state = AllocState::new();
        let off = alloc(&alloc_state, &region, LensType::Gauge, 8, "g").unwrap();
        let header = header_ptr(&region, off).unwrap();
        let err = payload::<u64>(header, LensType::Counter).unwrap_err();
        assert!(matches!(err, LensError::WrongType { .. }));
    }
}
