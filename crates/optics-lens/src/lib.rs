//! The lens abstraction: typed metric objects living inside a region, their
//! intrusive doubly-linked global list, and the lock-free per-type
//! record/read algorithms.
//!
//! A lens is addressed the same way everything else in a region is: by a
//! region-relative offset. [`LensHeader`] is the cache-line-sized prefix
//! every lens carries; the type-specific payload and the lens's
//! null-terminated name follow it in memory. The six payload kinds each live
//! in their own module:
//!
//! * [`counter`] – two atomic accumulators, reset on read.
//! * [`gauge`] – a single last-writer-wins atomic value.
//! * [`distribution`] – per-epoch reservoir sampling with sample-aware merge.
//! * [`histogram`] – per-epoch atomic bucket counters over shared edges.
//! * [`quantile`] – atomic-multiplier target-quantile estimator.
//! * [`streaming`] – single-writer streaming-quantile estimator.

mod defer;
mod error;
mod header;

pub mod counter;
pub mod distribution;
pub mod gauge;
pub mod histogram;
pub mod quantile;
pub mod streaming;

pub use defer::DeferNode;
pub use error::{LensError, LensResult};
pub use header::{LensHeader, LensType, CACHE_LINE};

use optics_region::Region;

/// Number of per-lens epoch slots the substrate supports. Supporting more
/// than two concurrent epochs is out of scope.
pub const EPOCH_SLOTS: usize = 2;

/// Allocates a lens of `lens_type` with an in-region payload of
/// `payload_len` bytes and the given `name`, but does not insert it into any
/// list — that is the opener-private-lock-guarded responsibility of the
/// facade layer. Returns the lens's self-offset.
pub fn alloc(
    alloc_state: &optics_alloc::AllocState,
    region: &Region,
    lens_type: LensType,
    payload_len: usize,
    name: &str,
) -> LensResult<u64> {
    header::alloc(alloc_state, region, lens_type, payload_len, name)
}

/// Returns a lens's payload and name bytes to the allocator immediately.
/// Callers almost always want [`deferred_free`] instead.
pub fn free(alloc_state: &optics_alloc::AllocState, region: &Region, off: u64) -> LensResult<()> {
    header::free(alloc_state, region, off)
}

/// Queues a lens's bytes onto `region`'s current-epoch deferred-free list
/// rather than freeing them immediately, so a poller mid-traversal can never
/// dereference reclaimed memory.
pub fn deferred_free(
    alloc_state: &optics_alloc::AllocState,
    region: &Region,
    defer_head: &std::sync::atomic::AtomicU64,
    off: u64,
) -> LensResult<()> {
    header::deferred_free(alloc_state, region, defer_head, off)
}

/// Resolves a lens's self-offset to a header pointer, re-validating through
/// [`Region::ptr`] against the header's own recorded total length.
pub fn header_ptr(region: &Region, off: u64) -> LensResult<*mut LensHeader> {
    header::header_ptr(region, off)
}

/// Lock-free `next` read.
pub fn next(header: *const LensHeader) -> u64 {
    header::next(header)
}

/// Links `lens` in front of `next`. Must be called while holding the
/// opener-private lock.
pub fn set_next(region: &Region, header: *mut LensHeader, next: u64) -> LensResult<()> {
    header::set_next(region, header, next)
}

/// Unlinks `lens` by swinging its neighbors' pointers. Must be called while
/// holding the opener-private lock.
pub fn kill(region: &Region, header: *mut LensHeader) -> LensResult<()> {
    header::kill(region, header)
}

/// Drains every node queued on `defer_head`, returning each payload and node
/// to the allocator. Called by the facade's `epoch_inc` on the epoch about
/// to become active-then-inactive-again, which is exactly the epoch
/// guaranteed to have no outstanding readers left.
pub fn drain_deferred(
    alloc_state: &optics_alloc::AllocState,
    region: &Region,
    defer_head: &std::sync::atomic::AtomicU64,
) -> LensResult<()> {
    defer::drain(alloc_state, region, defer_head)
}
