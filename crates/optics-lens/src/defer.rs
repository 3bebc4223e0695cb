//! The deferred-free queue: nodes allocated from the same region and queued
//! onto the current epoch's defer-list head, reclaimed only once the epoch
//! they were queued on has been retired.

use crate::error::LensResult;
use optics_alloc::AllocState;
use optics_region::Region;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// `{payload offset, payload length, next-offset}`, threaded into a
/// lock-free singly-linked list the same way an allocator free block is.
#[repr(C)]
pub struct DeferNode {
    off: u64,
    len: u64,
    next: u64,
}

/// Queues `(off, len)` onto `head`'s deferred-free list. Callable from any
/// thread context — the publish is a single release-ordered CAS, same
/// discipline as the allocator's free-list push.
pub fn push(
    alloc_state: &AllocState,
    region: &Region,
    head: &AtomicU64,
    off: u64,
    len: usize,
) -> LensResult<()> {
    let node_len = size_of::<DeferNode>();
    let node_off = optics_alloc::alloc(alloc_state, region, node_len)?;
    let node_ptr = region.ptr(node_off, node_len)? as *mut DeferNode;

    // SAFETY: `node_ptr` addresses a freshly allocated, exclusively-owned
    // `DeferNode`-sized block until it is published onto `head` below.
    unsafe {
        (*node_ptr).off = off;
        (*node_ptr).len = len as u64;
    }

    let mut old = head.load(Ordering::Relaxed);
    loop {
        // SAFETY: same justification as the field writes above; `next` is
        // rewritten on every retry, still exclusively owned until the CAS
        // below succeeds.
        unsafe { (*node_ptr).next = old };
        match head.compare_exchange_weak(old, node_off, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => return Ok(()),
            Err(actual) => old = actual,
        }
    }
}

/// Drains every node queued on `head`, returning each payload to the
/// allocator and then the node itself. Called by the epoch-flip machinery
/// on the epoch that is about to become active-then-inactive again, which
/// is exactly the epoch guaranteed to have no outstanding readers left.
pub fn drain(alloc_state: &AllocState, region: &Region, head: &AtomicU64) -> LensResult<()> {
    let node_len = size_of::<DeferNode>();
    // Acquire-adopt: pairs with the release-CAS in `push`, so every
    // next-pointer in the adopted chain is visible.
    let mut node_off = head.swap(0, Ordering::Acquire);

    while node_off != 0 {
        let node_ptr = region.ptr(node_off, node_len)? as *mut DeferNode;
        // SAFETY: `node_ptr` was just validated by `region.ptr`.
        let (off, len, next) = unsafe { ((*node_ptr).off, (*node_ptr).len as usize, (*node_ptr).next) };

        optics_alloc::free(alloc_state, region, off, len);
        optics_alloc::free(alloc_state, region, node_off, node_len);
        node_off = next;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_reclaims_payload_and_node() {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let head = AtomicU64::new(0);

        let payload_off = optics_alloc::alloc(&alloc_state, &region, 40).unwrap();
        push(&alloc_state, &region, &head, payload_off, 40).unwrap();
        assert_ne!(head.load(Ordering::Relaxed), 0);

        drain(&alloc_state, &region, &head).unwrap();
        assert_eq!(head.load(Ordering::Relaxed), 0);

        // The payload block should be back on the allocator's free list for
        // its size class, so the next same-size alloc reuses it.
        let reused = optics_alloc::alloc(&alloc_state, &region, 40).unwrap();
        assert_eq!(reused, payload_off);
    }

    #[test]
    fn drain_reclaims_every_queued_node() {
        let region = Region::create_anonymous(64).unwrap();
        let alloc_state = AllocState::new();
        let head = AtomicU64::new(0);

        let mut payloads = Vec::new();
        for _ in 0..5 {
            let off = optics_alloc::alloc(&alloc_state, &region, 16).unwrap();
            payloads.push(off);
            push(&alloc_state, &region, &head, off, 16).unwrap();
        }

        drain(&alloc_state, &region, &head).unwrap();
        assert_eq!(head.load(Ordering::Relaxed), 0);
    }
}
