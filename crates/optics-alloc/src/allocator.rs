//! The size-class slab allocator layered on a [`Region`].

use crate::size_class::{classify, slab_bytes, CLASS_COUNT};
use optics_region::{Region, RegionResult};
use optics_support::Spinlock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-class bookkeeping: an `alloc` head mutated only under the allocator's
/// spinlock, and a lock-free `free` head freers CAS onto directly.
#[repr(C)]
struct AllocClass {
    alloc: AtomicU64,
    free: AtomicU64,
}

impl AllocClass {
    const fn new() -> Self {
        Self {
            alloc: AtomicU64::new(0),
            free: AtomicU64::new(0),
        }
    }
}

/// The allocator's entire state, embeddable directly in the region Header
/// since it contains no process-local pointers — only atomics and
/// region-relative offsets.
#[repr(C, align(8))]
pub struct AllocState {
    lock: Spinlock,
    classes: [AllocClass; CLASS_COUNT],
}

impl AllocState {
    pub const fn new() -> Self {
        const CLASS: AllocClass = AllocClass::new();
        Self {
            lock: Spinlock::new(),
            classes: [CLASS; CLASS_COUNT],
        }
    }
}

impl Default for AllocState {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocates `len` bytes (`len <= `[`crate::size_class::MAX_LEN`]) from
/// `region`, zero-filling the block on success.
pub fn alloc(state: &AllocState, region: &Region, len: usize) -> RegionResult<u64> {
    let (class, block_len) = classify(len);

    state.lock.lock();
    let mut head = state.classes[class].alloc.load(Ordering::Relaxed);

    if head == 0 {
        // Adopt the lock-free free list built up by concurrent `free`
        // callers. Acquire here pairs with the CAS-release in `free`, so
        // every next-pointer in the adopted chain is visible.
        head = state.classes[class].free.swap(0, Ordering::Acquire);
        state.classes[class].alloc.store(head, Ordering::Relaxed);
    }

    if head == 0 {
        state.lock.unlock();
        return fill_class(state, region, block_len, class);
    }

    let ptr = match region.ptr(head, block_len) {
        Ok(ptr) => ptr,
        Err(err) => {
            state.lock.unlock();
            return Err(err);
        }
    };
    // SAFETY: `ptr` was validated by `region.ptr` to address `block_len`
    // live bytes; the first 8 bytes of a free block are always its
    // next-pointer, written either here, by `fill_class`, or by `free`.
    let next = unsafe { std::ptr::read(ptr as *const u64) };
    debug_assert_ne!(next, head, "allocator free list must not self-reference");
    state.classes[class].alloc.store(next, Ordering::Relaxed);

    // SAFETY: `ptr` is exclusively owned by this call until it returns the
    // offset to its caller.
    unsafe { std::ptr::write_bytes(ptr, 0, block_len) };
    state.lock.unlock();

    Ok(head)
}

fn fill_class(state: &AllocState, region: &Region, block_len: usize, class: usize) -> RegionResult<u64> {
    let slab = slab_bytes(block_len);
    let start = region.grow(slab)?;
    let nodes = slab / block_len;
    debug_assert!(nodes > 2, "invalid node count: {nodes} <= 2");

    let block_len = block_len as u64;
    let end = start + nodes as u64 * block_len;

    let mut node = start + block_len;
    while node + block_len < end {
        let ptr = region.ptr(node, 8)?;
        // SAFETY: `ptr` addresses 8 fresh bytes just grown into the region.
        unsafe { std::ptr::write(ptr as *mut u64, node + block_len) };
        node += block_len;
    }

    let last_ptr = region.ptr(end - block_len, 8)?;

    state.lock.lock();
    let old_head = state.classes[class].alloc.load(Ordering::Relaxed);
    // SAFETY: `last_ptr` addresses 8 fresh bytes just grown into the region.
    unsafe { std::ptr::write(last_ptr as *mut u64, old_head) };
    state.classes[class].alloc.store(start + block_len, Ordering::Relaxed);
    state.lock.unlock();

    let first_ptr = region.ptr(start, block_len as usize)?;
    // SAFETY: `first_ptr` addresses `block_len` fresh bytes; zero-filling
    // satisfies `alloc`'s "zero-fills on success" contract for the first
    // block of a freshly filled slab, same as the pop-from-free-list path.
    unsafe { std::ptr::write_bytes(first_ptr, 0, block_len as usize) };

    Ok(start)
}

/// Returns `off`/`len` to the allocator's lock-free free list. Callable
/// from any thread context, including the poller's deferred-free drain —
/// never blocks behind the alloc-path spinlock.
pub fn free(state: &AllocState, region: &Region, off: u64, len: usize) {
    let (class, block_len) = classify(len);

    let ptr = match region.ptr(off, block_len) {
        Ok(ptr) => ptr,
        Err(_) => return,
    };

    #[cfg(debug_assertions)]
    // SAFETY: `ptr` addresses `block_len` live bytes owned by this call
    // until it is published onto the free list below.
    unsafe {
        std::ptr::write_bytes(ptr, 0xFF, block_len)
    };

    let head = &state.classes[class].free;
    let mut old = head.load(Ordering::Relaxed);
    loop {
        // SAFETY: same justification as the poisoning write above; this
        // overwrites the first 8 poisoned bytes with the free-list link.
        unsafe { std::ptr::write(ptr as *mut u64, old) };
        match head.compare_exchange_weak(old, off, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => old = actual,
        }
    }
}

/// Loom model of the free-list CAS protocol in isolation: a
/// release-publishing freer racing an acquire-adopting allocator must
/// never let the allocator observe a link chain shorter than the number of
/// successfully published frees. Mirrors the production `alloc`/`free`
/// ordering without going through a real `Region`, modeling just the
/// atomic protocol under `loom` rather than the full I/O-backed type.
#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use loom::sync::atomic::{AtomicU64, Ordering};
    use loom::sync::Arc;
    use loom::thread;

    struct FreeList {
        free: AtomicU64,
        // Pretend "memory": index 0 unused (0 means null), values are
        // next-links threaded the same way a real block's first 8 bytes are.
        links: [AtomicU64; 3],
    }

    #[test]
    #[ignore]
    fn slow_loom_free_list_adopts_every_published_node() {
        loom::model(|| {
            let list = Arc::new(FreeList {
                free: AtomicU64::new(0),
                links: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            });

            let producers: Vec<_> = (1..=2u64)
                .map(|node| {
                    let list = Arc::clone(&list);
                    thread::spawn(move || {
                        let mut old = list.free.load(Ordering::Relaxed);
                        loop {
                            list.links[node as usize].store(old, Ordering::Relaxed);
                            match list.free.compare_exchange_weak(
                                old,
                                node,
                                Ordering::Release,
                                Ordering::Relaxed,
                            ) {
                                Ok(_) => break,
                                Err(actual) => old = actual,
                            }
                        }
                    })
                })
                .collect();

            for p in producers {
                p.join().unwrap();
            }

            // Acquire-adopt: walk the chain and count nodes reached.
            let head = list.free.swap(0, Ordering::Acquire);
            let mut count = 0;
            let mut cur = head;
            while cur != 0 {
                count += 1;
                cur = list.links[cur as usize].load(Ordering::Relaxed);
            }
            assert_eq!(count, 2, "both published frees must be reachable from the adopted head");
        });
    }
}
