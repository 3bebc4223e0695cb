//! The growable, named shared-memory region.
//!
//! Follows a `SharedRegion`/`Backing` split (native `mmap` vs. a heap
//! fallback) generalized three ways: backing objects are named OS files
//! multiple processes can open concurrently (not anonymous), `grow` remaps
//! in place rather than allocating once up front, and every mapping ever
//! created is retained (never unmapped) until the region is closed.

use crate::error::{RegionError, RegionResult};
use crate::naming::object_path;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(target_arch = "wasm32"))]
type NativeMap = memmap2::MmapMut;

/// One mapping this region has ever owned. Old entries are kept purely to
/// extend their lifetime — producer threads may still hold derived pointers
/// into them — and are never consulted again once a newer entry is active.
enum Mapping {
    #[cfg(not(target_arch = "wasm32"))]
    Native(NativeMap),
    Owned {
        ptr: NonNull<u8>,
        layout: std::alloc::Layout,
    },
}

impl Mapping {
    fn as_ptr(&self) -> *const u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Mapping::Native(map) => map.as_ptr(),
            Mapping::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Mapping::Native(map) => map.as_mut_ptr(),
            Mapping::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }
}

// SAFETY: `Mapping::Owned`'s `NonNull<u8>` points at a heap allocation this
// type exclusively owns (tracked by `layout`) and is never aliased outside
// of the atomic `(ptr, len)` view published by `Region`; `memmap2::MmapMut`
// is already `Send + Sync`.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Mapping::Owned { ptr, layout } = self {
            // SAFETY: `ptr`/`layout` originate from `std::alloc::alloc` in
            // `heap_backing` below and are dropped at most once here.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

fn align_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

fn heap_backing(len: usize) -> RegionResult<(Mapping, usize)> {
    let align = page_size();
    let total = align_up(len.max(1), align);
    let layout = std::alloc::Layout::from_size_align(total, align)
        .map_err(|_| RegionError::InvalidAlignment { alignment: align })?;
    // SAFETY: `alloc_zeroed` returns either a valid pointer for `layout` or
    // null; checked immediately below.
    let raw = unsafe { std::alloc::alloc_zeroed(layout) };
    let ptr = NonNull::new(raw).ok_or(RegionError::GrowFailed {
        requested: total,
        source: io::Error::new(io::ErrorKind::OutOfMemory, "heap_backing allocation failed"),
    })?;
    Ok((Mapping::Owned { ptr, layout }, total))
}

/// Copies the first `copy_len` bytes of `old` into a fresh heap backing of
/// `new_len` bytes, zero-filling the remainder.
fn heap_backing_grown(old: &Mapping, copy_len: usize, new_len: usize) -> RegionResult<(Mapping, usize)> {
    let (mut new_mapping, total) = heap_backing(new_len)?;
    // SAFETY: `old` has at least `copy_len` readable bytes (its own mapped
    // length), `new_mapping` was just allocated with `total >= new_len >=
    // copy_len` bytes, and the two allocations cannot overlap.
    unsafe {
        std::ptr::copy_nonoverlapping(old.as_ptr(), new_mapping.as_mut_ptr(), copy_len);
    }
    Ok((new_mapping, total))
}

struct GrowState {
    /// Every mapping this region has ever owned, oldest first. The last
    /// entry is always the currently active one.
    mappings: Vec<Mapping>,
    /// Logical length (bytes) of the active mapping.
    len: usize,
}

/// A growable shared-memory region with a region-relative offset API.
///
/// Backed by a named `mmap`'d file when the platform supports it (so peers
/// can `open` the same region independently), falling back to a retained
/// heap allocation otherwise (used by `loom` models and by targets without
/// a shared file-mapping facility).
pub struct Region {
    name: String,
    file: Option<File>,
    ptr: AtomicPtr<u8>,
    len: AtomicUsize,
    grow: Mutex<GrowState>,
}

impl Region {
    /// Creates a new named region, unlinking any prior object of the same
    /// name first.
    pub fn create(name: &str, initial_len: usize) -> RegionResult<Self> {
        let path = object_path(name);
        let _ = std::fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| RegionError::CreateFailed {
                name: name.to_string(),
                source,
            })?;

        let total = align_up(initial_len.max(1), page_size());
        file.set_len(total as u64)
            .map_err(|source| RegionError::CreateFailed {
                name: name.to_string(),
                source,
            })?;

        let mapping = map_file(&file, total).map_err(|source| RegionError::CreateFailed {
            name: name.to_string(),
            source,
        })?;

        Ok(Self::from_initial(name.to_string(), Some(file), mapping, total))
    }

    /// Opens an existing named region at its current on-disk size.
    pub fn open(name: &str) -> RegionResult<Self> {
        let path = object_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| RegionError::OpenFailed {
                name: name.to_string(),
                source,
            })?;

        let total = file
            .metadata()
            .map_err(|source| RegionError::OpenFailed {
                name: name.to_string(),
                source,
            })?
            .len() as usize;

        let mapping = map_file(&file, total).map_err(|source| RegionError::OpenFailed {
            name: name.to_string(),
            source,
        })?;

        Ok(Self::from_initial(name.to_string(), Some(file), mapping, total))
    }

    /// Creates a heap-backed region with no OS-visible name, for tests and
    /// for `loom` models that must not touch the filesystem.
    pub fn create_anonymous(initial_len: usize) -> RegionResult<Self> {
        let (mapping, total) = heap_backing(initial_len)?;
        Ok(Self::from_initial(String::new(), None, mapping, total))
    }

    fn from_initial(name: String, file: Option<File>, mut mapping: Mapping, total: usize) -> Self {
        let ptr = mapping.as_mut_ptr();
        let region = Self {
            name,
            file,
            ptr: AtomicPtr::new(ptr),
            len: AtomicUsize::new(0),
            grow: Mutex::new(GrowState {
                mappings: Vec::new(),
                len: 0,
            }),
        };
        {
            let mut state = region.grow.lock();
            state.mappings.push(mapping);
            state.len = total;
        }
        // Publish ptr first (relaxed), then len with release, matching the
        // ordering discipline this type's readers rely on.
        region.ptr.store(ptr, Ordering::Relaxed);
        region.len.store(total, Ordering::Release);
        region
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the backing object for `name` from the shared-memory
    /// directory, without requiring an open `Region`.
    pub fn unlink(name: &str) -> io::Result<()> {
        match std::fs::remove_file(object_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Bytes currently mapped and addressable.
    pub fn mapped_len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Grows the region by at least `n_bytes` (page-aligned), returning the
    /// offset of the first newly-available byte.
    pub fn grow(&self, n_bytes: usize) -> RegionResult<u64> {
        let mut state = self.grow.lock();
        let old_len = state.len;
        let grow_by = align_up(n_bytes.max(1), page_size());
        let new_total = old_len + grow_by;

        let mut new_mapping = match &self.file {
            Some(file) => {
                file.set_len(new_total as u64)
                    .map_err(|source| RegionError::GrowFailed {
                        requested: n_bytes,
                        source,
                    })?;
                map_file(file, new_total).map_err(|source| RegionError::GrowFailed {
                    requested: n_bytes,
                    source,
                })?
            }
            None => {
                let old = state.mappings.last().expect("region always has a mapping");
                let (mapping, total) = heap_backing_grown(old, old_len, new_total)?;
                debug_assert_eq!(total, new_total);
                mapping
            }
        };

        let new_ptr = new_mapping.as_mut_ptr();
        state.mappings.push(new_mapping);
        state.len = new_total;
        drop(state);

        // Publish the new (ptr, len) pair: ptr relaxed, len release, so a
        // concurrent `ptr()` call either observes the old coherent pair or
        // the new one, never a fresh ptr paired with the old (smaller) len.
        self.ptr.store(new_ptr, Ordering::Relaxed);
        self.len.store(new_total, Ordering::Release);

        Ok(old_len as u64)
    }

    /// Resolves `(offset, len)` against the active mapping, returning the
    /// absolute address on success.
    pub fn ptr(&self, offset: u64, len: usize) -> RegionResult<*mut u8> {
        // Acquire on `len` first: if it observes the post-grow value, the
        // `ptr` relaxed load below is guaranteed (by `grow`'s store order)
        // to observe the matching new base, never a stale one.
        let mapped_len = self.len.load(Ordering::Acquire);
        let base = self.ptr.load(Ordering::Relaxed);

        let end = (offset as usize)
            .checked_add(len)
            .ok_or(RegionError::OutOfRegion {
                offset,
                len,
                mapped_len,
            })?;
        if end > mapped_len {
            return Err(RegionError::OutOfRegion {
                offset,
                len,
                mapped_len,
            });
        }

        // SAFETY: `end <= mapped_len` just established that `offset..offset
        // + len` lies within the `mapped_len`-byte allocation `base` points
        // at; the pointer is not dereferenced here, only computed.
        Ok(unsafe { base.add(offset as usize) })
    }

    /// Number of mappings retained so far (the active one plus every prior
    /// mapping kept alive across `grow` calls).
    pub fn retained_mapping_count(&self) -> usize {
        self.grow.lock().mappings.len()
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn map_file(file: &File, total: usize) -> io::Result<Mapping> {
    // SAFETY: the file is sized to at least `total` bytes immediately
    // before this call by every caller in this module.
    let map = unsafe { memmap2::MmapOptions::new().len(total).map_mut(file)? };
    Ok(Mapping::Native(map))
}

#[cfg(target_arch = "wasm32")]
fn map_file(_file: &File, _total: usize) -> io::Result<Mapping> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file-backed regions are unavailable on wasm32; use create_anonymous",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_shm_dir<R>(f: impl FnOnce() -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OPTICS_SHM_DIR", dir.path());
        let result = f();
        std::env::remove_var("OPTICS_SHM_DIR");
        result
    }

    #[test]
    fn create_then_open_see_the_same_bytes() {
        with_shm_dir(|| {
            let region = Region::create("t1", 64).unwrap();
            let p = region.ptr(0, 8).unwrap();
            // SAFETY: 8 bytes at offset 0 were validated by `ptr` above.
            unsafe { std::ptr::write(p as *mut u64, 0xdead_beef) };

            let opened = Region::open("t1").unwrap();
            let p2 = opened.ptr(0, 8).unwrap();
            // SAFETY: same as above.
            let value = unsafe { std::ptr::read(p2 as *const u64) };
            assert_eq!(value, 0xdead_beef);
        });
    }

    #[test]
    fn grow_preserves_prior_offsets() {
        let region = Region::create_anonymous(64).unwrap();
        let p0 = region.ptr(0, 8).unwrap();
        // SAFETY: validated above.
        unsafe { std::ptr::write(p0 as *mut u64, 42) };

        let new_offset = region.grow(4096).unwrap();
        assert!(new_offset >= 64);
        assert!(region.mapped_len() >= 64 + 4096);

        let p0_after = region.ptr(0, 8).unwrap();
        // SAFETY: validated above.
        let value = unsafe { std::ptr::read(p0_after as *const u64) };
        assert_eq!(value, 42, "bytes before the grow point must survive it");
    }

    #[test]
    fn ptr_rejects_out_of_region_access() {
        let region = Region::create_anonymous(64).unwrap();
        assert!(matches!(
            region.ptr(60, 16),
            Err(RegionError::OutOfRegion { .. })
        ));
    }

    #[test]
    fn retains_every_mapping_until_drop() {
        let region = Region::create_anonymous(64).unwrap();
        assert_eq!(region.retained_mapping_count(), 1);
        region.grow(4096).unwrap();
        region.grow(4096).unwrap();
        assert_eq!(region.retained_mapping_count(), 3);
    }
}
