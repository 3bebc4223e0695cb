//! The `Optics` region facade: creates/opens a region, drives the two-slot
//! epoch, and owns the process-private name index kept in sync with the
//! in-region intrusive lens list.

use crate::error::{OpticsError, OpticsResult};
use crate::header::{self, Header};
use optics_lens::{LensHeader, LensType};
use optics_region::Region;
use optics_support::Htable;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// A process's handle onto a shared-memory metrics region.
///
/// The opener-private lock (`index`, a process-local [`Mutex`]) is never
/// shared across processes — every interaction with the region's mutable
/// structure flows through an explicit `Optics` handle; there is no global
/// mutable state. Each opener rebuilds its own name index by
/// walking the in-region list on open; only the process that calls
/// `lens_create`/`lens_free` through *this* handle keeps that index
/// synchronized, so a region's lens list should have exactly one writer
/// process at a time (a poller only ever reads).
pub struct Optics {
    region: Region,
    index: Mutex<Htable>,
}

impl Optics {
    /// Creates a new region (unlinking any prior object of the same name)
    /// and zero-initializes its header.
    pub fn create(name: &str) -> OpticsResult<Self> {
        let region = Region::create(name, Header::LEN)?;
        Ok(Self {
            region,
            index: Mutex::new(Htable::new()),
        })
    }

    /// Opens an existing region and rebuilds the process-private name index
    /// by walking the in-region lens list.
    pub fn open(name: &str) -> OpticsResult<Self> {
        let region = Region::open(name)?;
        let optics = Self {
            region,
            index: Mutex::new(Htable::new()),
        };

        let mut index = optics.index.lock();
        let mut off = optics.header().lens_head().load(Ordering::Acquire);
        while off != 0 {
            let h = optics_lens::header_ptr(&optics.region, off)?;
            // SAFETY: `header_ptr` validated this pointer.
            let (name, next) = unsafe { ((*h).name().to_string(), (*h).next()) };
            index.put(&name, off);
            off = next;
        }
        drop(index);

        Ok(optics)
    }

    /// Creates a heap-backed region for tests, skipping the filesystem.
    pub fn create_anonymous() -> OpticsResult<Self> {
        let region = Region::create_anonymous(Header::LEN)?;
        Ok(Self {
            region,
            index: Mutex::new(Htable::new()),
        })
    }

    /// Removes a region's backing object without needing it open.
    pub fn unlink(name: &str) -> OpticsResult<()> {
        Region::unlink(name).map_err(|source| {
            OpticsError::Region(optics_region::RegionError::OpenFailed { name: name.to_string(), source })
        })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    fn header(&self) -> &Header {
        // SAFETY: `header::header_ptr` is called once at construction time
        // by `create`/`open`/`create_anonymous` via `Region::create`'s
        // `Header::LEN`-sized initial allocation, so offset 0 always holds a
        // validated `Header` for the lifetime of `self.region`.
        unsafe { &*header::header_ptr(&self.region).expect("region was not created with a valid header") }
    }

    pub fn prefix(&self) -> &str {
        self.header().prefix()
    }

    pub fn set_prefix(&self, value: &str) -> OpticsResult<()> {
        self.header().set_prefix(value)
    }

    pub fn host(&self) -> &str {
        self.header().host()
    }

    pub fn set_host(&self, value: &str) -> OpticsResult<()> {
        self.header().set_host(value)
    }

    /// Sets the host name from the local machine's hostname.
    pub fn set_default_host(&self) -> OpticsResult<()> {
        let hostname = hostname()?;
        self.set_host(&hostname)
    }

    pub fn source(&self) -> &str {
        self.header().source()
    }

    pub fn set_source(&self, value: &str) -> OpticsResult<()> {
        self.header().set_source(value)
    }

    /// Current epoch's low bit.
    pub fn epoch(&self) -> u64 {
        self.header().epoch()
    }

    /// Advances the epoch, returning the now-inactive epoch the poller
    /// should read. Uses the wall-clock second as `now`.
    pub fn epoch_inc(&self) -> OpticsResult<(u64, u64)> {
        self.epoch_inc_at(now_seconds())
    }

    /// Advances the epoch at the given timestamp, returning the now-inactive
    /// epoch together with the `last_inc` that was in effect before the
    /// call — the start of the window the poller is about to read.
    pub fn epoch_inc_at(&self, now: u64) -> OpticsResult<(u64, u64)> {
        self.header().epoch_inc(&self.region, now)
    }

    pub fn last_inc(&self) -> u64 {
        self.header().last_inc()
    }

    /// Allocates a lens of `lens_type` under `name`, errors with
    /// `DuplicateKey` if the name is already registered.
    pub fn lens_create(&self, name: &str, lens_type: LensType, payload_len: usize) -> OpticsResult<u64> {
        let mut index = self.index.lock();
        if index.get(name).is_some() {
            return Err(OpticsError::DuplicateKey { name: name.to_string() });
        }
        Ok(self.link_new_lens(&mut index, name, lens_type, payload_len)?)
    }

    /// Allocates a lens under `name`, or returns the offset of the existing
    /// one if the name is already registered, discarding the redundant
    /// allocation.
    pub fn lens_create_or_get(&self, name: &str, lens_type: LensType, payload_len: usize) -> OpticsResult<u64> {
        let mut index = self.index.lock();
        if let Some(existing) = index.get(name) {
            return Ok(existing);
        }
        self.link_new_lens(&mut index, name, lens_type, payload_len)
    }

    fn link_new_lens(
        &self,
        index: &mut Htable,
        name: &str,
        lens_type: LensType,
        payload_len: usize,
    ) -> OpticsResult<u64> {
        let off = optics_lens::alloc(self.header().alloc_state(), &self.region, lens_type, payload_len, name)?;
        let new_header = optics_lens::header_ptr(&self.region, off)?;

        let old_head = self.header().lens_head().load(Ordering::Relaxed);
        optics_lens::set_next(&self.region, new_header, old_head)?;
        self.header().lens_head().store(off, Ordering::Release);

        index.put(name, off);
        Ok(off)
    }

    /// Looks up a lens's offset by name in this opener's process-private
    /// index, without touching the region.
    pub fn lens_get(&self, name: &str) -> Option<u64> {
        self.index.lock().get(name)
    }

    /// Unlinks a lens from the list, removes it from the index, and queues
    /// its bytes for deferred free rather than freeing them immediately, so
    /// a concurrent poller mid-traversal never dereferences reclaimed
    /// memory.
    pub fn lens_free(&self, name: &str) -> OpticsResult<()> {
        let mut index = self.index.lock();
        let off = index
            .del(name)
            .ok_or_else(|| OpticsError::InvalidArgument { reason: format!("no lens named '{name}'") })?;

        let target = optics_lens::header_ptr(&self.region, off)?;
        // SAFETY: `header_ptr` validated this pointer.
        let prev_off = unsafe { (*target).prev() };
        let next_off = unsafe { (*target).next() };
        if prev_off == 0 {
            self.header().lens_head().store(next_off, Ordering::Release);
        }
        optics_lens::kill(&self.region, target)?;

        let epoch = self.epoch() as usize;
        optics_lens::deferred_free(self.header().alloc_state(), &self.region, self.header().defer_head(epoch), off)?;
        Ok(())
    }

    /// Lock-free traversal of the intrusive lens list: loads the head with
    /// acquire, then walks `next` with relaxed loads. `f` receives each
    /// lens's self-offset and header pointer.
    pub fn foreach_lens(&self, mut f: impl FnMut(u64, *mut LensHeader)) -> OpticsResult<()> {
        let mut off = self.header().lens_head().load(Ordering::Acquire);
        while off != 0 {
            let h = optics_lens::header_ptr(&self.region, off)?;
            f(off, h);
            // SAFETY: `header_ptr` validated this pointer.
            off = unsafe { (*h).next() };
        }
        Ok(())
    }
}

#[cfg(unix)]
fn hostname() -> OpticsResult<String> {
    let mut buf = vec![0u8; 256];
    // SAFETY: `buf` is a valid, writable 256-byte buffer; `gethostname`
    // writes at most that many bytes including the terminator.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(OpticsError::InvalidArgument { reason: "gethostname failed".to_string() });
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(not(unix))]
fn hostname() -> OpticsResult<String> {
    Ok("localhost".to_string())
}
