//! The region header: a fixed layout at offset 0 holding the epoch, the
//! deferred-free list heads, the lens list head, the prefix/host/source
//! names, and the allocator state.

use crate::error::{OpticsError, OpticsResult};
use optics_alloc::AllocState;
use optics_region::Region;
use optics_support::NAME_MAX;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// `Header` is placed at region offset 0 and is shared, bit-for-bit, by
/// every process that maps the region. Every field's all-zero bit pattern
/// is a valid initial value (an empty name, a null list head, epoch 0, an
/// allocator with empty free lists), which is exactly what a freshly
/// truncated backing file already contains — no explicit construction
/// happens here, only validated pointer casts, the same discipline
/// `optics-lens`'s payloads use.
#[repr(C, align(8))]
pub struct Header {
    epoch: AtomicU64,
    last_inc: AtomicU64,
    defer: [AtomicU64; 2],
    lens_head: AtomicU64,
    prefix: [u8; NAME_MAX],
    host: [u8; NAME_MAX],
    source: [u8; NAME_MAX],
    alloc: AllocState,
}

impl Header {
    pub const LEN: usize = size_of::<Header>();

    /// Low bit of the current epoch (seq-cst fetch-add on increment, acquire
    /// load on read).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire) & 1
    }

    pub fn last_inc(&self) -> u64 {
        self.last_inc.load(Ordering::Relaxed)
    }

    pub fn defer_head(&self, epoch: usize) -> &AtomicU64 {
        &self.defer[epoch]
    }

    pub fn lens_head(&self) -> &AtomicU64 {
        &self.lens_head
    }

    pub fn alloc_state(&self) -> &AllocState {
        &self.alloc
    }

    pub fn prefix(&self) -> &str {
        read_name(&self.prefix)
    }

    pub fn host(&self) -> &str {
        read_name(&self.host)
    }

    pub fn source(&self) -> &str {
        read_name(&self.source)
    }

    /// Advances the epoch: drains the deferred-free list of the epoch about
    /// to go from inactive to active-then-inactive-again (the one
    /// guaranteed to have no live readers left), then fetch-adds the epoch
    /// counter and records `now` as the new `last_inc`. Returns the low bit
    /// of the epoch the call just made inactive (the one the poller should
    /// read) together with the `last_inc` timestamp that was in effect
    /// before this call — the moment that slot started accumulating, which
    /// the poller subtracts from `now` to get the slot's elapsed duration.
    pub fn epoch_inc(&self, region: &Region, now: u64) -> OpticsResult<(u64, u64)> {
        let currently_inactive = 1 - (self.epoch.load(Ordering::Acquire) & 1) as usize;
        optics_lens::drain_deferred(&self.alloc, region, &self.defer[currently_inactive])?;

        let window_start = self.last_inc.load(Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.last_inc.store(now, Ordering::Relaxed);

        let inactive_epoch = (self.epoch.load(Ordering::Acquire).wrapping_sub(1)) & 1;
        Ok((inactive_epoch, window_start))
    }

    fn set_name(&self, field: &[u8; NAME_MAX], value: &str) -> OpticsResult<()> {
        write_name(
            // SAFETY: `set_name` is only reachable through the facade's
            // opener-private lock, so this is the sole writer for the
            // duration of the call; the field's address is stable for the
            // life of the region.
            unsafe { &mut *(field as *const [u8; NAME_MAX] as *mut [u8; NAME_MAX]) },
            value,
        )
    }

    pub fn set_prefix(&self, value: &str) -> OpticsResult<()> {
        self.set_name(&self.prefix, value)
    }

    pub fn set_host(&self, value: &str) -> OpticsResult<()> {
        self.set_name(&self.host, value)
    }

    pub fn set_source(&self, value: &str) -> OpticsResult<()> {
        self.set_name(&self.source, value)
    }
}

fn read_name(field: &[u8; NAME_MAX]) -> &str {
    let len = field.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    std::str::from_utf8(&field[..len]).expect("names are always written as UTF-8")
}

fn write_name(field: &mut [u8; NAME_MAX], value: &str) -> OpticsResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= NAME_MAX {
        return Err(OpticsError::NameTooLong { name: value.to_string() });
    }
    field[..bytes.len()].copy_from_slice(bytes);
    field[bytes.len()] = 0;
    if bytes.len() + 1 < NAME_MAX {
        field[bytes.len() + 1..].fill(0);
    }
    Ok(())
}

/// Resolves region offset 0 to a validated `Header` pointer.
pub fn header_ptr(region: &Region) -> OpticsResult<*mut Header> {
    Ok(region.ptr(0, Header::LEN)? as *mut Header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optics_region::Region;

    fn new_region() -> Region {
        Region::create_anonymous(Header::LEN).unwrap()
    }

    #[test]
    fn freshly_mapped_header_is_all_zero() {
        let region = new_region();
        let ptr = header_ptr(&region).unwrap();
        // SAFETY: `header_ptr` validated this pointer.
        let header = unsafe { &*ptr };
        assert_eq!(header.epoch(), 0);
        assert_eq!(header.last_inc(), 0);
        assert_eq!(header.prefix(), "");
        assert_eq!(header.lens_head().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn set_then_get_names_round_trip() {
        let region = new_region();
        let ptr = header_ptr(&region).unwrap();
        // SAFETY: validated by `header_ptr`.
        let header = unsafe { &*ptr };
        header.set_prefix("svc").unwrap();
        header.set_host("box01").unwrap();
        header.set_source("ingest").unwrap();
        assert_eq!(header.prefix(), "svc");
        assert_eq!(header.host(), "box01");
        assert_eq!(header.source(), "ingest");
    }

    #[test]
    fn rejects_name_too_long() {
        let region = new_region();
        let ptr = header_ptr(&region).unwrap();
        // SAFETY: validated by `header_ptr`.
        let header = unsafe { &*ptr };
        let long_name = "x".repeat(NAME_MAX);
        assert!(header.set_prefix(&long_name).is_err());
    }

    #[test]
    fn epoch_inc_is_monotone_on_the_low_bit() {
        let region = new_region();
        let ptr = header_ptr(&region).unwrap();
        // SAFETY: validated by `header_ptr`.
        let header = unsafe { &*ptr };
        assert_eq!(header.epoch_inc(&region, 1).unwrap(), (0, 0));
        assert_eq!(header.epoch_inc(&region, 2).unwrap(), (1, 1));
        assert_eq!(header.epoch_inc(&region, 3).unwrap(), (0, 2));
        assert_eq!(header.last_inc(), 3);
    }
}
