//! Hand-rolled primitives underpinning the optics shared-memory substrate.
//!
//! Every type here exists because a higher layer's testable properties pin
//! down its exact behavior (a specific PRNG family, a fixed-capacity
//! dot-joining key buffer, an open-addressed table with a named
//! distribution-quality bar) rather than because `std` or a crate lacks a
//! generic equivalent. Reaching for `std::collections::HashMap` or the
//! `rand` crate here would silently change the algorithm the rest of the
//! workspace is tested against.
//!
//! * [`Key`] – bounded, dot-joining path buffer used to build delivery keys.
//! * [`Buffer`] – growable byte vector with doubling capacity.
//! * [`Htable`] – open-addressed `name -> u64` index.
//! * [`Rng`] – thread-local xorshift PRNG.
//! * [`time`] – monotonic/coarse-realtime clock helpers.
//! * [`Spinlock`] / [`SpinBarrier`] – CAS-based mutual exclusion primitives.

mod buffer;
mod htable;
mod key;
mod lock;
mod rng;
pub mod time;

pub use buffer::Buffer;
pub use htable::Htable;
pub use key::Key;
pub use lock::{SpinBarrier, Spinlock};
pub use rng::{gen, gen_prob, gen_range, Rng};

/// Maximum length (including the trailing NUL) of a name field such as
/// prefix, host, or source.
pub const NAME_MAX: usize = 256;
