//! Size-class slab allocator layered on an [`optics_region::Region`].
//!
//! * [`AllocState`] – the allocator's in-region state (embeddable in a
//!   region Header); contains only atomics and offsets, no process pointers.
//! * [`alloc`] / [`free`] – the allocator's two public operations.
//! * [`size_class`] – the size-class table and classification heuristic.

mod allocator;
pub mod size_class;

pub use allocator::{alloc, free, AllocState};
