/// Smallest allocation, also the boundary of the singleton class.
pub const MIN_LEN: usize = 8;
/// Step size for the mid-range classes (`]8, 256]`).
const MID_INC: usize = 16;
/// Upper bound of the mid-range, and the lower bound of the power-of-two range.
const MID_LEN: usize = 256;
/// Largest allocation the allocator will ever serve directly.
pub const MAX_LEN: usize = 4096;

/// `1` singleton class, `16` mid-range classes stepping by [`MID_INC`], `4`
/// power-of-two classes — 21 total.
pub const CLASS_COUNT: usize = 1 + (MID_LEN / MID_INC) + 4;

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Classifies `len` (which must be `<= MAX_LEN`) into its size class,
/// returning `(class_index, rounded_block_len)`. The heuristic — mid-range
/// by 16-byte increments, large range by power of two — trades a little
/// fragmentation in the mid-range for fewer size classes overall.
pub fn classify(len: usize) -> (usize, usize) {
    assert!(len <= MAX_LEN, "alloc size too big: {len} > {MAX_LEN}");

    if len <= MIN_LEN {
        return (0, MIN_LEN);
    }

    if len <= MID_LEN {
        let class = ceil_div(len, MID_INC);
        debug_assert!(class < CLASS_COUNT);
        return (class, class * MID_INC);
    }

    let rounded = len.next_power_of_two();
    let bits = rounded.trailing_zeros() - MID_LEN.trailing_zeros();
    let class = bits as usize + (MID_LEN / MID_INC);
    debug_assert!(class < CLASS_COUNT);
    (class, rounded)
}

/// Bytes to grow the region by when a class's free lists are both empty:
/// larger multiplier for small blocks (less mmap churn), smaller for large
/// blocks (less wasted slab space).
pub fn slab_bytes(block_len: usize) -> usize {
    block_len * if block_len <= MID_LEN { 256 } else { 16 }
}
