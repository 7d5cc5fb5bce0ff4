//! Utility functions.

/// Aligns `value` up to the next multiple of `align`.
/// Alignments of 0 and 1 mean "unaligned".
pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Smallest value `>= min` that is congruent to `target` modulo `align`.
///
/// Loadable segments require `p_offset % p_align == p_vaddr % p_align`.
pub fn align_congruent(min: u64, target: u64, align: u64) -> u64 {
    if align <= 1 {
        return min;
    }
    let candidate = min - min % align + target % align;
    if candidate < min {
        candidate + align
    } else {
        candidate
    }
}
