//! Block transposition at align-unit granularity and the reorder sort used
//! to build the key mapping.

/// Interleaves `m` row-major vectors of `element_size` bytes into
/// column-major word order: unit word `w` of every vector becomes
/// contiguous.
///
/// `element_size` must be a multiple of `unit_size`; `dst` must hold
/// `m * element_size` bytes.
pub fn transpose(unit_size: usize, src: &[u8], m: usize, element_size: usize, dst: &mut [u8]) {
    debug_assert_eq!(element_size % unit_size, 0, "element not word-aligned");
    debug_assert!(src.len() >= m * element_size);
    debug_assert!(dst.len() >= m * element_size);

    let words = element_size / unit_size;
    for s in 0..m {
        for w in 0..words {
            let from = s * element_size + w * unit_size;
            let to = (w * m + s) * unit_size;
            dst[to..to + unit_size].copy_from_slice(&src[from..from + unit_size]);
        }
    }
}

/// Inverse of [`transpose`]: gathers column-major words back into `m`
/// row-major vectors.
pub fn reverse_transpose(
    unit_size: usize,
    src: &[u8],
    m: usize,
    element_size: usize,
    dst: &mut [u8],
) {
    debug_assert_eq!(element_size % unit_size, 0, "element not word-aligned");
    debug_assert!(src.len() >= m * element_size);
    debug_assert!(dst.len() >= m * element_size);

    let words = element_size / unit_size;
    for s in 0..m {
        for w in 0..words {
            let from = (w * m + s) * unit_size;
            let to = s * element_size + w * unit_size;
            dst[to..to + unit_size].copy_from_slice(&src[from..from + unit_size]);
        }
    }
}

/// Sorts `arr` ascending and returns the new-to-old index mapping: entry
/// `i` of the result names the original position of the `i`-th smallest
/// value.
pub fn sort_with_mapping<T: Ord + Copy>(arr: &mut [T]) -> Vec<u32> {
    #[allow(clippy::cast_possible_truncation)]
    let mut n2o: Vec<u32> = (0..arr.len() as u32).collect();
    n2o.sort_by_key(|&i| arr[i as usize]);

    let sorted: Vec<T> = n2o.iter().map(|&i| arr[i as usize]).collect();
    arr.copy_from_slice(&sorted);
    n2o
}
