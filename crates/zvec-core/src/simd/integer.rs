//! INT8 distance kernels.
//!
//! Intermediate sums widen to `i32` and convert to `f32` once at the end, so
//! batched and pairwise results agree exactly.

/// `sum((a - b)^2)` over signed bytes.
#[inline]
#[must_use]
pub fn squared_euclidean_i8(a: &[i8], b: &[i8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0i32;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = i32::from(*x) - i32::from(*y);
        acc += d * d;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        acc as f32
    }
}

/// `sum(a * b)` over signed bytes.
#[inline]
#[must_use]
pub fn inner_product_i8(a: &[i8], b: &[i8]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0i32;
    for (x, y) in a.iter().zip(b.iter()) {
        acc += i32::from(*x) * i32::from(*y);
    }
    #[allow(clippy::cast_precision_loss)]
    {
        acc as f32
    }
}

/// Batched `sum((a - b)^2)` over a column-major INT8 block.
///
/// With `m > 1` the block interleaves 4-byte words: word `w` of sample `s`
/// lives at `batch[(w * m + s) * 4..][..4]`, and `dim` must be a multiple
/// of 4. Queries follow the same convention with `n`. Output is
/// `out[q * m + s]`.
pub fn squared_euclidean_matrix_i8(
    batch: &[i8],
    queries: &[i8],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    if m == 1 && n == 1 {
        out[0] = squared_euclidean_i8(&batch[..dim], &queries[..dim]);
        return;
    }
    debug_assert_eq!(dim % 4, 0, "batched INT8 kernels need dim % 4 == 0");
    debug_assert!(out.len() >= m * n);

    let words = dim / 4;
    let mut acc = vec![0i32; m * n];
    for w in 0..words {
        for q in 0..n {
            let qw = &queries[(w * n + q) * 4..][..4];
            for s in 0..m {
                let bw = &batch[(w * m + s) * 4..][..4];
                let mut sum = 0i32;
                for k in 0..4 {
                    let d = i32::from(bw[k]) - i32::from(qw[k]);
                    sum += d * d;
                }
                acc[q * m + s] += sum;
            }
        }
    }
    #[allow(clippy::cast_precision_loss)]
    for (o, v) in out[..m * n].iter_mut().zip(acc.iter()) {
        *o = *v as f32;
    }
}

/// Batched `sum(a * b)` over a column-major INT8 block.
///
/// Layout contract as in [`squared_euclidean_matrix_i8`].
pub fn inner_product_matrix_i8(
    batch: &[i8],
    queries: &[i8],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    if m == 1 && n == 1 {
        out[0] = inner_product_i8(&batch[..dim], &queries[..dim]);
        return;
    }
    debug_assert_eq!(dim % 4, 0, "batched INT8 kernels need dim % 4 == 0");
    debug_assert!(out.len() >= m * n);

    let words = dim / 4;
    let mut acc = vec![0i32; m * n];
    for w in 0..words {
        for q in 0..n {
            let qw = &queries[(w * n + q) * 4..][..4];
            for s in 0..m {
                let bw = &batch[(w * m + s) * 4..][..4];
                let mut sum = 0i32;
                for k in 0..4 {
                    sum += i32::from(bw[k]) * i32::from(qw[k]);
                }
                acc[q * m + s] += sum;
            }
        }
    }
    #[allow(clippy::cast_precision_loss)]
    for (o, v) in out[..m * n].iter_mut().zip(acc.iter()) {
        *o = *v as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::transpose::transpose;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_repeated_extreme_pattern() {
        // The 16-value extreme pattern repeated to 32 dims: every lane
        // differs by 254 or 0, with 16 non-zero lanes in total.
        let pattern: [i8; 16] = [
            127, 127, 0, 0, -127, -127, 0, 0, 0, 0, 0, 0, -127, -127, 127, 127,
        ];
        let query_pattern: [i8; 16] = [
            -127, -127, 0, 0, 127, 127, 0, 0, 0, 0, 0, 0, 127, 127, -127, -127,
        ];
        let stored: Vec<i8> = pattern.iter().chain(pattern.iter()).copied().collect();
        let query: Vec<i8> = query_pattern
            .iter()
            .chain(query_pattern.iter())
            .copied()
            .collect();

        assert_eq!(squared_euclidean_i8(&stored, &query), 1_032_256.0);
    }

    #[test]
    fn test_batched_block_of_identical_rows() {
        let pattern: [i8; 16] = [
            127, 127, 0, 0, -127, -127, 0, 0, 0, 0, 0, 0, -127, -127, 127, 127,
        ];
        let query_pattern: [i8; 16] = [
            -127, -127, 0, 0, 127, 127, 0, 0, 0, 0, 0, 0, 127, 127, -127, -127,
        ];
        let m = 8;
        let dim = 32;
        let mut rows = Vec::with_capacity(m * dim);
        for _ in 0..m {
            rows.extend_from_slice(&pattern);
            rows.extend_from_slice(&pattern);
        }
        let query: Vec<i8> = query_pattern
            .iter()
            .chain(query_pattern.iter())
            .copied()
            .collect();

        // Interleave the rows into the 4-byte-word column-major block form.
        let mut block = vec![0i8; m * dim];
        transpose(4, bytemuck_cast(&rows), m, dim, bytemuck_cast_mut(&mut block));

        let mut out = vec![0.0f32; m];
        squared_euclidean_matrix_i8(&block, &query, dim, m, 1, &mut out);
        for v in out {
            assert_eq!(v, 1_032_256.0);
        }
    }

    #[test]
    fn test_batched_matches_pairwise_exactly() {
        let mut rng = StdRng::seed_from_u64(5);
        for &(m, n) in &[(2usize, 2usize), (4, 1), (8, 3), (16, 4), (3, 8)] {
            let dim = 4 * rng.gen_range(1..=32);
            let rows: Vec<i8> = (0..m * dim).map(|_| rng.gen_range(-127..=127)).collect();
            let qrows: Vec<i8> = (0..n * dim).map(|_| rng.gen_range(-127..=127)).collect();

            let mut block = vec![0i8; m * dim];
            transpose(4, bytemuck_cast(&rows), m, dim, bytemuck_cast_mut(&mut block));
            let mut qblock = vec![0i8; n * dim];
            transpose(4, bytemuck_cast(&qrows), n, dim, bytemuck_cast_mut(&mut qblock));

            let mut out = vec![0.0f32; m * n];
            squared_euclidean_matrix_i8(&block, &qblock, dim, m, n, &mut out);
            let mut ip_out = vec![0.0f32; m * n];
            inner_product_matrix_i8(&block, &qblock, dim, m, n, &mut ip_out);

            for q in 0..n {
                for s in 0..m {
                    let a = &rows[s * dim..(s + 1) * dim];
                    let b = &qrows[q * dim..(q + 1) * dim];
                    assert_eq!(out[q * m + s], squared_euclidean_i8(a, b));
                    assert_eq!(ip_out[q * m + s], inner_product_i8(a, b));
                }
            }
        }
    }

    fn bytemuck_cast(v: &[i8]) -> &[u8] {
        // SAFETY: i8 and u8 have identical layout.
        unsafe { std::slice::from_raw_parts(v.as_ptr().cast(), v.len()) }
    }

    fn bytemuck_cast_mut(v: &mut [i8]) -> &mut [u8] {
        // SAFETY: i8 and u8 have identical layout.
        unsafe { std::slice::from_raw_parts_mut(v.as_mut_ptr().cast(), v.len()) }
    }
}
