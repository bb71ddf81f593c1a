//! Scalar reference kernels.
//!
//! Every SIMD kernel in this module tree has its semantics defined by the
//! functions here; the vectorized paths must agree to 1e-5 relative for FP32
//! and exactly for the integer element types. The scalar path also serves the
//! 1..7-element tails and architectures without SIMD.

/// `sum((a - b)^2)`
#[inline]
#[must_use]
pub fn squared_euclidean_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// `sum(|a - b|)`
#[inline]
#[must_use]
pub fn manhattan_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// `sum(a * b)`
#[inline]
#[must_use]
pub fn inner_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `sum(x^2)`
#[inline]
#[must_use]
pub fn squared_norm2_f32(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

// ---------------------------------------------------------------------------
// Batched matrix cores
// ---------------------------------------------------------------------------
//
// For `m > 1` the stored matrix is block-column-major: coordinate `d` holds
// the `m` samples contiguously at `batch[d * m..]`. Queries follow the same
// convention with `n`. With `m == 1` (or `n == 1`) the layout degenerates to
// row-major, so one core serves every enumerated specialization.

/// Batched `sum((a - b)^2)` producing `out[q * m + s]`.
pub fn squared_euclidean_matrix_core(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    debug_assert!(batch.len() >= m * dim);
    debug_assert!(queries.len() >= n * dim);
    debug_assert!(out.len() >= m * n);
    out[..m * n].fill(0.0);
    for d in 0..dim {
        let col = &batch[d * m..d * m + m];
        for q in 0..n {
            let qv = queries[d * n + q];
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                let diff = col[s] - qv;
                row[s] += diff * diff;
            }
        }
    }
}

/// Batched `sum(|a - b|)` producing `out[q * m + s]`.
pub fn manhattan_matrix_core(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    debug_assert!(batch.len() >= m * dim);
    debug_assert!(queries.len() >= n * dim);
    debug_assert!(out.len() >= m * n);
    out[..m * n].fill(0.0);
    for d in 0..dim {
        let col = &batch[d * m..d * m + m];
        for q in 0..n {
            let qv = queries[d * n + q];
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                row[s] += (col[s] - qv).abs();
            }
        }
    }
}

/// Batched `sum(a * b)` producing `out[q * m + s]`.
pub fn inner_product_matrix_core(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    debug_assert!(batch.len() >= m * dim);
    debug_assert!(queries.len() >= n * dim);
    debug_assert!(out.len() >= m * n);
    out[..m * n].fill(0.0);
    for d in 0..dim {
        let col = &batch[d * m..d * m + m];
        for q in 0..n {
            let qv = queries[d * n + q];
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                row[s] += col[s] * qv;
            }
        }
    }
}
