//! SIMD distance kernels.
//!
//! Produces `batch x query` float distance matrices for FP32, INT8 and
//! packed-INT4 elements, plus norms, MIPS injection reductions and a sparse
//! dot product.
//!
//! # Module structure
//!
//! - `scalar` — reference kernels and the generic batched cores
//! - `x86` — AVX2 (+FMA) and SSE2 kernels (x86_64 only)
//! - `neon` — ARM NEON kernels (aarch64 only)
//! - `integer` — INT8 kernels with exact `i32` accumulation
//! - `int4` — packed INT4 kernels and the 256-entry product table
//! - `mips` — repeated-quadratic and spherical injection reductions
//! - `sparse` — sparse dot product and its packed wire format
//!
//! # Batched layout
//!
//! With `m > 1` the stored matrix must be block-column-major at the element
//! type's align-unit granularity: unit word `w` of the `m` samples is
//! contiguous, then the next word follows. Queries use the same convention
//! with `n`. With `m == 1` (or `n == 1`) this degenerates to row-major, so
//! unbatched callers pass vectors unchanged. Results land at
//! `out[q * m + s]`.

pub mod scalar;

#[cfg(target_arch = "x86_64")]
mod x86;

#[cfg(target_arch = "aarch64")]
mod neon;

pub mod int4;
pub mod integer;
pub mod mips;
pub mod sparse;

pub use int4::{
    inner_product_i4, inner_product_matrix_i4, int4_hi, int4_lo, squared_euclidean_i4,
    squared_euclidean_matrix_i4, INT4_MUL_TABLE,
};
pub use integer::{
    inner_product_i8, inner_product_matrix_i8, squared_euclidean_i8, squared_euclidean_matrix_i8,
};
pub use mips::{
    mips_spherical_squared_euclidean_f32, mips_spherical_squared_euclidean_matrix_f32,
    mips_squared_euclidean_f32, mips_squared_euclidean_matrix_f32,
};
pub use sparse::{inner_product_sparse, inner_product_sparse_pairs, transform_sparse_format};

/// Largest batch/query count the matrix kernels accept per call.
pub const MAX_BATCH: usize = 128;

/// Batch/query sizes the kernels are specialized for; other sizes run the
/// generic core.
pub const SUPPORTED_BATCH_SIZES: [usize; 9] = [1, 2, 3, 4, 8, 16, 32, 64, 128];

// =============================================================================
// Runtime dispatch
// =============================================================================

/// SIMD capability level detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    /// AVX2 + FMA available (x86_64 only).
    Avx2,
    /// SSE2 baseline (x86_64 without AVX2).
    Sse2,
    /// NEON available (aarch64, always true).
    Neon,
    /// Portable scalar fallback.
    Scalar,
}

static SIMD_LEVEL: std::sync::OnceLock<SimdLevel> = std::sync::OnceLock::new();

fn detect_simd_level() -> SimdLevel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return SimdLevel::Avx2;
        }
        return SimdLevel::Sse2;
    }

    #[cfg(target_arch = "aarch64")]
    {
        return SimdLevel::Neon;
    }

    #[allow(unreachable_code)]
    SimdLevel::Scalar
}

/// Returns the cached SIMD capability level.
#[inline]
#[must_use]
pub fn simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(detect_simd_level)
}

// =============================================================================
// Pairwise FP32 kernels
// =============================================================================

/// `sum((a - b)^2)` with automatic dispatch.
///
/// # Panics
///
/// Panics when `a.len() != b.len()`.
#[inline]
#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: dispatch happens after simd_level() confirms AVX2+FMA.
        SimdLevel::Avx2 if a.len() >= 16 => unsafe { x86::squared_euclidean_avx2(a, b) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 | SimdLevel::Sse2 if a.len() >= 8 => x86::squared_euclidean_sse2(a, b),
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon if a.len() >= 4 => neon::squared_euclidean_neon(a, b),
        _ => scalar::squared_euclidean_f32(a, b),
    }
}

/// `sqrt(sum((a - b)^2))`
#[inline]
#[must_use]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// `sum(|a - b|)`
#[inline]
#[must_use]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");
    scalar::manhattan_f32(a, b)
}

/// `sum(a * b)` with automatic dispatch.
///
/// # Panics
///
/// Panics when `a.len() != b.len()`.
#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    match simd_level() {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: dispatch happens after simd_level() confirms AVX2+FMA.
        SimdLevel::Avx2 if a.len() >= 16 => unsafe { x86::inner_product_avx2(a, b) },
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 | SimdLevel::Sse2 if a.len() >= 8 => x86::inner_product_sse2(a, b),
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon if a.len() >= 4 => neon::inner_product_neon(a, b),
        _ => scalar::inner_product_f32(a, b),
    }
}

/// `-sum(a * b)`, so that smaller is better.
#[inline]
#[must_use]
pub fn minus_inner_product(a: &[f32], b: &[f32]) -> f32 {
    -inner_product(a, b)
}

/// `sum(x^2)`
#[inline]
#[must_use]
pub fn squared_norm2(v: &[f32]) -> f32 {
    scalar::squared_norm2_f32(v)
}

/// `sqrt(sum(x^2))`
#[inline]
#[must_use]
pub fn norm2(v: &[f32]) -> f32 {
    squared_norm2(v).sqrt()
}

// =============================================================================
// Batched FP32 matrices
// =============================================================================

#[inline]
fn check_matrix_args(m: usize, n: usize, out_len: usize) {
    assert!(m >= 1 && m <= MAX_BATCH, "batch size {m} out of range");
    assert!(n >= 1 && n <= MAX_BATCH, "query count {n} out of range");
    assert!(out_len >= m * n, "output buffer too small");
}

/// Batched `sum((a - b)^2)` producing `out[q * m + s]`.
pub fn squared_euclidean_matrix(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    check_matrix_args(m, n, out.len());

    #[cfg(target_arch = "x86_64")]
    if n == 1 && m % 8 == 0 && simd_level() == SimdLevel::Avx2 {
        // SAFETY: dispatch happens after simd_level() confirms AVX2+FMA, and
        // check_matrix_args plus the debug asserts in the kernel bound all
        // accesses.
        unsafe { x86::squared_euclidean_block_avx2(batch, queries, dim, m, out) };
        return;
    }

    scalar::squared_euclidean_matrix_core(batch, queries, dim, m, n, out);
}

/// Batched `sqrt(sum((a - b)^2))`.
pub fn euclidean_matrix(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    squared_euclidean_matrix(batch, queries, dim, m, n, out);
    for v in &mut out[..m * n] {
        *v = v.sqrt();
    }
}

/// Batched `sum(|a - b|)`.
pub fn manhattan_matrix(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    check_matrix_args(m, n, out.len());
    scalar::manhattan_matrix_core(batch, queries, dim, m, n, out);
}

/// Batched `sum(a * b)`.
pub fn inner_product_matrix(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    check_matrix_args(m, n, out.len());

    #[cfg(target_arch = "x86_64")]
    if n == 1 && m % 8 == 0 && simd_level() == SimdLevel::Avx2 {
        // SAFETY: see squared_euclidean_matrix.
        unsafe { x86::inner_product_block_avx2(batch, queries, dim, m, out) };
        return;
    }

    scalar::inner_product_matrix_core(batch, queries, dim, m, n, out);
}

/// Batched `-sum(a * b)`.
pub fn minus_inner_product_matrix(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    inner_product_matrix(batch, queries, dim, m, n, out);
    for v in &mut out[..m * n] {
        *v = -*v;
    }
}
