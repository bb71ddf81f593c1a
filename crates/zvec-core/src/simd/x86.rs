//! AVX2 and SSE2 kernel implementations for x86_64.
//!
//! AVX2 kernels require runtime detection before calling; SSE2 is part of the
//! x86_64 baseline and needs none.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_panics_doc)]

// =============================================================================
// AVX2 pairwise kernels
// =============================================================================

/// AVX2 squared L2 distance with 2 accumulators for ILP.
///
/// # Safety
///
/// Caller must ensure the CPU supports AVX2+FMA (enforced by
/// `#[target_feature]` and runtime detection) and `a.len() == b.len()`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub(crate) unsafe fn squared_euclidean_avx2(a: &[f32], b: &[f32]) -> f32 {
    // SAFETY: Called only after runtime feature detection confirms AVX2+FMA.
    // - `_mm256_loadu_ps` handles unaligned loads
    // - Pointer arithmetic stays within bounds: offset = i * 16, i < len / 16
    use std::arch::x86_64::*;

    let len = a.len();
    let simd_len = len / 16;

    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..simd_len {
        let offset = i * 16;
        let va0 = _mm256_loadu_ps(a_ptr.add(offset));
        let vb0 = _mm256_loadu_ps(b_ptr.add(offset));
        let diff0 = _mm256_sub_ps(va0, vb0);
        sum0 = _mm256_fmadd_ps(diff0, diff0, sum0);

        let va1 = _mm256_loadu_ps(a_ptr.add(offset + 8));
        let vb1 = _mm256_loadu_ps(b_ptr.add(offset + 8));
        let diff1 = _mm256_sub_ps(va1, vb1);
        sum1 = _mm256_fmadd_ps(diff1, diff1, sum1);
    }

    let combined = _mm256_add_ps(sum0, sum1);
    let mut result = horizontal_sum_avx2(combined);

    let base = simd_len * 16;
    for i in base..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        result += d * d;
    }

    result
}

/// AVX2 dot product with 2 accumulators.
///
/// # Safety
///
/// Same requirements as [`squared_euclidean_avx2`].
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub(crate) unsafe fn inner_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    // SAFETY: See squared_euclidean_avx2.
    use std::arch::x86_64::*;

    let len = a.len();
    let simd_len = len / 16;

    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..simd_len {
        let offset = i * 16;
        let va0 = _mm256_loadu_ps(a_ptr.add(offset));
        let vb0 = _mm256_loadu_ps(b_ptr.add(offset));
        sum0 = _mm256_fmadd_ps(va0, vb0, sum0);

        let va1 = _mm256_loadu_ps(a_ptr.add(offset + 8));
        let vb1 = _mm256_loadu_ps(b_ptr.add(offset + 8));
        sum1 = _mm256_fmadd_ps(va1, vb1, sum1);
    }

    let combined = _mm256_add_ps(sum0, sum1);
    let mut result = horizontal_sum_avx2(combined);

    let base = simd_len * 16;
    for i in base..len {
        result += *a_ptr.add(i) * *b_ptr.add(i);
    }

    result
}

/// Horizontal sum of an 8-lane register into a scalar.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn horizontal_sum_avx2(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let hi = _mm256_extractf128_ps(v, 1);
    let lo = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    _mm_cvtss_f32(_mm_add_ss(sums, shuf2))
}

// =============================================================================
// AVX2 batched kernels (single-query column-major blocks)
// =============================================================================

/// AVX2 batched squared L2 over a column-major block against one query.
///
/// `batch[d * m + s]` holds coordinate `d` of sample `s`; `m` must be a
/// multiple of 8.
///
/// # Safety
///
/// Caller must ensure AVX2+FMA support, `batch.len() >= m * dim`,
/// `query.len() >= dim`, `out.len() >= m` and `m % 8 == 0`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn squared_euclidean_block_avx2(
    batch: &[f32],
    query: &[f32],
    dim: usize,
    m: usize,
    out: &mut [f32],
) {
    // SAFETY: Called after runtime detection; lanes = m / 8 AVX registers per
    // coordinate column, all loads within batch[d * m .. (d + 1) * m].
    use std::arch::x86_64::*;

    debug_assert!(batch.len() >= m * dim && query.len() >= dim && out.len() >= m);

    let lanes = m / 8;
    let out_ptr = out.as_mut_ptr();
    for l in 0..lanes {
        _mm256_storeu_ps(out_ptr.add(l * 8), _mm256_setzero_ps());
    }

    let batch_ptr = batch.as_ptr();
    for d in 0..dim {
        let qv = _mm256_set1_ps(*query.get_unchecked(d));
        let col = batch_ptr.add(d * m);
        for l in 0..lanes {
            let acc = _mm256_loadu_ps(out_ptr.add(l * 8));
            let bv = _mm256_loadu_ps(col.add(l * 8));
            let diff = _mm256_sub_ps(bv, qv);
            _mm256_storeu_ps(out_ptr.add(l * 8), _mm256_fmadd_ps(diff, diff, acc));
        }
    }
}

/// AVX2 batched dot product over a column-major block against one query.
///
/// # Safety
///
/// Same requirements as [`squared_euclidean_block_avx2`].
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn inner_product_block_avx2(
    batch: &[f32],
    query: &[f32],
    dim: usize,
    m: usize,
    out: &mut [f32],
) {
    // SAFETY: See squared_euclidean_block_avx2.
    use std::arch::x86_64::*;

    debug_assert!(batch.len() >= m * dim && query.len() >= dim && out.len() >= m);

    let lanes = m / 8;
    let out_ptr = out.as_mut_ptr();
    for l in 0..lanes {
        _mm256_storeu_ps(out_ptr.add(l * 8), _mm256_setzero_ps());
    }

    let batch_ptr = batch.as_ptr();
    for d in 0..dim {
        let qv = _mm256_set1_ps(*query.get_unchecked(d));
        let col = batch_ptr.add(d * m);
        for l in 0..lanes {
            let acc = _mm256_loadu_ps(out_ptr.add(l * 8));
            let bv = _mm256_loadu_ps(col.add(l * 8));
            _mm256_storeu_ps(out_ptr.add(l * 8), _mm256_fmadd_ps(bv, qv, acc));
        }
    }
}

// =============================================================================
// SSE2 pairwise kernels (x86_64 baseline, no detection needed)
// =============================================================================

/// SSE2 squared L2 distance.
#[cfg(target_arch = "x86_64")]
#[inline]
pub(crate) fn squared_euclidean_sse2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let simd_len = len / 4;

    // SAFETY: SSE2 is part of the x86_64 baseline; `_mm_loadu_ps` permits
    // unaligned loads and offsets stay below simd_len * 4 <= len.
    unsafe {
        let mut sum = _mm_setzero_ps();
        let a_ptr = a.as_ptr();
        let b_ptr = b.as_ptr();

        for i in 0..simd_len {
            let offset = i * 4;
            let va = _mm_loadu_ps(a_ptr.add(offset));
            let vb = _mm_loadu_ps(b_ptr.add(offset));
            let diff = _mm_sub_ps(va, vb);
            sum = _mm_add_ps(sum, _mm_mul_ps(diff, diff));
        }

        let shuf = _mm_movehl_ps(sum, sum);
        let sums = _mm_add_ps(sum, shuf);
        let shuf2 = _mm_shuffle_ps(sums, sums, 0b01);
        let mut result = _mm_cvtss_f32(_mm_add_ss(sums, shuf2));

        for i in simd_len * 4..len {
            let d = a[i] - b[i];
            result += d * d;
        }

        result
    }
}

/// SSE2 dot product.
#[cfg(target_arch = "x86_64")]
#[inline]
pub(crate) fn inner_product_sse2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let simd_len = len / 4;

    // SAFETY: SSE2 baseline; bounds as in squared_euclidean_sse2.
    unsafe {
        let mut sum = _mm_setzero_ps();
        let a_ptr = a.as_ptr();
        let b_ptr = b.as_ptr();

        for i in 0..simd_len {
            let offset = i * 4;
            let va = _mm_loadu_ps(a_ptr.add(offset));
            let vb = _mm_loadu_ps(b_ptr.add(offset));
            sum = _mm_add_ps(sum, _mm_mul_ps(va, vb));
        }

        let shuf = _mm_movehl_ps(sum, sum);
        let sums = _mm_add_ps(sum, shuf);
        let shuf2 = _mm_shuffle_ps(sums, sums, 0b01);
        let mut result = _mm_cvtss_f32(_mm_add_ss(sums, shuf2));

        for i in simd_len * 4..len {
            result += a[i] * b[i];
        }

        result
    }
}
