//! MIPS reductions: maximum-inner-product search rewritten as nearest
//! neighbor by squared Euclidean distance over injected coordinates.
//!
//! Both sides are scaled by `sqrt(e2)` first. The repeated-quadratic form
//! appends `m_value` coordinates `0.5 - s`, squaring the running sum after
//! each; the spherical form appends the single coordinate
//! `sqrt(1 - |x * sqrt(e2)|^2)`.

/// Repeated-quadratic-injection squared Euclidean distance.
#[must_use]
pub fn mips_squared_euclidean_f32(
    lhs: &[f32],
    rhs: &[f32],
    dim: usize,
    m_value: usize,
    e2: f32,
) -> f32 {
    debug_assert!(lhs.len() >= dim && rhs.len() >= dim);
    let eta = e2.sqrt();

    let mut dist = 0.0f32;
    let mut squ_l = 0.0f32;
    let mut squ_r = 0.0f32;
    for i in 0..dim {
        let a = lhs[i] * eta;
        let b = rhs[i] * eta;
        squ_l += a * a;
        squ_r += b * b;
        let d = a - b;
        dist += d * d;
    }

    for _ in 0..m_value {
        let d = (0.5 - squ_l) - (0.5 - squ_r);
        dist += d * d;
        squ_l *= squ_l;
        squ_r *= squ_r;
    }

    dist
}

/// Spherical-injection squared Euclidean distance.
#[must_use]
pub fn mips_spherical_squared_euclidean_f32(lhs: &[f32], rhs: &[f32], dim: usize, e2: f32) -> f32 {
    debug_assert!(lhs.len() >= dim && rhs.len() >= dim);
    let eta = e2.sqrt();

    let mut dist = 0.0f32;
    let mut norm_l = 0.0f32;
    let mut norm_r = 0.0f32;
    for i in 0..dim {
        let a = lhs[i] * eta;
        let b = rhs[i] * eta;
        norm_l += a * a;
        norm_r += b * b;
        let d = a - b;
        dist += d * d;
    }

    let d = (1.0 - norm_l).sqrt() - (1.0 - norm_r).sqrt();
    dist + d * d
}

/// Batched repeated-quadratic injection over a column-major FP32 block.
///
/// Layout contract as in the plain distance matrices: with `m > 1`
/// coordinate `d` of sample `s` is `batch[d * m + s]`; output is
/// `out[q * m + s]`.
pub fn mips_squared_euclidean_matrix_f32(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    m_value: usize,
    e2: f32,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    debug_assert!(batch.len() >= m * dim);
    debug_assert!(queries.len() >= n * dim);
    debug_assert!(out.len() >= m * n);
    let eta = e2.sqrt();

    out[..m * n].fill(0.0);
    let mut batch_norms = vec![0.0f32; m];
    let mut query_norms = vec![0.0f32; n];
    for d in 0..dim {
        let col = &batch[d * m..d * m + m];
        for (s, bn) in batch_norms.iter_mut().enumerate() {
            let a = col[s] * eta;
            *bn += a * a;
        }
        for q in 0..n {
            let qv = queries[d * n + q] * eta;
            query_norms[q] += qv * qv;
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                let diff = col[s] * eta - qv;
                row[s] += diff * diff;
            }
        }
    }

    for _ in 0..m_value {
        for q in 0..n {
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                let d = (0.5 - batch_norms[s]) - (0.5 - query_norms[q]);
                row[s] += d * d;
            }
        }
        for v in &mut batch_norms {
            *v *= *v;
        }
        for v in &mut query_norms {
            *v *= *v;
        }
    }
}

/// Batched spherical injection over a column-major FP32 block.
pub fn mips_spherical_squared_euclidean_matrix_f32(
    batch: &[f32],
    queries: &[f32],
    dim: usize,
    e2: f32,
    m: usize,
    n: usize,
    out: &mut [f32],
) {
    debug_assert!(batch.len() >= m * dim);
    debug_assert!(queries.len() >= n * dim);
    debug_assert!(out.len() >= m * n);
    let eta = e2.sqrt();

    out[..m * n].fill(0.0);
    let mut batch_norms = vec![0.0f32; m];
    let mut query_norms = vec![0.0f32; n];
    for d in 0..dim {
        let col = &batch[d * m..d * m + m];
        for (s, bn) in batch_norms.iter_mut().enumerate() {
            let a = col[s] * eta;
            *bn += a * a;
        }
        for q in 0..n {
            let qv = queries[d * n + q] * eta;
            query_norms[q] += qv * qv;
            let row = &mut out[q * m..q * m + m];
            for s in 0..m {
                let diff = col[s] * eta - qv;
                row[s] += diff * diff;
            }
        }
    }

    for q in 0..n {
        let qs = (1.0 - query_norms[q]).sqrt();
        let row = &mut out[q * m..q * m + m];
        for s in 0..m {
            let d = (1.0 - batch_norms[s]).sqrt() - qs;
            row[s] += d * d;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::scalar::{squared_euclidean_f32, squared_norm2_f32};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Reference: materialize the injected vectors, then take plain SE.
    fn reference_repeated(lhs: &[f32], rhs: &[f32], m_value: usize, e2: f32) -> f32 {
        let eta = e2.sqrt();
        let inject = |v: &[f32]| -> Vec<f32> {
            let mut out: Vec<f32> = v.iter().map(|x| x * eta).collect();
            let mut squ = squared_norm2_f32(&out);
            for _ in 0..m_value {
                out.push(0.5 - squ);
                squ *= squ;
            }
            out
        };
        let a = inject(lhs);
        let b = inject(rhs);
        squared_euclidean_f32(&a, &b)
    }

    fn reference_spherical(lhs: &[f32], rhs: &[f32], e2: f32) -> f32 {
        let eta = e2.sqrt();
        let inject = |v: &[f32]| -> Vec<f32> {
            let mut out: Vec<f32> = v.iter().map(|x| x * eta).collect();
            let norm = squared_norm2_f32(&out);
            out.push((1.0 - norm).sqrt());
            out
        };
        let a = inject(lhs);
        let b = inject(rhs);
        squared_euclidean_f32(&a, &b)
    }

    #[test]
    fn test_repeated_injection_reducibility() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..50 {
            let dim = rng.gen_range(2..=128);
            let m_value = rng.gen_range(1..=4);
            let u_val: f32 = rng.gen_range(0.1..1.0);
            let lhs: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let rhs: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let e2 =
                u_val * u_val / squared_norm2_f32(&lhs).max(squared_norm2_f32(&rhs));

            let got = mips_squared_euclidean_f32(&lhs, &rhs, dim, m_value, e2);
            let want = reference_repeated(&lhs, &rhs, m_value, e2);
            assert!((got - want).abs() <= 1e-4, "dim={dim} got={got} want={want}");
        }
    }

    #[test]
    fn test_spherical_injection_reducibility() {
        let mut rng = StdRng::seed_from_u64(19);
        for _ in 0..50 {
            let dim = rng.gen_range(2..=128);
            let u_val: f32 = rng.gen_range(0.5..0.9);
            let lhs: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let rhs: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let e2 =
                u_val * u_val / squared_norm2_f32(&lhs).max(squared_norm2_f32(&rhs));

            let got = mips_spherical_squared_euclidean_f32(&lhs, &rhs, dim, e2);
            let want = reference_spherical(&lhs, &rhs, e2);
            assert!((got - want).abs() <= 1e-5, "dim={dim} got={got} want={want}");
        }
    }

    #[test]
    fn test_spherical_pinned_value() {
        // u = 0.68 against an L2 norm scale of 15.5, zeros vs the 0.0..1.0
        // ramp over 11 dims.
        let u_val = 0.68f32;
        let l2_norm = 15.5f32;
        let e2 = (u_val / l2_norm) * (u_val / l2_norm);
        let x = [0.0f32; 11];
        let y: Vec<f32> = (0..11).map(|i| i as f32 * 0.1).collect();

        let got = mips_spherical_squared_euclidean_f32(&x, &y, 11, e2);
        assert!((got - 0.00742372544).abs() <= f32::EPSILON, "got {got}");

        // Identical inputs collapse to zero.
        let z = mips_spherical_squared_euclidean_f32(&y, &y, 11, e2);
        assert!(z.abs() < f32::EPSILON);
    }

    #[test]
    fn test_batched_matches_pairwise() {
        let mut rng = StdRng::seed_from_u64(29);
        for &(m, n) in &[(1usize, 1usize), (2, 2), (4, 1), (8, 3)] {
            let dim = rng.gen_range(2..=64);
            let m_value = rng.gen_range(1..=4);
            let rows: Vec<f32> = (0..m * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let qrows: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let mut max_norm = 0.0f32;
            for s in 0..m {
                max_norm = max_norm.max(squared_norm2_f32(&rows[s * dim..(s + 1) * dim]));
            }
            for q in 0..n {
                max_norm = max_norm.max(squared_norm2_f32(&qrows[q * dim..(q + 1) * dim]));
            }
            let e2 = 0.6f32 * 0.6 / max_norm;

            // Column-major forms.
            let mut block = vec![0.0f32; m * dim];
            let mut qblock = vec![0.0f32; n * dim];
            for d in 0..dim {
                for s in 0..m {
                    block[d * m + s] = rows[s * dim + d];
                }
                for q in 0..n {
                    qblock[d * n + q] = qrows[q * dim + d];
                }
            }

            let mut out = vec![0.0f32; m * n];
            mips_squared_euclidean_matrix_f32(
                &block, &qblock, dim, m_value, e2, m, n, &mut out,
            );
            let mut sph = vec![0.0f32; m * n];
            mips_spherical_squared_euclidean_matrix_f32(&block, &qblock, dim, e2, m, n, &mut sph);

            for q in 0..n {
                for s in 0..m {
                    let a = &rows[s * dim..(s + 1) * dim];
                    let b = &qrows[q * dim..(q + 1) * dim];
                    let want = mips_squared_euclidean_f32(a, b, dim, m_value, e2);
                    assert!((out[q * m + s] - want).abs() <= 1e-4);
                    let want = mips_spherical_squared_euclidean_f32(a, b, dim, e2);
                    assert!((sph[q * m + s] - want).abs() <= 1e-4);
                }
            }
        }
    }
}
