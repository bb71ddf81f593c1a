//! Batched-vs-scalar agreement across the supported size matrix.

use rand::{rngs::StdRng, Rng, SeedableRng};

use zvec_core::ivf::transpose::transpose;
use zvec_core::simd;

fn transpose_rows_f32(rows: &[f32], count: usize, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; count * dim];
    for d in 0..dim {
        for s in 0..count {
            out[d * count + s] = rows[s * dim + d];
        }
    }
    out
}

#[test]
fn test_fp32_matrix_agrees_with_scalar_kernel() {
    let mut rng = StdRng::seed_from_u64(101);
    let sizes = simd::SUPPORTED_BATCH_SIZES;

    for round in 0..50 {
        let m = sizes[round % sizes.len()];
        let n = sizes[(round / sizes.len() + round) % sizes.len()];
        let dim = rng.gen_range(1..=260);

        let rows: Vec<f32> = (0..m * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let qrows: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let block = transpose_rows_f32(&rows, m, dim);
        let qblock = transpose_rows_f32(&qrows, n, dim);

        let mut se = vec![0.0f32; m * n];
        simd::squared_euclidean_matrix(&block, &qblock, dim, m, n, &mut se);
        let mut ip = vec![0.0f32; m * n];
        simd::inner_product_matrix(&block, &qblock, dim, m, n, &mut ip);

        for q in 0..n {
            for s in 0..m {
                let a = &rows[s * dim..(s + 1) * dim];
                let b = &qrows[q * dim..(q + 1) * dim];
                let mut want = [0.0f32];
                simd::squared_euclidean_matrix(a, b, dim, 1, 1, &mut want);
                assert!(
                    (se[q * m + s] - want[0]).abs() <= 1e-5 * want[0].abs().max(1.0),
                    "SE m={m} n={n} dim={dim}"
                );
                simd::inner_product_matrix(a, b, dim, 1, 1, &mut want);
                assert!(
                    (ip[q * m + s] - want[0]).abs() <= 1e-5 * want[0].abs().max(1.0),
                    "IP m={m} n={n} dim={dim}"
                );
            }
        }
    }
}

#[test]
fn test_int8_matrix_agrees_exactly() {
    let mut rng = StdRng::seed_from_u64(103);
    let sizes = simd::SUPPORTED_BATCH_SIZES;

    for round in 0..50 {
        let m = sizes[round % sizes.len()];
        let n = sizes[(round + 3) % sizes.len()];
        let dim = 4 * rng.gen_range(1..=64);

        let rows: Vec<i8> = (0..m * dim).map(|_| rng.gen_range(-127..=127)).collect();
        let qrows: Vec<i8> = (0..n * dim).map(|_| rng.gen_range(-127..=127)).collect();

        let mut block = vec![0u8; m * dim];
        transpose(4, cast_bytes(&rows), m, dim, &mut block);
        let mut qblock = vec![0u8; n * dim];
        transpose(4, cast_bytes(&qrows), n, dim, &mut qblock);

        let mut se = vec![0.0f32; m * n];
        simd::squared_euclidean_matrix_i8(cast_i8(&block), cast_i8(&qblock), dim, m, n, &mut se);
        let mut ip = vec![0.0f32; m * n];
        simd::inner_product_matrix_i8(cast_i8(&block), cast_i8(&qblock), dim, m, n, &mut ip);

        for q in 0..n {
            for s in 0..m {
                let a = &rows[s * dim..(s + 1) * dim];
                let b = &qrows[q * dim..(q + 1) * dim];
                assert_eq!(se[q * m + s], simd::squared_euclidean_i8(a, b));
                assert_eq!(ip[q * m + s], simd::inner_product_i8(a, b));
            }
        }
    }
}

#[test]
fn test_int4_matrix_agrees_exactly() {
    let mut rng = StdRng::seed_from_u64(107);

    for &(m, n) in &[(1usize, 1usize), (2, 2), (4, 8), (8, 1), (16, 3), (32, 2), (64, 1)] {
        let dim = 8 * rng.gen_range(1..=32);
        let bytes = dim / 2;
        let rows: Vec<u8> = (0..m * bytes).map(|_| rng.gen()).collect();
        let qrows: Vec<u8> = (0..n * bytes).map(|_| rng.gen()).collect();

        let mut block = vec![0u8; m * bytes];
        transpose(4, &rows, m, bytes, &mut block);
        let mut qblock = vec![0u8; n * bytes];
        transpose(4, &qrows, n, bytes, &mut qblock);

        let mut se = vec![0.0f32; m * n];
        simd::squared_euclidean_matrix_i4(&block, &qblock, dim, m, n, &mut se);
        let mut ip = vec![0.0f32; m * n];
        simd::inner_product_matrix_i4(&block, &qblock, dim, m, n, &mut ip);

        for q in 0..n {
            for s in 0..m {
                let a = &rows[s * bytes..(s + 1) * bytes];
                let b = &qrows[q * bytes..(q + 1) * bytes];
                assert_eq!(se[q * m + s], simd::squared_euclidean_i4(a, b, dim));
                assert_eq!(ip[q * m + s], simd::inner_product_i4(a, b, dim));
            }
        }
    }
}

fn cast_bytes(v: &[i8]) -> &[u8] {
    // SAFETY: i8 and u8 have identical layout.
    unsafe { std::slice::from_raw_parts(v.as_ptr().cast(), v.len()) }
}

fn cast_i8(v: &[u8]) -> &[i8] {
    // SAFETY: u8 and i8 have identical layout.
    unsafe { std::slice::from_raw_parts(v.as_ptr().cast(), v.len()) }
}
