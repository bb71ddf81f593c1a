//! Sparse-vector dot product over `(index, value)` streams.
//!
//! `transform_sparse_format` packs a sparse vector into the compact buffer
//! consumed by the kernel: `u32` count, then the sorted `u32` indices, then
//! the matching `f32` values, all little-endian.

use crate::error::{Error, Result};

/// Dot product of two sparse vectors given as parallel index/value slices.
///
/// Indices must be strictly ascending on both sides.
#[must_use]
pub fn inner_product_sparse_pairs(
    a_indices: &[u32],
    a_values: &[f32],
    b_indices: &[u32],
    b_values: &[f32],
) -> f32 {
    debug_assert_eq!(a_indices.len(), a_values.len());
    debug_assert_eq!(b_indices.len(), b_values.len());

    let mut sum = 0.0f32;
    let mut i = 0;
    let mut j = 0;
    while i < a_indices.len() && j < b_indices.len() {
        match a_indices[i].cmp(&b_indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a_values[i] * b_values[j];
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Packs a sparse vector into the compact kernel format, sorting by index.
///
/// Duplicate indices are rejected.
pub fn transform_sparse_format(indices: &[u32], values: &[f32]) -> Result<Vec<u8>> {
    if indices.len() != values.len() {
        return Err(Error::invalid_argument(format!(
            "sparse index/value length mismatch: {} vs {}",
            indices.len(),
            values.len()
        )));
    }

    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_unstable_by_key(|&i| indices[i]);
    for w in order.windows(2) {
        if indices[w[0]] == indices[w[1]] {
            return Err(Error::invalid_argument(format!(
                "duplicate sparse index {}",
                indices[w[0]]
            )));
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let count = indices.len() as u32;
    let mut buf = Vec::with_capacity(4 + indices.len() * 8);
    buf.extend_from_slice(&count.to_le_bytes());
    for &i in &order {
        buf.extend_from_slice(&indices[i].to_le_bytes());
    }
    for &i in &order {
        buf.extend_from_slice(&values[i].to_le_bytes());
    }
    Ok(buf)
}

/// Unpacks a buffer produced by [`transform_sparse_format`].
pub fn parse_sparse_format(buf: &[u8]) -> Result<(Vec<u32>, Vec<f32>)> {
    if buf.len() < 4 {
        return Err(Error::invalid_format("sparse buffer shorter than header"));
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() != 4 + count * 8 {
        return Err(Error::invalid_format(format!(
            "sparse buffer size {} does not match count {count}",
            buf.len()
        )));
    }
    let mut indices = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(count);
    let idx_base = 4;
    let val_base = 4 + count * 4;
    for i in 0..count {
        let off = idx_base + i * 4;
        indices.push(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        let off = val_base + i * 4;
        values.push(f32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
    }
    Ok((indices, values))
}

/// Dot product over two packed sparse buffers.
pub fn inner_product_sparse(a: &[u8], b: &[u8]) -> Result<f32> {
    let (ai, av) = parse_sparse_format(a)?;
    let (bi, bv) = parse_sparse_format(b)?;
    Ok(inner_product_sparse_pairs(&ai, &av, &bi, &bv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_join_dot() {
        let a_idx = [1u32, 5, 9];
        let a_val = [2.0f32, 3.0, 4.0];
        let b_idx = [0u32, 5, 9, 12];
        let b_val = [10.0f32, 0.5, 2.0, 7.0];
        let got = inner_product_sparse_pairs(&a_idx, &a_val, &b_idx, &b_val);
        assert_eq!(got, 3.0 * 0.5 + 4.0 * 2.0);
    }

    #[test]
    fn test_pack_sorts_and_round_trips() {
        let packed = transform_sparse_format(&[9, 1, 5], &[4.0, 2.0, 3.0]).unwrap();
        let (idx, val) = parse_sparse_format(&packed).unwrap();
        assert_eq!(idx, vec![1, 5, 9]);
        assert_eq!(val, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_packed_dot_matches_pairs() {
        let a = transform_sparse_format(&[3, 0, 7], &[1.0, -1.0, 2.0]).unwrap();
        let b = transform_sparse_format(&[7, 3], &[5.0, 4.0]).unwrap();
        assert_eq!(inner_product_sparse(&a, &b).unwrap(), 4.0 + 10.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(transform_sparse_format(&[1, 1], &[0.0, 0.0]).is_err());
        assert!(transform_sparse_format(&[1], &[0.0, 0.0]).is_err());
        assert!(parse_sparse_format(&[1, 0]).is_err());
        assert!(parse_sparse_format(&[2, 0, 0, 0, 9]).is_err());
    }

    #[test]
    fn test_empty_sides() {
        let a = transform_sparse_format(&[], &[]).unwrap();
        let b = transform_sparse_format(&[4], &[1.5]).unwrap();
        assert_eq!(inner_product_sparse(&a, &b).unwrap(), 0.0);
    }
}
