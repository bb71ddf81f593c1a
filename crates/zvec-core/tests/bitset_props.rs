//! Property suite: bitset algebra against a naive reference model.

use proptest::prelude::*;

use zvec_core::{Bitmap, FixedBitset};

fn reference_sets(
    n: usize,
    a_bits: &[usize],
    b_bits: &[usize],
) -> (Vec<bool>, Vec<bool>, FixedBitset, FixedBitset) {
    let mut ra = vec![false; n];
    let mut rb = vec![false; n];
    let mut a = FixedBitset::new(n);
    let mut b = FixedBitset::new(n);
    for &i in a_bits {
        let i = i % n;
        ra[i] = true;
        a.set(i);
    }
    for &i in b_bits {
        let i = i % n;
        rb[i] = true;
        b.set(i);
    }
    (ra, rb, a, b)
}

proptest! {
    #[test]
    fn fixed_bitset_ops_match_reference(
        n in 1usize..3000,
        a_bits in prop::collection::vec(0usize..3000, 0..200),
        b_bits in prop::collection::vec(0usize..3000, 0..200),
    ) {
        let (ra, rb, a, b) = reference_sets(n, &a_bits, &b_bits);

        let mut v = a.clone();
        v.bitwise_and(&b);
        for i in 0..n {
            prop_assert_eq!(v.test(i), ra[i] && rb[i]);
        }

        let mut v = a.clone();
        v.bitwise_or(&b);
        for i in 0..n {
            prop_assert_eq!(v.test(i), ra[i] || rb[i]);
        }

        let mut v = a.clone();
        v.bitwise_xor(&b);
        for i in 0..n {
            prop_assert_eq!(v.test(i), ra[i] ^ rb[i]);
        }

        let mut v = a.clone();
        v.bitwise_andnot(&b);
        for i in 0..n {
            prop_assert_eq!(v.test(i), ra[i] && !rb[i]);
        }

        let mut v = a.clone();
        v.bitwise_not();
        for i in 0..n {
            prop_assert_eq!(v.test(i), !ra[i]);
        }
        prop_assert_eq!(v.cardinality(), n - a.cardinality());
    }

    #[test]
    fn pair_cardinalities_identity(
        n in 1usize..3000,
        a_bits in prop::collection::vec(0usize..3000, 0..200),
        b_bits in prop::collection::vec(0usize..3000, 0..200),
    ) {
        let (_, _, a, b) = reference_sets(n, &a_bits, &b_bits);

        let xor = FixedBitset::xor_cardinality(&a, &b);
        prop_assert_eq!(
            xor,
            FixedBitset::andnot_cardinality(&a, &b) + FixedBitset::andnot_cardinality(&b, &a)
        );
        prop_assert_eq!(
            xor,
            FixedBitset::or_cardinality(&a, &b) - FixedBitset::and_cardinality(&a, &b)
        );
    }

    #[test]
    fn bitmap_tracks_reference_set(
        bits in prop::collection::vec(0usize..500_000, 0..300),
        flips in prop::collection::vec(0usize..500_000, 0..100),
    ) {
        let mut bitmap = Bitmap::new();
        let mut reference = std::collections::BTreeSet::new();
        for &i in &bits {
            bitmap.set(i);
            reference.insert(i);
        }
        for &i in &flips {
            bitmap.flip(i);
            if !reference.insert(i) {
                reference.remove(&i);
            }
        }

        prop_assert_eq!(bitmap.cardinality(), reference.len());
        let mut extracted = Vec::new();
        bitmap.extract(&mut extracted);
        let expected: Vec<u32> = reference.iter().map(|&i| i as u32).collect();
        prop_assert_eq!(extracted, expected);
    }
}
