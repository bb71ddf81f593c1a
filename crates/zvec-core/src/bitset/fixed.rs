//! Fixed-size bitset with STL-bitset-equivalent semantics.

use super::word;

/// A fixed-length bitset over contiguous 64-bit words.
///
/// Bitwise operations match `std::bitset` bit-for-bit; unused high bits of
/// the last word are kept zero so cardinality and `test_all` stay exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBitset {
    words: Vec<u64>,
    nbits: usize,
}

impl FixedBitset {
    /// Creates a bitset of `nbits` zeroed bits.
    #[must_use]
    pub fn new(nbits: usize) -> Self {
        Self {
            words: vec![0u64; nbits.div_ceil(64)],
            nbits,
        }
    }

    /// Number of bits.
    #[must_use]
    pub fn size(&self) -> usize {
        self.nbits
    }

    /// Sets bit `pos`.
    #[inline]
    pub fn set(&mut self, pos: usize) {
        debug_assert!(pos < self.nbits, "bit {pos} out of range {}", self.nbits);
        self.words[pos / 64] |= 1u64 << (pos % 64);
    }

    /// Clears bit `pos`.
    #[inline]
    pub fn reset(&mut self, pos: usize) {
        debug_assert!(pos < self.nbits, "bit {pos} out of range {}", self.nbits);
        self.words[pos / 64] &= !(1u64 << (pos % 64));
    }

    /// Flips bit `pos`.
    #[inline]
    pub fn flip(&mut self, pos: usize) {
        debug_assert!(pos < self.nbits, "bit {pos} out of range {}", self.nbits);
        self.words[pos / 64] ^= 1u64 << (pos % 64);
    }

    /// Tests bit `pos`.
    #[inline]
    #[must_use]
    pub fn test(&self, pos: usize) -> bool {
        debug_assert!(pos < self.nbits, "bit {pos} out of range {}", self.nbits);
        (self.words[pos / 64] >> (pos % 64)) & 1 != 0
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Whether every bit is set.
    #[must_use]
    pub fn test_all(&self) -> bool {
        self.cardinality() == self.nbits
    }

    /// Whether any bit is set.
    #[must_use]
    pub fn test_any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn test_none(&self) -> bool {
        !self.test_any()
    }

    /// Number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        word::popcount(&self.words)
    }

    /// `self &= other`. Both sides must have the same length.
    pub fn bitwise_and(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bitset size mismatch");
        word::and_assign(&mut self.words, &other.words);
    }

    /// `self |= other`.
    pub fn bitwise_or(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bitset size mismatch");
        word::or_assign(&mut self.words, &other.words);
    }

    /// `self ^= other`.
    pub fn bitwise_xor(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bitset size mismatch");
        word::xor_assign(&mut self.words, &other.words);
    }

    /// `self &= !other`.
    pub fn bitwise_andnot(&mut self, other: &Self) {
        assert_eq!(self.nbits, other.nbits, "bitset size mismatch");
        word::andnot_assign(&mut self.words, &other.words);
    }

    /// `self = !self`, masking the tail so unused bits stay zero.
    pub fn bitwise_not(&mut self) {
        word::not_assign(&mut self.words);
        self.mask_tail();
    }

    /// `popcount(a & b)`
    #[must_use]
    pub fn and_cardinality(a: &Self, b: &Self) -> usize {
        assert_eq!(a.nbits, b.nbits, "bitset size mismatch");
        word::and_popcount(&a.words, &b.words)
    }

    /// `popcount(a | b)`
    #[must_use]
    pub fn or_cardinality(a: &Self, b: &Self) -> usize {
        assert_eq!(a.nbits, b.nbits, "bitset size mismatch");
        word::or_popcount(&a.words, &b.words)
    }

    /// `popcount(a ^ b)`
    #[must_use]
    pub fn xor_cardinality(a: &Self, b: &Self) -> usize {
        assert_eq!(a.nbits, b.nbits, "bitset size mismatch");
        word::xor_popcount(&a.words, &b.words)
    }

    /// `popcount(a & !b)`
    #[must_use]
    pub fn andnot_cardinality(a: &Self, b: &Self) -> usize {
        assert_eq!(a.nbits, b.nbits, "bitset size mismatch");
        word::andnot_popcount(&a.words, &b.words)
    }

    /// Appends the indices of set bits in ascending order.
    pub fn extract(&self, out: &mut Vec<u32>) {
        word::extract_words(&self.words, 0, out);
    }

    /// Raw word view, used by the sparse bitmap.
    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    fn mask_tail(&mut self) {
        let tail = self.nbits % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Plain `Vec<bool>` reference mirroring `std::bitset` semantics.
    struct RefBits(Vec<bool>);

    impl RefBits {
        fn new(n: usize) -> Self {
            Self(vec![false; n])
        }
        fn count(&self) -> usize {
            self.0.iter().filter(|&&b| b).count()
        }
    }

    fn random_pair(n: usize, rng: &mut StdRng) -> (FixedBitset, FixedBitset, RefBits, RefBits) {
        let mut a = FixedBitset::new(n);
        let mut b = FixedBitset::new(n);
        let mut ra = RefBits::new(n);
        let mut rb = RefBits::new(n);
        for _ in 0..n {
            let i = rng.gen_range(0..n);
            let j = rng.gen_range(0..n);
            a.set(i);
            ra.0[i] = true;
            b.set(j);
            rb.0[j] = true;
        }
        (a, b, ra, rb)
    }

    #[test]
    fn test_basic_bits() {
        let mut bits = FixedBitset::new(64);
        assert!(bits.test_none());
        bits.set(0);
        bits.set(63);
        assert!(bits.test(0));
        assert!(bits.test(63));
        assert!(!bits.test(32));
        assert_eq!(bits.cardinality(), 2);

        bits.flip(63);
        assert!(!bits.test(63));
        bits.reset(0);
        assert!(bits.test_none());
    }

    #[test]
    fn test_equivalence_with_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        for &n in &[1usize, 32, 64, 512, 1504, 2528, 3552] {
            let (mut a, b, mut ra, rb) = random_pair(n, &mut rng);

            // AND
            let mut v = a.clone();
            v.bitwise_and(&b);
            for i in 0..n {
                assert_eq!(v.test(i), ra.0[i] && rb.0[i], "and bit {i} of {n}");
            }

            // OR
            let mut v = a.clone();
            v.bitwise_or(&b);
            for i in 0..n {
                assert_eq!(v.test(i), ra.0[i] || rb.0[i]);
            }

            // XOR
            let mut v = a.clone();
            v.bitwise_xor(&b);
            for i in 0..n {
                assert_eq!(v.test(i), ra.0[i] ^ rb.0[i]);
            }

            // ANDNOT
            let mut v = a.clone();
            v.bitwise_andnot(&b);
            for i in 0..n {
                assert_eq!(v.test(i), ra.0[i] && !rb.0[i]);
            }

            // NOT keeps tail clean
            a.bitwise_not();
            for flag in &mut ra.0 {
                *flag = !*flag;
            }
            for i in 0..n {
                assert_eq!(a.test(i), ra.0[i]);
            }
            assert_eq!(a.cardinality(), ra.count());
        }
    }

    #[test]
    fn test_pair_cardinality_identities() {
        let mut rng = StdRng::seed_from_u64(11);
        for &n in &[32usize, 512, 3552] {
            let (a, b, _, _) = random_pair(n, &mut rng);
            let xor = FixedBitset::xor_cardinality(&a, &b);
            assert_eq!(
                xor,
                FixedBitset::andnot_cardinality(&a, &b) + FixedBitset::andnot_cardinality(&b, &a)
            );
            assert_eq!(
                xor,
                FixedBitset::or_cardinality(&a, &b) - FixedBitset::and_cardinality(&a, &b)
            );
        }
    }

    #[test]
    fn test_all_any_none() {
        let mut bits = FixedBitset::new(100);
        assert!(bits.test_none());
        assert!(!bits.test_any());
        assert!(!bits.test_all());

        bits.set(42);
        assert!(bits.test_any());
        assert!(!bits.test_all());

        bits.bitwise_not();
        bits.set(42);
        assert!(bits.test_all());
        assert_eq!(bits.cardinality(), 100);
    }

    #[test]
    fn test_extract_ascending() {
        let mut bits = FixedBitset::new(200);
        for &i in &[199usize, 0, 65, 3, 64] {
            bits.set(i);
        }
        let mut out = Vec::new();
        bits.extract(&mut out);
        assert_eq!(out, vec![0, 3, 64, 65, 199]);
    }
}
