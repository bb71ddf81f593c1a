//! Sparse bucketed bitmap used as the search filter representation.

use super::word;

/// Bits per bucket. Buckets align on 16-bit page boundaries.
pub const MAX_SIZE: usize = 65536;

const BUCKET_WORDS: usize = MAX_SIZE / 64;

type Bucket = Box<[u64; BUCKET_WORDS]>;

fn new_bucket() -> Bucket {
    // A zeroed 8 KiB page per bucket, allocated on first write only.
    vec![0u64; BUCKET_WORDS]
        .into_boxed_slice()
        .try_into()
        .expect("bucket word count")
}

/// Page-bucketed bitmap; an empty bucket consumes no storage.
///
/// Binary operations transparently align-pad the shorter side, so bitmaps of
/// different extents compose like infinite zero-extended bit strings.
#[derive(Debug, Clone, Default)]
pub struct Bitmap {
    buckets: Vec<Option<Bucket>>,
}

impl Bitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current capacity in bits (always a multiple of the bucket size).
    #[must_use]
    pub fn size(&self) -> usize {
        self.buckets.len() * MAX_SIZE
    }

    /// Sets bit `pos`, growing the bucket directory as needed.
    pub fn set(&mut self, pos: usize) {
        let bucket_idx = pos / MAX_SIZE;
        if bucket_idx >= self.buckets.len() {
            self.buckets.resize_with(bucket_idx + 1, || None);
        }
        let bucket = self.buckets[bucket_idx].get_or_insert_with(new_bucket);
        let bit = pos % MAX_SIZE;
        bucket[bit / 64] |= 1u64 << (bit % 64);
    }

    /// Clears bit `pos`. Out-of-range positions are already clear.
    pub fn reset(&mut self, pos: usize) {
        let bucket_idx = pos / MAX_SIZE;
        if let Some(Some(bucket)) = self.buckets.get_mut(bucket_idx) {
            let bit = pos % MAX_SIZE;
            bucket[bit / 64] &= !(1u64 << (bit % 64));
        }
    }

    /// Flips bit `pos`, growing as needed.
    pub fn flip(&mut self, pos: usize) {
        let bucket_idx = pos / MAX_SIZE;
        if bucket_idx >= self.buckets.len() {
            self.buckets.resize_with(bucket_idx + 1, || None);
        }
        let bucket = self.buckets[bucket_idx].get_or_insert_with(new_bucket);
        let bit = pos % MAX_SIZE;
        bucket[bit / 64] ^= 1u64 << (bit % 64);
    }

    /// Tests bit `pos`; positions beyond the current extent read as zero.
    #[must_use]
    pub fn test(&self, pos: usize) -> bool {
        let bucket_idx = pos / MAX_SIZE;
        match self.buckets.get(bucket_idx) {
            Some(Some(bucket)) => {
                let bit = pos % MAX_SIZE;
                (bucket[bit / 64] >> (bit % 64)) & 1 != 0
            }
            _ => false,
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .map(|b| word::popcount(&b[..]))
            .sum()
    }

    /// Whether any bit is set.
    #[must_use]
    pub fn test_any(&self) -> bool {
        self.buckets
            .iter()
            .flatten()
            .any(|b| b.iter().any(|&w| w != 0))
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn test_none(&self) -> bool {
        !self.test_any()
    }

    /// Whether every bit of the current extent is set.
    #[must_use]
    pub fn test_all(&self) -> bool {
        !self.buckets.is_empty()
            && self
                .buckets
                .iter()
                .all(|b| b.as_ref().is_some_and(|b| b.iter().all(|&w| w == u64::MAX)))
    }

    /// `self &= other`
    pub fn bitwise_and(&mut self, other: &Self) {
        self.align_to(other);
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            match (dst.as_mut(), src) {
                (Some(d), Some(s)) => word::and_assign(&mut d[..], &s[..]),
                (Some(_), None) => *dst = None,
                _ => {}
            }
        }
        // Buckets of self beyond other's extent AND against zero.
        for dst in self.buckets.iter_mut().skip(other.buckets.len()) {
            *dst = None;
        }
    }

    /// `self |= other`
    pub fn bitwise_or(&mut self, other: &Self) {
        self.align_to(other);
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            if let Some(s) = src {
                let d = dst.get_or_insert_with(new_bucket);
                word::or_assign(&mut d[..], &s[..]);
            }
        }
    }

    /// `self ^= other`
    pub fn bitwise_xor(&mut self, other: &Self) {
        self.align_to(other);
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            if let Some(s) = src {
                let d = dst.get_or_insert_with(new_bucket);
                word::xor_assign(&mut d[..], &s[..]);
            }
        }
    }

    /// `self &= !other`
    pub fn bitwise_andnot(&mut self, other: &Self) {
        for (dst, src) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            if let (Some(d), Some(s)) = (dst.as_mut(), src) {
                word::andnot_assign(&mut d[..], &s[..]);
            }
        }
    }

    /// `self = !self` over the current extent.
    pub fn bitwise_not(&mut self) {
        for dst in &mut self.buckets {
            let d = dst.get_or_insert_with(new_bucket);
            word::not_assign(&mut d[..]);
        }
    }

    /// Drops trailing buckets that hold no set bit.
    pub fn shrink_to_fit(&mut self) {
        while let Some(last) = self.buckets.last() {
            let empty = match last {
                None => true,
                Some(b) => b.iter().all(|&w| w == 0),
            };
            if !empty {
                break;
            }
            self.buckets.pop();
        }
        self.buckets.shrink_to_fit();
    }

    /// Appends the indices of set bits in ascending order.
    pub fn extract(&self, out: &mut Vec<u32>) {
        for (i, bucket) in self.buckets.iter().enumerate() {
            if let Some(b) = bucket {
                word::extract_words(&b[..], i * MAX_SIZE, out);
            }
        }
    }

    fn align_to(&mut self, other: &Self) {
        if self.buckets.len() < other.buckets.len() {
            self.buckets.resize_with(other.buckets.len(), || None);
        }
    }
}

impl FromIterator<usize> for Bitmap {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut bitmap = Bitmap::new();
        for pos in iter {
            bitmap.set(pos);
        }
        bitmap
    }
}
