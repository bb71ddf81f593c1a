//! Bounded top-k heap on score with an optional upper-bound threshold.

use bytes::Bytes;

/// One search candidate.
#[derive(Debug, Clone)]
pub struct Document {
    /// Primary key.
    pub key: u64,
    /// Distance score; smaller is better.
    pub score: f32,
    /// Local id inside the index.
    pub local_id: u32,
    /// Optional vector payload attached during result materialization.
    pub vector: Option<Bytes>,
}

impl Document {
    /// Creates a candidate without a vector payload.
    #[must_use]
    pub fn new(key: u64, score: f32, local_id: u32) -> Self {
        Self {
            key,
            score,
            local_id,
            vector: None,
        }
    }
}

/// Bounded max-heap keeping the `k` smallest scores seen.
///
/// Candidates above the threshold are rejected outright; a candidate equal
/// to the current worst keeps the earlier insertion (stable). `sort`
/// finalizes into `(score asc, key asc)` order.
#[derive(Debug, Default)]
pub struct TopkHeap {
    limit: usize,
    threshold: f32,
    docs: Vec<Document>,
}

impl TopkHeap {
    /// Creates a heap bounded at `limit` entries.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            threshold: f32::INFINITY,
            docs: Vec::with_capacity(limit),
        }
    }

    /// Rebounds the heap; a shrinking limit evicts the worst entries.
    pub fn limit(&mut self, limit: usize) {
        self.limit = limit;
        while self.docs.len() > limit {
            self.pop_root();
        }
        self.docs.reserve(limit.saturating_sub(self.docs.len()));
    }

    /// Sets the score threshold; entries above it are never admitted.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Current threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Drops every entry, keeping limit and threshold.
    pub fn clear(&mut self) {
        self.docs.clear();
    }

    /// Inserts a candidate, respecting limit and threshold.
    pub fn push(&mut self, key: u64, score: f32, local_id: u32) {
        if self.limit == 0 || score > self.threshold {
            return;
        }
        if self.docs.len() < self.limit {
            self.docs.push(Document::new(key, score, local_id));
            self.sift_up(self.docs.len() - 1);
        } else if score < self.docs[0].score {
            self.docs[0] = Document::new(key, score, local_id);
            self.sift_down(0);
        }
    }

    /// Worst admitted score, or the threshold while the heap is not full.
    #[must_use]
    pub fn worst_score(&self) -> f32 {
        if self.docs.len() < self.limit {
            self.threshold
        } else {
            self.docs.first().map_or(self.threshold, |d| d.score)
        }
    }

    /// Sorts the entries into `(score asc, key asc)` order.
    ///
    /// The heap shape is abandoned; only `clear` or indexed access make
    /// sense afterwards.
    pub fn sort(&mut self) {
        self.docs.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.key.cmp(&b.key))
        });
    }

    /// Indexed access into the (sorted) entries.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Document> {
        self.docs.get(idx)
    }

    /// Iterates the entries in storage order.
    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.docs.iter()
    }

    /// Mutable iteration, used by score denormalization.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Document> {
        self.docs.iter_mut()
    }

    fn pop_root(&mut self) {
        let last = self.docs.len() - 1;
        self.docs.swap(0, last);
        self.docs.pop();
        if !self.docs.is_empty() {
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.docs[idx].score > self.docs[parent].score {
                self.docs.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.docs.len();
        loop {
            let left = idx * 2 + 1;
            let right = left + 1;
            let mut largest = idx;
            if left < len && self.docs[left].score > self.docs[largest].score {
                largest = left;
            }
            if right < len && self.docs[right].score > self.docs[largest].score {
                largest = right;
            }
            if largest == idx {
                break;
            }
            self.docs.swap(idx, largest);
            idx = largest;
        }
    }
}

impl<'a> IntoIterator for &'a TopkHeap {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_keeps_k_smallest() {
        let mut heap = TopkHeap::new(3);
        for (key, score) in [(1u64, 5.0f32), (2, 1.0), (3, 4.0), (4, 2.0), (5, 3.0)] {
            heap.push(key, score, 0);
        }
        heap.sort();
        let scores: Vec<f32> = heap.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_threshold_rejects() {
        let mut heap = TopkHeap::new(10);
        heap.set_threshold(2.5);
        for (key, score) in [(1u64, 1.0f32), (2, 2.5), (3, 2.6), (4, 100.0)] {
            heap.push(key, score, 0);
        }
        heap.sort();
        assert_eq!(heap.len(), 2);
        assert!(heap.iter().all(|d| d.score <= 2.5));
    }

    #[test]
    fn test_equal_scores_keep_first_inserted() {
        let mut heap = TopkHeap::new(1);
        heap.push(7, 1.0, 0);
        heap.push(9, 1.0, 1);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.get(0).unwrap().key, 7);
    }

    #[test]
    fn test_sort_ties_break_by_key() {
        let mut heap = TopkHeap::new(4);
        heap.push(9, 1.0, 0);
        heap.push(3, 1.0, 1);
        heap.push(7, 0.5, 2);
        heap.push(5, 1.0, 3);
        heap.sort();
        let keys: Vec<u64> = heap.iter().map(|d| d.key).collect();
        assert_eq!(keys, vec![7, 3, 5, 9]);
    }

    #[test]
    fn test_matches_reference_selection() {
        let mut rng = StdRng::seed_from_u64(61);
        for _ in 0..20 {
            let k = rng.gen_range(1..=16);
            let n = rng.gen_range(0..200);
            let mut heap = TopkHeap::new(k);
            let mut all: Vec<(u64, f32)> = Vec::new();
            for key in 0..n {
                let score: f32 = rng.gen_range(0.0..100.0);
                heap.push(key, score, 0);
                all.push((key, score));
            }
            all.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
            heap.sort();

            let got: Vec<f32> = heap.iter().map(|d| d.score).collect();
            let want: Vec<f32> = all.iter().take(k).map(|(_, s)| *s).collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_shrinking_limit_evicts_worst() {
        let mut heap = TopkHeap::new(5);
        for key in 0..5u64 {
            #[allow(clippy::cast_precision_loss)]
            heap.push(key, key as f32, 0);
        }
        heap.limit(2);
        heap.sort();
        let scores: Vec<f32> = heap.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.0, 1.0]);
    }

    #[test]
    fn test_zero_limit_accepts_nothing() {
        let mut heap = TopkHeap::new(0);
        heap.push(1, 1.0, 0);
        assert!(heap.is_empty());
    }
}
