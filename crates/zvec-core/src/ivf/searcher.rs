//! Query-time driver: centroid list selection, the searcher context and the
//! top-level search loop.

use std::sync::Arc;

use crate::constants::{
    DEFAULT_BRUTE_FORCE_THRESHOLD, DEFAULT_SCAN_RATIO, PARAM_IVF_SEARCHER_BRUTE_FORCE_THRESHOLD,
    PARAM_IVF_SEARCHER_SCAN_RATIO,
};
use crate::error::{Error, Result};
use crate::ivf::entity::{IndexFilter, IvfEntity, SearchStats};
use crate::ivf::heap::{Document, TopkHeap};
use crate::ivf::reformer::{ReformerKind, ReformerWrapper};
use crate::meta::{MetricKind, Params};
use crate::simd;

/// Default scan ratio fitted from collection size.
///
/// Log-fit through `1e6 -> 0.02`, `1e7 -> 0.01`, `5e7 -> 0.005`,
/// `1e8 -> 0.001`, clamped below at `1e-4`.
#[must_use]
pub fn compute_scan_ratio(vector_count: usize) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let ratio = -0.004 * (vector_count as f32).ln() + 0.0751;
    ratio.max(0.0001)
}

/// Flat scan over the centroid rows picking the most promising lists.
pub struct CentroidSearcher {
    centroids: Vec<f32>,
    dimension: usize,
    metric: MetricKind,
}

impl CentroidSearcher {
    /// Creates a sub-searcher over row-major centroid data.
    pub fn new(centroids: Vec<f32>, dimension: usize, metric: MetricKind) -> Result<Self> {
        if dimension == 0 || centroids.len() % dimension != 0 {
            return Err(Error::invalid_argument("centroid buffer size mismatch"));
        }
        Ok(Self {
            centroids,
            dimension,
            metric,
        })
    }

    /// Number of centroids.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.centroids.len() / self.dimension
    }

    /// Picks the `topk` best lists for `query`, best first.
    #[must_use]
    pub fn select(&self, query: &[f32], topk: usize) -> Vec<usize> {
        let mut heap = TopkHeap::new(topk);
        for (list_id, centroid) in self.centroids.chunks_exact(self.dimension).enumerate() {
            let score = match self.metric {
                MetricKind::InnerProduct | MetricKind::MinusInnerProduct => {
                    simd::minus_inner_product(query, centroid)
                }
                _ => simd::squared_euclidean(query, centroid),
            };
            #[allow(clippy::cast_possible_truncation)]
            heap.push(list_id as u64, score, list_id as u32);
        }
        heap.sort();
        #[allow(clippy::cast_possible_truncation)]
        heap.iter().map(|d| d.key as usize).collect()
    }
}

/// Mutable per-query state: the result heap, stats and reformer buffers.
///
/// Contexts are cheap to keep around and must not be shared across threads;
/// the entity they reference is shared freely.
pub struct IvfSearcherContext {
    entity: Arc<IvfEntity>,
    reformer: ReformerWrapper,
    result_heap: TopkHeap,
    results: Vec<Vec<Document>>,
    stats: Vec<SearchStats>,

    fetch_vector: bool,
    topk: u32,
    threshold: f32,
    magic: u32,
    scan_ratio: f32,
    centroid_topk: usize,
    max_scan_count: u32,
    brute_force_threshold: u32,
}

impl IvfSearcherContext {
    /// Creates a context with default parameters.
    #[must_use]
    pub fn new(entity: Arc<IvfEntity>) -> Self {
        let reformer = entity.make_reformer();
        let mut ctx = Self {
            entity,
            reformer,
            result_heap: TopkHeap::new(0),
            results: Vec::new(),
            stats: Vec::new(),
            fetch_vector: false,
            topk: 0,
            threshold: f32::INFINITY,
            magic: 0,
            scan_ratio: DEFAULT_SCAN_RATIO,
            centroid_topk: 1,
            max_scan_count: 0,
            brute_force_threshold: DEFAULT_BRUTE_FORCE_THRESHOLD,
        };
        ctx.recompute_scan_bounds();
        ctx
    }

    /// Creates a context and applies `params`.
    pub fn with_params(entity: Arc<IvfEntity>, params: &Params) -> Result<Self> {
        let mut ctx = Self::new(entity);
        ctx.update(params)?;
        Ok(ctx)
    }

    /// Applies searcher parameters; absent keys keep their current values.
    pub fn update(&mut self, params: &Params) -> Result<()> {
        self.brute_force_threshold = params.get_as_u32(
            PARAM_IVF_SEARCHER_BRUTE_FORCE_THRESHOLD,
            self.brute_force_threshold,
        );
        if params.has(PARAM_IVF_SEARCHER_SCAN_RATIO) {
            self.scan_ratio = params.get_as_f32(PARAM_IVF_SEARCHER_SCAN_RATIO);
        }
        if self.scan_ratio <= 0.0 {
            tracing::error!(scan_ratio = self.scan_ratio, "invalid scan ratio");
            return Err(Error::invalid_argument(format!(
                "invalid scan ratio {}",
                self.scan_ratio
            )));
        }
        self.recompute_scan_bounds();
        Ok(())
    }

    fn recompute_scan_bounds(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let lists = self.entity.inverted_list_count() as f32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.centroid_topk = ((lists * self.scan_ratio).round() as usize).max(1);
        }
        #[allow(clippy::cast_precision_loss)]
        let scan = (self.entity.vector_count() as f32 * self.scan_ratio).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.max_scan_count = (scan as u32).max(self.brute_force_threshold);
        }
    }

    /// Bounds the result set and rewires the heap.
    pub fn set_topk(&mut self, topk: u32) {
        self.topk = topk;
        self.result_heap.limit(topk as usize);
        self.result_heap.set_threshold(self.threshold);
    }

    /// Upper score bound; results above it are dropped.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
        self.result_heap.set_threshold(threshold);
    }

    /// Attach stored vectors to materialized results.
    pub fn set_fetch_vector(&mut self, fetch: bool) {
        self.fetch_vector = fetch;
    }

    /// Whether results carry vector payloads.
    #[must_use]
    pub fn fetch_vector(&self) -> bool {
        self.fetch_vector
    }

    /// Context epoch stamp.
    pub fn set_magic(&mut self, magic: u32) {
        self.magic = magic;
    }

    /// Context epoch stamp.
    #[must_use]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Configured result bound.
    #[must_use]
    pub fn topk(&self) -> u32 {
        self.topk
    }

    /// Fraction of inverted lists visited per query.
    #[must_use]
    pub fn scan_ratio(&self) -> f32 {
        self.scan_ratio
    }

    /// Lists the centroid sub-searcher picks per query.
    #[must_use]
    pub fn centroid_topk(&self) -> usize {
        self.centroid_topk
    }

    /// Scan budget in vectors.
    #[must_use]
    pub fn max_scan_count(&self) -> u32 {
        self.max_scan_count
    }

    /// Full-scan cutover point.
    #[must_use]
    pub fn brute_force_threshold(&self) -> u32 {
        self.brute_force_threshold
    }

    /// The entity this context searches.
    #[must_use]
    pub fn entity(&self) -> &Arc<IvfEntity> {
        &self.entity
    }

    /// Materialized results of query `idx`.
    #[must_use]
    pub fn result(&self, idx: usize) -> &[Document] {
        &self.results[idx]
    }

    /// Stats of query `idx`.
    #[must_use]
    pub fn stats(&self, idx: usize) -> &SearchStats {
        &self.stats[idx]
    }

    /// Clears per-query state for `qnum` queries.
    pub fn reset_results(&mut self, qnum: usize) {
        self.results.resize_with(qnum, Vec::new);
        self.stats.resize_with(qnum, SearchStats::default);
        for result in &mut self.results {
            result.clear();
        }
        for stats in &mut self.stats {
            stats.clear();
        }
        self.result_heap.clear();
        self.result_heap.limit(self.topk as usize);
        self.result_heap.set_threshold(self.threshold);
    }

    /// Sorts the heap into `results[idx]`, honoring topk, threshold and the
    /// vector-fetch flag.
    pub fn topk_to_result(&mut self, idx: usize) {
        if self.result_heap.is_empty() {
            return;
        }
        self.result_heap.sort();

        let size = (self.topk as usize).min(self.result_heap.len());
        self.results[idx].clear();
        for i in 0..size {
            let doc = self.result_heap.get(i).expect("within size");
            if doc.score > self.threshold {
                break;
            }
            let mut doc = doc.clone();
            if self.fetch_vector {
                doc.vector = self.entity.get_vector_by_key(doc.key).ok();
            }
            self.results[idx].push(doc);
        }
    }
}

/// Top-level searcher binding an entity to its centroid sub-searcher.
pub struct IvfSearcher {
    entity: Arc<IvfEntity>,
    centroids: CentroidSearcher,
}

impl IvfSearcher {
    /// Creates a searcher; the centroid count must match the entity's list
    /// count.
    pub fn new(entity: Arc<IvfEntity>, centroids: CentroidSearcher) -> Result<Self> {
        if centroids.list_count() != entity.inverted_list_count() {
            return Err(Error::invalid_argument(format!(
                "centroid count {} != inverted list count {}",
                centroids.list_count(),
                entity.inverted_list_count()
            )));
        }
        Ok(Self { entity, centroids })
    }

    /// The entity searched.
    #[must_use]
    pub fn entity(&self) -> &Arc<IvfEntity> {
        &self.entity
    }

    /// Creates a context configured by `params`.
    pub fn create_context(&self, params: &Params) -> Result<IvfSearcherContext> {
        IvfSearcherContext::with_params(Arc::clone(&self.entity), params)
    }

    /// Runs one top-k query into the context's result slot 0.
    pub fn search(
        &self,
        ctx: &mut IvfSearcherContext,
        query: &[f32],
        filter: Option<&dyn IndexFilter>,
    ) -> Result<()> {
        let dimension = self.entity.meta().dimension();
        if query.len() != dimension {
            return Err(Error::invalid_argument(format!(
                "query dimension {} != {dimension}",
                query.len()
            )));
        }

        ctx.reset_results(1);

        #[allow(clippy::cast_possible_truncation)]
        let brute_force = (self.entity.vector_count() as u32) < ctx.brute_force_threshold;
        let picked: Vec<usize> = if brute_force {
            (0..self.entity.inverted_list_count()).collect()
        } else {
            self.centroids.select(query, ctx.centroid_topk)
        };
        let max_scan_count = ctx.max_scan_count;

        {
            // Split the context so the transformed query (borrowing the
            // reformer buffers) can coexist with heap and stats borrows.
            let IvfSearcherContext {
                reformer,
                result_heap,
                stats,
                ..
            } = &mut *ctx;

            let qdata = reformer.transform(query, dimension)?;
            let mut scanned = 0u32;
            for list_id in picked {
                scanned +=
                    self.entity
                        .search(list_id, &qdata, filter, result_heap, &mut stats[0])?;
                if !brute_force && scanned >= max_scan_count {
                    break;
                }
            }
        }

        // Per-query scales and the open plugin denormalize here; the
        // global-scale integer kinds are already normalized per list.
        match ctx.reformer.kind() {
            ReformerKind::InnerProductInt8
            | ReformerKind::InnerProductInt4
            | ReformerKind::Default => {
                ctx.reformer.normalize(0, &mut ctx.result_heap);
            }
            _ => {}
        }

        ctx.topk_to_result(0);
        Ok(())
    }
}
