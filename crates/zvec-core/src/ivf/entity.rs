//! Loaded IVF index: header, inverted-list bodies, key arrays and the typed
//! per-list search over them.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};

use crate::bitset::Bitmap;
use crate::constants::{
    INT4_QUANTIZER_REFORMER_SCALE, INT8_QUANTIZER_REFORMER_SCALE, INT8_REFORMER_NAME,
    INT4_REFORMER_NAME, INVALID_ID, INVALID_KEY, IVF_FEATURES_SEG_ID,
    IVF_INT4_QUANTIZED_PARAMS_SEG_ID, IVF_INT8_QUANTIZED_PARAMS_SEG_ID, IVF_INVERTED_BODY_SEG_ID,
    IVF_INVERTED_HEADER_SEG_ID, IVF_INVERTED_META_SEG_ID, IVF_KEYS_SEG_ID, IVF_MAPPING_SEG_ID,
    IVF_OFFSETS_SEG_ID,
};
use crate::error::{Error, Result};
use crate::ivf::heap::TopkHeap;
use crate::ivf::layout::{
    InvertedListMeta, InvertedQuantizerParams, InvertedVecLocation, IvfHeader,
};
use crate::ivf::reformer::{QueryData, ReformerConfig, ReformerWrapper};
use crate::meta::{DataType, IndexMeta, MetricKind};
use crate::simd;
use crate::storage::{IndexStorage, Segment};

/// Blocks fetched per storage read on the scan path.
pub const BATCH_BLOCKS: usize = 8;

/// Candidate filter applied during a scan; a filtered key is skipped.
pub trait IndexFilter: Send + Sync {
    /// Whether `key` must be excluded from results.
    fn is_filtered(&self, key: u64) -> bool;
}

impl IndexFilter for Bitmap {
    fn is_filtered(&self, key: u64) -> bool {
        usize::try_from(key).map(|pos| self.test(pos)).unwrap_or(false)
    }
}

impl<F> IndexFilter for F
where
    F: Fn(u64) -> bool + Send + Sync,
{
    fn is_filtered(&self, key: u64) -> bool {
        self(key)
    }
}

/// Per-search counters, monotonically increased by every list scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    /// Distances actually computed.
    pub dist_calced_count: u64,
    /// Candidates dropped by the filter.
    pub filtered_count: u64,
}

impl SearchStats {
    /// Resets both counters.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Reusable buffers of one scan invocation.
#[derive(Default)]
struct Scratch {
    batch_f32: Vec<f32>,
    query_f32: Vec<f32>,
    query_bytes: Vec<u8>,
    query_ready: bool,
}

/// Metric/element dispatch for one block scan.
struct DistanceCalculator {
    metric: MetricKind,
    data_type: DataType,
    block_vecs: usize,
    /// Element byte size after padding to the align unit, as stored in
    /// blocks.
    padded_element: usize,
}

impl DistanceCalculator {
    /// Computes `block_vecs` distances of one column-major block against a
    /// transformed query.
    fn compute_block(
        &self,
        query: &QueryData<'_>,
        block: &[u8],
        out: &mut [f32],
        scratch: &mut Scratch,
    ) -> Result<()> {
        let m = self.block_vecs;
        match (self.data_type, query) {
            (DataType::Fp32, QueryData::F32(q)) => {
                let dim = self.padded_element / 4;
                if !scratch.query_ready {
                    scratch.query_f32.clear();
                    scratch.query_f32.extend_from_slice(&q[..q.len().min(dim)]);
                    scratch.query_f32.resize(dim, 0.0);
                    scratch.query_ready = true;
                }
                decode_f32(&block[..m * dim * 4], &mut scratch.batch_f32);
                match self.metric {
                    MetricKind::Euclidean => simd::euclidean_matrix(
                        &scratch.batch_f32,
                        &scratch.query_f32,
                        dim,
                        m,
                        1,
                        out,
                    ),
                    MetricKind::SquaredEuclidean => simd::squared_euclidean_matrix(
                        &scratch.batch_f32,
                        &scratch.query_f32,
                        dim,
                        m,
                        1,
                        out,
                    ),
                    MetricKind::Manhattan => simd::manhattan_matrix(
                        &scratch.batch_f32,
                        &scratch.query_f32,
                        dim,
                        m,
                        1,
                        out,
                    ),
                    MetricKind::InnerProduct | MetricKind::MinusInnerProduct => {
                        simd::minus_inner_product_matrix(
                            &scratch.batch_f32,
                            &scratch.query_f32,
                            dim,
                            m,
                            1,
                            out,
                        );
                    }
                }
                Ok(())
            }
            (DataType::Int8, QueryData::I8(q)) => {
                let dim = self.padded_element;
                if !scratch.query_ready {
                    scratch.query_bytes.clear();
                    #[allow(clippy::cast_sign_loss)]
                    scratch
                        .query_bytes
                        .extend(q.iter().take(dim).map(|&v| v as u8));
                    scratch.query_bytes.resize(dim, 0);
                    scratch.query_ready = true;
                }
                let padded_query = as_i8(&scratch.query_bytes[..dim]);
                let batch = as_i8(&block[..m * dim]);
                match self.metric {
                    MetricKind::Euclidean => {
                        simd::squared_euclidean_matrix_i8(batch, padded_query, dim, m, 1, out);
                        for v in &mut out[..m] {
                            *v = v.sqrt();
                        }
                    }
                    MetricKind::SquaredEuclidean => {
                        simd::squared_euclidean_matrix_i8(batch, padded_query, dim, m, 1, out);
                    }
                    MetricKind::InnerProduct | MetricKind::MinusInnerProduct => {
                        simd::inner_product_matrix_i8(batch, padded_query, dim, m, 1, out);
                        for v in &mut out[..m] {
                            *v = -*v;
                        }
                    }
                    MetricKind::Manhattan => {
                        return Err(Error::Unsupported("Manhattan over INT8 codes".to_string()))
                    }
                }
                Ok(())
            }
            (DataType::Int4 | DataType::Uint4, QueryData::I4(q)) => {
                let bytes = self.padded_element;
                let dim = bytes * 2;
                if !scratch.query_ready {
                    scratch.query_bytes.clear();
                    scratch.query_bytes.extend_from_slice(&q[..q.len().min(bytes)]);
                    scratch.query_bytes.resize(bytes, 0);
                    scratch.query_ready = true;
                }
                let padded_query = &scratch.query_bytes[..bytes];
                let batch = &block[..m * bytes];
                match self.metric {
                    MetricKind::Euclidean => {
                        simd::squared_euclidean_matrix_i4(batch, padded_query, dim, m, 1, out);
                        for v in &mut out[..m] {
                            *v = v.sqrt();
                        }
                    }
                    MetricKind::SquaredEuclidean => {
                        simd::squared_euclidean_matrix_i4(batch, padded_query, dim, m, 1, out);
                    }
                    MetricKind::InnerProduct | MetricKind::MinusInnerProduct => {
                        simd::inner_product_matrix_i4(batch, padded_query, dim, m, 1, out);
                        for v in &mut out[..m] {
                            *v = -*v;
                        }
                    }
                    MetricKind::Manhattan => {
                        return Err(Error::Unsupported("Manhattan over INT4 codes".to_string()))
                    }
                }
                Ok(())
            }
            (stored, _) => Err(Error::Unsupported(format!(
                "query element type does not match stored {stored:?}"
            ))),
        }
    }
}

fn as_i8(bytes: &[u8]) -> &[i8] {
    // SAFETY: i8 and u8 have identical size and alignment.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast(), bytes.len()) }
}

fn decode_f32(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap())),
    );
}

/// One immutable loaded IVF index.
///
/// Safe to share across searcher contexts after `load`; cloning produces
/// independent storage handles for contention-free parallel readers.
pub struct IvfEntity {
    header: IvfHeader,
    meta: IndexMeta,
    metric: MetricKind,
    reformer: ReformerConfig,
    calculator: DistanceCalculator,

    inverted: Arc<dyn Segment>,
    inverted_meta: Arc<dyn Segment>,
    keys: Arc<dyn Segment>,
    offsets: Arc<dyn Segment>,
    mapping: Arc<dyn Segment>,
    quantizer_params: Option<Arc<dyn Segment>>,
    features: Option<Arc<dyn Segment>>,

    norm_value: f32,
    norm_value_sqrt: bool,
}

impl IvfEntity {
    /// Parses the header and loads every segment, validating sizes.
    pub fn load(container: &dyn IndexStorage) -> Result<Self> {
        let header_seg = container.get(IVF_INVERTED_HEADER_SEG_ID).ok_or_else(|| {
            error!(segment = IVF_INVERTED_HEADER_SEG_ID, "missing segment");
            Error::invalid_format("missing inverted header segment")
        })?;
        if header_seg.data_size() < IvfHeader::SIZE {
            return Err(Error::invalid_format("inverted header segment too small"));
        }
        let header_bytes = header_seg.read(0, header_seg.data_size())?;
        let header = IvfHeader::parse(&header_bytes)?;
        if (header.header_size as usize) < IvfHeader::SIZE + header.index_meta_size as usize
            || header.header_size as usize > header_seg.data_size()
        {
            error!(header_size = header.header_size, "invalid header size");
            return Err(Error::invalid_format(format!(
                "invalid header size {}",
                header.header_size
            )));
        }

        let meta = IndexMeta::deserialize(
            &header_bytes[IvfHeader::SIZE..IvfHeader::SIZE + header.index_meta_size as usize],
        )?;
        let metric = MetricKind::from_name(meta.metric_name())?;
        let reformer = ReformerConfig::from_meta(&meta)?;

        let block_vecs = header.block_vector_count as usize;
        if block_vecs == 0 || block_vecs >= 64 {
            // The per-block keep mask is a u64.
            return Err(Error::invalid_format(format!(
                "block vector count {block_vecs} out of range"
            )));
        }
        let calculator = DistanceCalculator {
            metric,
            data_type: meta.data_type(),
            block_vecs,
            padded_element: header.block_size as usize / block_vecs,
        };

        let load_segment = |seg_id: &str, expect: usize| -> Result<Arc<dyn Segment>> {
            let segment = container.get(seg_id).ok_or_else(|| {
                error!(segment = seg_id, "missing segment");
                Error::invalid_format(format!("missing segment {seg_id}"))
            })?;
            if expect != 0 && segment.data_size() != expect {
                error!(
                    segment = seg_id,
                    size = segment.data_size(),
                    expect,
                    "segment size mismatch"
                );
                return Err(Error::invalid_format(format!(
                    "segment {seg_id} size {} != expected {expect}",
                    segment.data_size()
                )));
            }
            Ok(segment)
        };

        let total = header.total_vector_count as usize;
        let inverted = load_segment(
            IVF_INVERTED_BODY_SEG_ID,
            usize::try_from(header.inverted_body_size)
                .map_err(|_| Error::invalid_format("inverted body size overflow"))?,
        )?;
        let inverted_meta = load_segment(
            IVF_INVERTED_META_SEG_ID,
            header.inverted_list_count as usize * InvertedListMeta::SIZE,
        )?;
        let keys = load_segment(IVF_KEYS_SEG_ID, total * 8)?;
        let offsets = load_segment(IVF_OFFSETS_SEG_ID, total * InvertedVecLocation::SIZE)?;
        let mapping = load_segment(IVF_MAPPING_SEG_ID, total * 4)?;

        let norm_value_sqrt = metric.normalizes_by_sqrt();
        let has_int8_params = container.get(IVF_INT8_QUANTIZED_PARAMS_SEG_ID).is_some();
        let has_int4_params = container.get(IVF_INT4_QUANTIZED_PARAMS_SEG_ID).is_some();

        let mut norm_value = 1.0f32;
        let mut quantizer_params = None;
        if has_int8_params || has_int4_params {
            let seg_id = if meta.reformer_name() == INT8_REFORMER_NAME {
                IVF_INT8_QUANTIZED_PARAMS_SEG_ID
            } else {
                IVF_INT4_QUANTIZED_PARAMS_SEG_ID
            };
            quantizer_params = Some(load_segment(
                seg_id,
                header.inverted_list_count as usize * InvertedQuantizerParams::SIZE,
            )?);
            norm_value = 0.0;
        } else if meta.reformer_name() == INT8_REFORMER_NAME
            || meta.reformer_name() == INT4_REFORMER_NAME
        {
            let scale_key = if meta.reformer_name() == INT8_REFORMER_NAME {
                INT8_QUANTIZER_REFORMER_SCALE
            } else {
                INT4_QUANTIZER_REFORMER_SCALE
            };
            let scale = meta.reformer_params().get_as_f32(scale_key);
            norm_value = convert_to_normalize_value(scale, norm_value_sqrt);
        }

        let features = match container.get(IVF_FEATURES_SEG_ID) {
            Some(segment) => {
                if total > 0 && segment.data_size() % total != 0 {
                    error!(
                        size = segment.data_size(),
                        total, "invalid features segment size"
                    );
                    return Err(Error::invalid_format("invalid features segment size"));
                }
                Some(segment)
            }
            None => None,
        };

        debug!(
            docs = header.total_vector_count,
            lists = header.inverted_list_count,
            element_size = meta.element_size(),
            metric = meta.metric_name(),
            reformer = meta.reformer_name(),
            "loaded inverted index"
        );

        Ok(Self {
            header,
            meta,
            metric,
            reformer,
            calculator,
            inverted,
            inverted_meta,
            keys,
            offsets,
            mapping,
            quantizer_params,
            features,
            norm_value,
            norm_value_sqrt,
        })
    }

    /// Index meta.
    #[must_use]
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// Resolved metric.
    #[must_use]
    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    /// Number of inverted lists.
    #[must_use]
    pub fn inverted_list_count(&self) -> usize {
        self.header.inverted_list_count as usize
    }

    /// Total logical vector count.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.header.total_vector_count as usize
    }

    /// Vector slots per block.
    #[must_use]
    pub fn block_vector_count(&self) -> usize {
        self.header.block_vector_count as usize
    }

    /// Stamps a fresh reformer wrapper for one searcher context.
    #[must_use]
    pub fn make_reformer(&self) -> ReformerWrapper {
        self.reformer.make_wrapper()
    }

    /// Per-list meta record.
    pub fn inverted_list_meta(&self, list_id: usize) -> Result<InvertedListMeta> {
        assert!(
            list_id < self.inverted_list_count(),
            "invalid inverted list id {list_id}"
        );
        let bytes = self
            .inverted_meta
            .read(list_id * InvertedListMeta::SIZE, InvertedListMeta::SIZE)?;
        InvertedListMeta::parse(&bytes)
    }

    /// Scans one inverted list, pushing surviving candidates into `heap`.
    ///
    /// Returns the list's logical vector count as the scan count.
    pub fn search(
        &self,
        list_id: usize,
        query: &QueryData<'_>,
        filter: Option<&dyn IndexFilter>,
        heap: &mut TopkHeap,
        stats: &mut SearchStats,
    ) -> Result<u32> {
        let list_meta = self.inverted_list_meta(list_id)?;
        let block_vecs = self.header.block_vector_count as usize;
        let block_size = self.header.block_size as usize;
        let block_count = list_meta.block_count as usize;
        let vector_count = list_meta.vector_count as usize;
        let norm_val = self.inverted_list_normalize_value(list_id)?;

        let mut distances = vec![0.0f32; block_vecs];
        let mut scratch = Scratch::default();

        let mut batch_start = 0usize;
        while batch_start < block_count {
            let blocks = BATCH_BLOCKS.min(block_count - batch_start);
            let off = list_meta.offset as usize + batch_start * block_size;
            let size = (blocks * block_size).min(
                usize::try_from(self.header.inverted_body_size)
                    .map_err(|_| Error::invalid_format("inverted body size overflow"))?
                    - off,
            );
            let data = self.inverted.read(off, size)?;

            let items = (blocks * block_vecs).min(vector_count - batch_start * block_vecs);
            let key_bytes = self
                .keys
                .read((list_meta.id_offset as usize + batch_start * block_vecs) * 8, items * 8)?;
            let key_at = |k: usize| -> u64 {
                u64::from_le_bytes(key_bytes[k * 8..k * 8 + 8].try_into().unwrap())
            };

            for b in 0..blocks {
                let vecs_count =
                    block_vecs.min(vector_count - (batch_start + b) * block_vecs);
                if vecs_count == 0 {
                    break;
                }
                let key_base = b * block_vecs;

                let mut keeps: u64 = 0;
                if let Some(filter) = filter {
                    for k in 0..vecs_count {
                        if filter.is_filtered(key_at(key_base + k)) {
                            stats.filtered_count += 1;
                        } else {
                            keeps |= 1 << k;
                        }
                    }
                    if keeps == 0 {
                        continue;
                    }
                } else {
                    keeps = (1u64 << vecs_count) - 1;
                }

                let block_start = b * block_size;
                let block_end = (block_start + block_size).min(size);
                if block_end - block_start < block_size {
                    error!(list_id, block = batch_start + b, "short block read");
                    return Err(Error::read_data("short block read"));
                }
                let block_data = &data[block_start..block_end];
                self.calculator
                    .compute_block(query, block_data, &mut distances, &mut scratch)?;
                stats.dist_calced_count += vecs_count as u64;

                #[allow(clippy::cast_possible_truncation)]
                let id_off = list_meta.id_offset + ((batch_start + b) * block_vecs) as u32;
                for k in 0..vecs_count {
                    if keeps & (1 << k) != 0 {
                        let key = key_at(key_base + k);
                        if key != INVALID_KEY {
                            #[allow(clippy::cast_possible_truncation)]
                            heap.push(key, distances[k] * norm_val, id_off + k as u32);
                        }
                    }
                }
            }

            batch_start += blocks;
        }

        Ok(list_meta.vector_count)
    }

    /// Scans every inverted list.
    pub fn search_all(
        &self,
        query: &QueryData<'_>,
        filter: Option<&dyn IndexFilter>,
        heap: &mut TopkHeap,
        stats: &mut SearchStats,
    ) -> Result<()> {
        for list_id in 0..self.inverted_list_count() {
            self.search(list_id, query, filter, heap, stats)?;
        }
        Ok(())
    }

    /// Reads the stored code bytes of a local id.
    ///
    /// With a features segment present this is a direct slice; otherwise
    /// column-major rows are reassembled by strided word gathers.
    pub fn get_vector(&self, id: usize) -> Result<Bytes> {
        if let Some(features) = &self.features {
            let element_size = features.data_size() / self.vector_count();
            return features.read(id * element_size, element_size);
        }

        let loc_bytes = self
            .offsets
            .read(id * InvertedVecLocation::SIZE, InvertedVecLocation::SIZE)?;
        let loc = InvertedVecLocation::parse(&loc_bytes)?;
        let element_size = self.meta.element_size();

        if loc.column_major != 0 {
            let unit = self.meta.data_type().align_size();
            let padded_element = self.calculator.padded_element;
            let cols = padded_element / unit;
            let step = self.block_vector_count() * unit;
            let rd_size = step * (cols - 1) + unit;
            let data = self
                .inverted
                .read(usize::try_from(loc.offset).expect("offset fits"), rd_size)?;

            let mut row = vec![0u8; padded_element];
            for c in 0..cols {
                row[c * unit..(c + 1) * unit].copy_from_slice(&data[c * step..c * step + unit]);
            }
            row.truncate(element_size);
            Ok(Bytes::from(row))
        } else {
            self.inverted
                .read(usize::try_from(loc.offset).expect("offset fits"), element_size)
        }
    }

    /// Binary search of a key through the sorted mapping.
    ///
    /// Returns [`INVALID_ID`] on miss.
    #[must_use]
    pub fn key_to_id(&self, key: u64) -> u32 {
        let mut start = 0usize;
        let mut end = self.vector_count();
        while start < end {
            let idx = start + (end - start) / 2;
            let Ok(mapping_bytes) = self.mapping.read(idx * 4, 4) else {
                error!(idx, "failed to read mapping segment");
                return INVALID_ID;
            };
            let local_id =
                u32::from_le_bytes(mapping_bytes[..].try_into().unwrap()) as usize;
            let Ok(key_bytes) = self.keys.read(local_id * 8, 8) else {
                error!(local_id, "failed to read keys segment");
                return INVALID_ID;
            };
            let mid_key = u64::from_le_bytes(key_bytes[..].try_into().unwrap());
            match mid_key.cmp(&key) {
                std::cmp::Ordering::Less => start = idx + 1,
                std::cmp::Ordering::Greater => end = idx,
                #[allow(clippy::cast_possible_truncation)]
                std::cmp::Ordering::Equal => return local_id as u32,
            }
        }
        INVALID_ID
    }

    /// Key lookup composed with [`get_vector`](Self::get_vector).
    pub fn get_vector_by_key(&self, key: u64) -> Result<Bytes> {
        let id = self.key_to_id(key);
        if id == INVALID_ID {
            return Err(Error::Runtime(format!("key {key} not found")));
        }
        self.get_vector(id as usize)
    }

    /// Produces an entity sharing meta and dispatch but owning independent
    /// segment handles.
    #[must_use]
    pub fn clone_entity(&self) -> Self {
        Self {
            header: self.header,
            meta: self.meta.clone(),
            metric: self.metric,
            reformer: self.reformer.clone(),
            calculator: DistanceCalculator {
                metric: self.calculator.metric,
                data_type: self.calculator.data_type,
                block_vecs: self.calculator.block_vecs,
                padded_element: self.calculator.padded_element,
            },
            inverted: self.inverted.clone_segment(),
            inverted_meta: self.inverted_meta.clone_segment(),
            keys: self.keys.clone_segment(),
            offsets: self.offsets.clone_segment(),
            mapping: self.mapping.clone_segment(),
            quantizer_params: self
                .quantizer_params
                .as_ref()
                .map(|s| s.clone_segment()),
            features: self.features.as_ref().map(|s| s.clone_segment()),
            norm_value: self.norm_value,
            norm_value_sqrt: self.norm_value_sqrt,
        }
    }

    fn inverted_list_normalize_value(&self, list_id: usize) -> Result<f32> {
        let value = if let Some(params_seg) = &self.quantizer_params {
            let bytes = params_seg.read(
                list_id * InvertedQuantizerParams::SIZE,
                InvertedQuantizerParams::SIZE,
            )?;
            let params = InvertedQuantizerParams::parse(&bytes)?;
            convert_to_normalize_value(params.scale, self.norm_value_sqrt)
        } else {
            self.norm_value
        };
        Ok(if self.norm_value_sqrt {
            value.sqrt()
        } else {
            value
        })
    }
}

/// Maps a reformer scale onto the stored normalizer so the observable
/// per-list factor is `1/scale` for the linear integer reformers and `1`
/// for identity.
fn convert_to_normalize_value(scale: f32, sqrt_metric: bool) -> f32 {
    if scale == 0.0 {
        1.0
    } else if sqrt_metric {
        1.0 / (scale * scale)
    } else {
        1.0 / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_to_normalize_value() {
        assert_eq!(convert_to_normalize_value(0.0, true), 1.0);
        assert_eq!(convert_to_normalize_value(0.0, false), 1.0);
        // Observable factor after the sqrt is 1/scale.
        assert!((convert_to_normalize_value(4.0, true).sqrt() - 0.25).abs() < 1e-7);
        assert_eq!(convert_to_normalize_value(4.0, false), 0.25);
        // Monotone in scale.
        assert!(convert_to_normalize_value(2.0, false) > convert_to_normalize_value(3.0, false));
    }

    #[test]
    fn test_filter_impls() {
        let mut bitmap = Bitmap::new();
        bitmap.set(42);
        assert!(IndexFilter::is_filtered(&bitmap, 42));
        assert!(!IndexFilter::is_filtered(&bitmap, 7));

        let closure = |key: u64| key % 2 == 0;
        assert!(IndexFilter::is_filtered(&closure, 4));
        assert!(!IndexFilter::is_filtered(&closure, 5));
    }
}
