//! Builds the on-disk IVF image from `(key, vector)` records and a fixed
//! centroid set.

use bytes::Bytes;

use crate::constants::{
    INT4_QUANTIZER_REFORMER_BIAS, INT4_QUANTIZER_REFORMER_SCALE, INT4_REFORMER_NAME,
    INT8_QUANTIZER_REFORMER_BIAS, INT8_QUANTIZER_REFORMER_SCALE, INT8_REFORMER_NAME, INVALID_KEY,
    IVF_FEATURES_SEG_ID, IVF_INT4_QUANTIZED_PARAMS_SEG_ID, IVF_INT8_QUANTIZED_PARAMS_SEG_ID,
    IVF_INVERTED_BODY_SEG_ID, IVF_INVERTED_HEADER_SEG_ID, IVF_INVERTED_META_SEG_ID,
    IVF_KEYS_SEG_ID, IVF_MAPPING_SEG_ID, IVF_OFFSETS_SEG_ID,
};
use crate::error::{Error, Result};
use crate::ivf::layout::{
    InvertedListMeta, InvertedQuantizerParams, InvertedVecLocation, IvfHeader,
};
use crate::ivf::transpose::{sort_with_mapping, transpose};
use crate::meta::{DataType, IndexMeta, MetricKind};
use crate::quantizer::{EntropyInt4Quantizer, EntropyInt8Quantizer};
use crate::simd;
use crate::storage::MemIndexStorage;

/// Build-time knobs.
#[derive(Debug, Clone, Copy)]
pub struct IvfBuilderOptions {
    /// Vector slots per block; a power of two below the 64-bit keep mask.
    pub block_vector_count: usize,
    /// Keep the raw float rows in a features segment for exact rescoring.
    pub with_features: bool,
}

impl Default for IvfBuilderOptions {
    fn default() -> Self {
        Self {
            block_vector_count: 16,
            with_features: false,
        }
    }
}

/// Accumulates records per inverted list and emits the segment image.
pub struct IvfBuilder {
    meta: IndexMeta,
    metric: MetricKind,
    centroids: Vec<Vec<f32>>,
    options: IvfBuilderOptions,
    lists: Vec<Vec<(u64, Vec<f32>)>>,
}

impl IvfBuilder {
    /// Creates a builder over a fixed centroid set.
    pub fn new(
        meta: IndexMeta,
        centroids: Vec<Vec<f32>>,
        options: IvfBuilderOptions,
    ) -> Result<Self> {
        if centroids.is_empty() {
            return Err(Error::invalid_argument("empty centroid set"));
        }
        if centroids.iter().any(|c| c.len() != meta.dimension()) {
            return Err(Error::invalid_argument("centroid dimension mismatch"));
        }
        if !matches!(options.block_vector_count, 1 | 2 | 4 | 8 | 16 | 32) {
            return Err(Error::invalid_argument(format!(
                "block vector count {} must be a power of two below 64",
                options.block_vector_count
            )));
        }
        match meta.data_type() {
            DataType::Fp32 | DataType::Int8 | DataType::Int4 => {}
            other => {
                return Err(Error::Unsupported(format!(
                    "builder does not emit {other:?} codes"
                )))
            }
        }
        if meta.data_type() == DataType::Int4 && meta.dimension() % 2 != 0 {
            return Err(Error::invalid_argument(
                "packed INT4 needs an even dimension",
            ));
        }
        let metric = MetricKind::from_name(meta.metric_name())?;
        let list_count = centroids.len();
        Ok(Self {
            meta,
            metric,
            centroids,
            options,
            lists: vec![Vec::new(); list_count],
        })
    }

    /// Records one vector under its nearest centroid.
    pub fn add(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        if key == INVALID_KEY {
            return Err(Error::invalid_argument("reserved key"));
        }
        if vector.len() != self.meta.dimension() {
            return Err(Error::invalid_argument(format!(
                "vector dimension {} != {}",
                vector.len(),
                self.meta.dimension()
            )));
        }

        let mut best = 0usize;
        let mut best_score = f32::INFINITY;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let score = match self.metric {
                MetricKind::InnerProduct | MetricKind::MinusInnerProduct => {
                    simd::minus_inner_product(vector, centroid)
                }
                _ => simd::squared_euclidean(vector, centroid),
            };
            if score < best_score {
                best_score = score;
                best = i;
            }
        }
        self.lists[best].push((key, vector.to_vec()));
        Ok(())
    }

    /// Vectors recorded so far.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    /// Emits the complete segment image.
    pub fn build(&self) -> Result<MemIndexStorage> {
        let dim = self.meta.dimension();
        let data_type = self.meta.data_type();
        let unit = data_type.align_size();
        let element_size = data_type.element_size(dim);
        let padded_element = element_size.div_ceil(unit) * unit;
        let block_vecs = self.options.block_vector_count;
        let block_size = block_vecs * padded_element;
        let total = self.vector_count();

        let mut meta = self.meta.clone();
        let quantizer = self.train_quantizer(&mut meta)?;
        let meta_bytes = meta.serialize()?;

        let mut body: Vec<u8> = Vec::new();
        let mut list_metas: Vec<u8> = Vec::new();
        let mut keys: Vec<u64> = Vec::with_capacity(total);
        let mut locations: Vec<u8> = Vec::with_capacity(total * InvertedVecLocation::SIZE);
        let mut quant_records: Vec<u8> = Vec::new();
        let mut features: Vec<u8> = Vec::new();
        let mut total_blocks = 0usize;

        let mut row_scratch = vec![0u8; block_vecs * padded_element];
        let mut block_scratch = vec![0u8; block_size];

        for list in &self.lists {
            let list_offset = body.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            let id_offset = keys.len() as u32;
            let block_count = list.len().div_ceil(block_vecs);

            for chunk in list.chunks(block_vecs) {
                let block_offset = body.len() as u64;
                row_scratch.fill(0);
                for (slot, (_, vector)) in chunk.iter().enumerate() {
                    let row = &mut row_scratch[slot * padded_element..][..padded_element];
                    self.encode_row(vector, quantizer.as_ref(), row)?;
                }
                transpose(
                    unit,
                    &row_scratch,
                    block_vecs,
                    padded_element,
                    &mut block_scratch,
                );
                body.extend_from_slice(&block_scratch);
                total_blocks += 1;

                for slot in 0..chunk.len() {
                    let loc = InvertedVecLocation {
                        offset: block_offset + (slot * unit) as u64,
                        column_major: 1,
                    };
                    locations.extend_from_slice(&loc.encode());
                }
            }

            for (key, vector) in list {
                keys.push(*key);
                if self.options.with_features {
                    for v in vector {
                        features.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }

            #[allow(clippy::cast_possible_truncation)]
            let list_meta = InvertedListMeta {
                id_offset,
                vector_count: list.len() as u32,
                block_count: block_count as u32,
                offset: list_offset,
            };
            list_metas.extend_from_slice(&list_meta.encode());

            if let Some(quantizer) = &quantizer {
                let record = InvertedQuantizerParams {
                    scale: quantizer.scale(),
                    bias: quantizer.bias(),
                    min: quantizer.min(),
                    max: quantizer.max(),
                };
                quant_records.extend_from_slice(&record.encode());
            }
        }

        let mut sorted_keys = keys.clone();
        let mapping = sort_with_mapping(&mut sorted_keys);
        let mapping_bytes: Vec<u8> = mapping.iter().flat_map(|id| id.to_le_bytes()).collect();
        let key_bytes: Vec<u8> = keys.iter().flat_map(|k| k.to_le_bytes()).collect();

        #[allow(clippy::cast_possible_truncation)]
        let header = IvfHeader {
            header_size: (IvfHeader::SIZE + meta_bytes.len()) as u32,
            index_meta_size: meta_bytes.len() as u32,
            inverted_list_count: self.centroids.len() as u32,
            block_count: total_blocks as u32,
            block_vector_count: block_vecs as u32,
            block_size: block_size as u32,
            total_vector_count: total as u32,
            inverted_body_size: body.len() as u64,
        };
        let mut header_bytes = Vec::with_capacity(IvfHeader::SIZE + meta_bytes.len());
        header_bytes.extend_from_slice(&header.encode());
        header_bytes.extend_from_slice(&meta_bytes);

        let mut storage = MemIndexStorage::new();
        storage.put(IVF_INVERTED_HEADER_SEG_ID, header_bytes);
        storage.put(IVF_INVERTED_BODY_SEG_ID, body);
        storage.put(IVF_INVERTED_META_SEG_ID, list_metas);
        storage.put(IVF_KEYS_SEG_ID, key_bytes);
        storage.put(IVF_OFFSETS_SEG_ID, locations);
        storage.put(IVF_MAPPING_SEG_ID, mapping_bytes);
        if !quant_records.is_empty() {
            let seg_id = match data_type {
                DataType::Int8 => IVF_INT8_QUANTIZED_PARAMS_SEG_ID,
                _ => IVF_INT4_QUANTIZED_PARAMS_SEG_ID,
            };
            storage.put(seg_id, quant_records);
        }
        if self.options.with_features {
            storage.put(IVF_FEATURES_SEG_ID, features);
        }
        // The centroid rows ride along for the sub-searcher.
        storage.put(
            CENTROIDS_SEG_ID,
            self.centroids
                .iter()
                .flatten()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>(),
        );

        Ok(storage)
    }

    /// Trains the global quantizer (integer codes only) and stamps its
    /// parameters into the reformer meta.
    fn train_quantizer(&self, meta: &mut IndexMeta) -> Result<Option<TrainedQuantizer>> {
        if self.meta.data_type() == DataType::Fp32 {
            return Ok(None);
        }

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for (_, vector) in self.lists.iter().flatten() {
            for &v in vector {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if min > max {
            return Err(Error::invalid_argument("cannot quantize an empty index"));
        }

        let trained = match self.meta.data_type() {
            DataType::Int8 => {
                let mut quantizer = EntropyInt8Quantizer::new();
                quantizer.set_non_bias(true);
                quantizer.set_min(min);
                quantizer.set_max(max);
                for (_, vector) in self.lists.iter().flatten() {
                    if !quantizer.feed(vector) {
                        return Err(Error::Runtime("quantizer feed failed".to_string()));
                    }
                }
                if !quantizer.train() {
                    return Err(Error::Runtime("quantizer training failed".to_string()));
                }
                let params = meta.reformer_params_mut();
                params.set_f32(INT8_QUANTIZER_REFORMER_SCALE, quantizer.scale());
                params.set_f32(INT8_QUANTIZER_REFORMER_BIAS, quantizer.bias());
                let params = params.clone();
                *meta = meta.clone().with_reformer(INT8_REFORMER_NAME, params);
                TrainedQuantizer::Int8(quantizer)
            }
            DataType::Int4 => {
                let mut quantizer = EntropyInt4Quantizer::new();
                quantizer.set_non_bias(true);
                quantizer.set_min(min);
                quantizer.set_max(max);
                for (_, vector) in self.lists.iter().flatten() {
                    if !quantizer.feed(vector) {
                        return Err(Error::Runtime("quantizer feed failed".to_string()));
                    }
                }
                if !quantizer.train() {
                    return Err(Error::Runtime("quantizer training failed".to_string()));
                }
                let params = meta.reformer_params_mut();
                params.set_f32(INT4_QUANTIZER_REFORMER_SCALE, quantizer.scale());
                params.set_f32(INT4_QUANTIZER_REFORMER_BIAS, quantizer.bias());
                let params = params.clone();
                *meta = meta.clone().with_reformer(INT4_REFORMER_NAME, params);
                TrainedQuantizer::Int4(quantizer)
            }
            _ => unreachable!("validated in new"),
        };
        Ok(Some(trained))
    }

    fn encode_row(
        &self,
        vector: &[f32],
        quantizer: Option<&TrainedQuantizer>,
        out: &mut [u8],
    ) -> Result<()> {
        match (self.meta.data_type(), quantizer) {
            (DataType::Fp32, _) => {
                for (i, v) in vector.iter().enumerate() {
                    out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
                Ok(())
            }
            (DataType::Int8, Some(TrainedQuantizer::Int8(quantizer))) => {
                let mut codes = vec![0i8; vector.len()];
                quantizer.encode(vector, &mut codes);
                #[allow(clippy::cast_sign_loss)]
                for (i, c) in codes.iter().enumerate() {
                    out[i] = *c as u8;
                }
                Ok(())
            }
            (DataType::Int4, Some(TrainedQuantizer::Int4(quantizer))) => {
                let mut codes = vec![0u8; vector.len() / 2];
                quantizer.encode(vector, &mut codes);
                out[..codes.len()].copy_from_slice(&codes);
                Ok(())
            }
            _ => Err(Error::Runtime("missing trained quantizer".to_string())),
        }
    }
}

/// Segment id of the centroid rows the builder stashes for the
/// sub-searcher.
pub const CENTROIDS_SEG_ID: &str = "centroids";

enum TrainedQuantizer {
    Int8(EntropyInt8Quantizer),
    Int4(EntropyInt4Quantizer),
}

impl TrainedQuantizer {
    fn scale(&self) -> f32 {
        match self {
            TrainedQuantizer::Int8(q) => q.scale(),
            TrainedQuantizer::Int4(q) => q.scale(),
        }
    }

    fn bias(&self) -> f32 {
        match self {
            TrainedQuantizer::Int8(q) => q.bias(),
            TrainedQuantizer::Int4(q) => q.bias(),
        }
    }

    fn min(&self) -> f32 {
        match self {
            TrainedQuantizer::Int8(q) => q.min(),
            TrainedQuantizer::Int4(q) => q.min(),
        }
    }

    fn max(&self) -> f32 {
        match self {
            TrainedQuantizer::Int8(q) => q.max(),
            TrainedQuantizer::Int4(q) => q.max(),
        }
    }
}

/// Reads the centroid rows back out of a built container.
pub fn load_centroids(
    storage: &dyn crate::storage::IndexStorage,
    dimension: usize,
) -> Result<Vec<f32>> {
    let segment = storage
        .get(CENTROIDS_SEG_ID)
        .ok_or_else(|| Error::invalid_format("missing centroids segment"))?;
    let bytes: Bytes = segment.read(0, segment.data_size())?;
    if dimension == 0 || bytes.len() % (dimension * 4) != 0 {
        return Err(Error::invalid_format("centroid segment size mismatch"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
