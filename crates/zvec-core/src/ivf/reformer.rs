//! Reformer wrapper: adapts a float query to the element type of stored
//! codes and restores score scale on the way out.
//!
//! The five behaviors are a closed set, so they live in a tagged enum; only
//! the open plugin slot goes through the `Reformer` trait.

use std::sync::Arc;

use crate::constants::{
    INT4_QUANTIZER_REFORMER_BIAS, INT4_QUANTIZER_REFORMER_SCALE, INT4_REFORMER_NAME,
    INT8_QUANTIZER_REFORMER_BIAS, INT8_QUANTIZER_REFORMER_SCALE, INT8_REFORMER_NAME,
};
use crate::error::{Error, Result};
use crate::ivf::heap::TopkHeap;
use crate::meta::{DataType, IndexMeta, Params};

/// A query transformed into the element domain of the stored codes.
#[derive(Debug, Clone, Copy)]
pub enum QueryData<'a> {
    /// Untransformed float query.
    F32(&'a [f32]),
    /// Signed byte codes.
    I8(&'a [i8]),
    /// Packed 4-bit codes.
    I4(&'a [u8]),
}

/// Query-side transform plugin, needed only for the open `Default` slot and
/// the delegating integer reformers.
pub trait Reformer: Send + Sync {
    /// Transforms `count` row-major queries into `out`, returning the code
    /// element type.
    fn transform(
        &self,
        queries: &[f32],
        dimension: usize,
        count: usize,
        out: &mut Vec<u8>,
    ) -> Result<DataType>;

    /// Restores the score scale over a finished heap.
    fn normalize(&self, heap: &mut TopkHeap);
}

/// Affine INT8 code reformer configured by the global `(scale, bias)`.
struct Int8QuantizerReformer {
    scale: f32,
    bias: f32,
}

impl Reformer for Int8QuantizerReformer {
    fn transform(
        &self,
        queries: &[f32],
        dimension: usize,
        count: usize,
        out: &mut Vec<u8>,
    ) -> Result<DataType> {
        out.clear();
        out.reserve(count * dimension);
        for &v in &queries[..count * dimension] {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let code = ((v + self.bias) * self.scale)
                .clamp(-127.0, 127.0)
                .round() as i32;
            out.push(code as u8);
        }
        Ok(DataType::Int8)
    }

    fn normalize(&self, _heap: &mut TopkHeap) {}
}

/// Affine packed INT4 code reformer.
struct Int4QuantizerReformer {
    scale: f32,
    bias: f32,
}

impl Reformer for Int4QuantizerReformer {
    fn transform(
        &self,
        queries: &[f32],
        dimension: usize,
        count: usize,
        out: &mut Vec<u8>,
    ) -> Result<DataType> {
        if dimension % 2 != 0 {
            return Err(Error::invalid_argument(
                "packed INT4 needs an even dimension",
            ));
        }
        out.clear();
        out.reserve(count * dimension / 2);
        for q in 0..count {
            let row = &queries[q * dimension..(q + 1) * dimension];
            for pair in row.chunks_exact(2) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let lo = ((pair[0] + self.bias) * self.scale)
                    .clamp(-8.0, 7.0)
                    .round() as i32;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let hi = ((pair[1] + self.bias) * self.scale)
                    .clamp(-8.0, 7.0)
                    .round() as i32;
                out.push(((hi as u8) << 4) | (lo as u8 & 0xF));
            }
        }
        Ok(DataType::Int4)
    }

    fn normalize(&self, _heap: &mut TopkHeap) {}
}

/// Resolves a reformer plugin by its registered name.
pub fn create_reformer(name: &str, params: &Params) -> Result<Arc<dyn Reformer>> {
    match name {
        INT8_REFORMER_NAME => Ok(Arc::new(Int8QuantizerReformer {
            scale: params.get_as_f32(INT8_QUANTIZER_REFORMER_SCALE),
            bias: params.get_as_f32(INT8_QUANTIZER_REFORMER_BIAS),
        })),
        INT4_REFORMER_NAME => Ok(Arc::new(Int4QuantizerReformer {
            scale: params.get_as_f32(INT4_QUANTIZER_REFORMER_SCALE),
            bias: params.get_as_f32(INT4_QUANTIZER_REFORMER_BIAS),
        })),
        other => Err(Error::NoExist(format!("reformer {other}"))),
    }
}

/// Which of the five behaviors a wrapper runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReformerKind {
    /// Identity: the query is used as-is.
    None,
    /// Per-query max-abs INT8 scaling for inner-product indexes.
    InnerProductInt8,
    /// Per-query dynamic-range INT4 scaling for inner-product indexes.
    InnerProductInt4,
    /// Global-scale INT8 codes; scores denormalize by a fixed reciprocal.
    Int8,
    /// Global-scale INT4 codes.
    Int4,
    /// Open plugin slot.
    Default,
}

/// Immutable reformer resolution shared by an entity; wrappers are stamped
/// from it per searcher context.
#[derive(Clone)]
pub struct ReformerConfig {
    kind: ReformerKind,
    plugin: Option<Arc<dyn Reformer>>,
    reciprocal: f32,
}

impl ReformerConfig {
    /// Resolves the wrapper behavior from the index meta.
    pub fn from_meta(meta: &IndexMeta) -> Result<Self> {
        let name = meta.reformer_name();
        if name.is_empty() {
            return Ok(Self {
                kind: ReformerKind::None,
                plugin: None,
                reciprocal: 1.0,
            });
        }

        let plugin = create_reformer(name, meta.reformer_params())?;
        let is_ip = meta.metric_name() == "InnerProduct";

        let (kind, scale_key) = match name {
            INT8_REFORMER_NAME if is_ip => {
                return Ok(Self {
                    kind: ReformerKind::InnerProductInt8,
                    plugin: Some(plugin),
                    reciprocal: 1.0,
                })
            }
            INT4_REFORMER_NAME if is_ip => {
                return Ok(Self {
                    kind: ReformerKind::InnerProductInt4,
                    plugin: Some(plugin),
                    reciprocal: 1.0,
                })
            }
            INT8_REFORMER_NAME => (ReformerKind::Int8, INT8_QUANTIZER_REFORMER_SCALE),
            INT4_REFORMER_NAME => (ReformerKind::Int4, INT4_QUANTIZER_REFORMER_SCALE),
            _ => {
                return Ok(Self {
                    kind: ReformerKind::Default,
                    plugin: Some(plugin),
                    reciprocal: 1.0,
                })
            }
        };

        if !meta.reformer_params().has(scale_key) {
            tracing::error!(reformer = name, param = scale_key, "missing reformer param");
            return Err(Error::invalid_argument(format!(
                "missing param {scale_key} in reformer {name}"
            )));
        }
        let scale = meta.reformer_params().get_as_f32(scale_key);
        let reciprocal = if scale == 0.0 { 1.0 } else { 1.0 / scale };
        Ok(Self {
            kind,
            plugin: Some(plugin),
            reciprocal,
        })
    }

    /// Wrapper behavior.
    #[must_use]
    pub fn kind(&self) -> ReformerKind {
        self.kind
    }

    /// Fixed denormalization factor of the `Int8`/`Int4` kinds.
    #[must_use]
    pub fn reciprocal(&self) -> f32 {
        self.reciprocal
    }

    /// Stamps a wrapper with fresh per-invocation buffers.
    #[must_use]
    pub fn make_wrapper(&self) -> ReformerWrapper {
        ReformerWrapper {
            config: self.clone(),
            buffer: Vec::new(),
            scales: Vec::new(),
        }
    }
}

/// Per-context reformer state: the transform buffer and per-query scales.
///
/// Not shareable across threads mid-search; every searcher context owns one.
pub struct ReformerWrapper {
    config: ReformerConfig,
    buffer: Vec<u8>,
    scales: Vec<f32>,
}

impl ReformerWrapper {
    /// Wrapper behavior.
    #[must_use]
    pub fn kind(&self) -> ReformerKind {
        self.config.kind
    }

    /// Per-query scales recorded by the last transform.
    #[must_use]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Transforms one query.
    pub fn transform<'a>(&'a mut self, query: &'a [f32], dimension: usize) -> Result<QueryData<'a>> {
        self.transform_batch(query, dimension, 1)
    }

    /// Transforms `count` row-major queries.
    pub fn transform_batch<'a>(
        &'a mut self,
        queries: &'a [f32],
        dimension: usize,
        count: usize,
    ) -> Result<QueryData<'a>> {
        if queries.len() < dimension * count {
            return Err(Error::invalid_argument("query buffer too small"));
        }

        match self.config.kind {
            ReformerKind::None => Ok(QueryData::F32(queries)),
            ReformerKind::InnerProductInt8 => {
                self.scales.resize(count, 0.0);
                self.buffer.clear();
                self.buffer.resize(count * dimension, 0);
                for q in 0..count {
                    let row = &queries[q * dimension..(q + 1) * dimension];
                    let scale = transform_ip_int8(row, &mut self.buffer[q * dimension..]);
                    self.scales[q] = scale;
                }
                Ok(QueryData::I8(as_i8(&self.buffer)))
            }
            ReformerKind::InnerProductInt4 => {
                if dimension % 2 != 0 {
                    return Err(Error::invalid_argument(
                        "packed INT4 needs an even dimension",
                    ));
                }
                self.scales.resize(count, 0.0);
                self.buffer.clear();
                self.buffer.resize(count * dimension / 2, 0);
                for q in 0..count {
                    let row = &queries[q * dimension..(q + 1) * dimension];
                    let scale = transform_ip_int4(row, &mut self.buffer[q * dimension / 2..]);
                    self.scales[q] = scale;
                }
                Ok(QueryData::I4(&self.buffer))
            }
            ReformerKind::Int8 | ReformerKind::Int4 | ReformerKind::Default => {
                let plugin = self
                    .config
                    .plugin
                    .as_ref()
                    .ok_or_else(|| Error::Runtime("reformer plugin missing".to_string()))?;
                let dtype = plugin.transform(queries, dimension, count, &mut self.buffer)?;
                Ok(match dtype {
                    DataType::Int8 => QueryData::I8(as_i8(&self.buffer)),
                    DataType::Int4 | DataType::Uint4 => QueryData::I4(&self.buffer),
                    _ => {
                        return Err(Error::Unsupported(format!(
                            "reformer produced {dtype:?} codes"
                        )))
                    }
                })
            }
        }
    }

    /// GPU-path transform: the INT4 inner-product kind intentionally runs
    /// through the INT8 buffer for the GPU back-end.
    pub fn transform_for_gpu<'a>(
        &'a mut self,
        queries: &'a [f32],
        dimension: usize,
        count: usize,
    ) -> Result<QueryData<'a>> {
        match self.config.kind {
            ReformerKind::None | ReformerKind::Default => Ok(QueryData::F32(queries)),
            ReformerKind::InnerProductInt4 | ReformerKind::InnerProductInt8 => {
                self.scales.resize(count, 0.0);
                self.buffer.clear();
                self.buffer.resize(count * dimension, 0);
                for q in 0..count {
                    let row = &queries[q * dimension..(q + 1) * dimension];
                    let scale = transform_ip_int8(row, &mut self.buffer[q * dimension..]);
                    self.scales[q] = scale;
                }
                Ok(QueryData::I8(as_i8(&self.buffer)))
            }
            ReformerKind::Int8 | ReformerKind::Int4 => {
                self.transform_batch(queries, dimension, count)
            }
        }
    }

    /// Denormalizes every heap score for query `qidx` per the kind table.
    pub fn normalize(&self, qidx: usize, heap: &mut TopkHeap) {
        match self.config.kind {
            ReformerKind::None => {}
            ReformerKind::InnerProductInt8 | ReformerKind::InnerProductInt4 => {
                debug_assert!(qidx < self.scales.len(), "invalid query index");
                let reciprocal = 1.0 / self.scales[qidx];
                for doc in heap.iter_mut() {
                    doc.score *= reciprocal;
                }
            }
            ReformerKind::Int8 | ReformerKind::Int4 => {
                for doc in heap.iter_mut() {
                    doc.score *= self.config.reciprocal;
                }
            }
            ReformerKind::Default => {
                if let Some(plugin) = &self.config.plugin {
                    plugin.normalize(heap);
                }
            }
        }
    }
}

/// Per-query max-abs INT8 transform; returns the scale (or `+inf` for an
/// all-zero query, which encodes as ones).
fn transform_ip_int8(input: &[f32], out: &mut [u8]) -> f32 {
    let mut abs_max = 0.0f32;
    for &v in input {
        abs_max = abs_max.max(v.abs());
    }

    if abs_max > 0.0 {
        let scale = 127.0 / abs_max;
        for (i, &v) in input.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let code = (v * scale).round() as i32;
            out[i] = code as u8;
        }
        scale
    } else {
        for slot in out.iter_mut().take(input.len()) {
            *slot = 1;
        }
        f32::MAX
    }
}

/// Per-query INT4 transform with the dynamic 7-vs-8 range choice; all-zero
/// queries encode as 0x9 bytes with an infinite scale.
fn transform_ip_int4(input: &[f32], out: &mut [u8]) -> f32 {
    debug_assert_eq!(input.len() % 2, 0, "invalid dim");

    let mut abs_max = 0.0f32;
    let mut max = f32::MIN;
    for &v in input {
        abs_max = abs_max.max(v.abs());
        max = max.max(v);
    }

    if abs_max > 0.0 {
        let range = if 7.0 * abs_max > 8.0 * max { 8.0 } else { 7.0 };
        let scale = range / abs_max;
        for (i, pair) in input.chunks_exact(2).enumerate() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let v1 = (pair[0] * scale).round() as i32;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let v2 = (pair[1] * scale).round() as i32;
            out[i] = (v1 as u8 & 0xF) | ((v2 as u8) << 4);
        }
        scale
    } else {
        for slot in out.iter_mut().take(input.len() / 2) {
            *slot = 9;
        }
        f32::MAX
    }
}

fn as_i8(bytes: &[u8]) -> &[i8] {
    // SAFETY: i8 and u8 have identical size and alignment.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast(), bytes.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetricKind;

    fn ip_meta(reformer: &str) -> IndexMeta {
        IndexMeta::new(MetricKind::InnerProduct, DataType::Int8, 8)
            .with_reformer(reformer, Params::new())
    }

    #[test]
    fn test_kind_resolution() {
        let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Fp32, 8);
        assert_eq!(
            ReformerConfig::from_meta(&meta).unwrap().kind(),
            ReformerKind::None
        );

        assert_eq!(
            ReformerConfig::from_meta(&ip_meta(INT8_REFORMER_NAME))
                .unwrap()
                .kind(),
            ReformerKind::InnerProductInt8
        );
        assert_eq!(
            ReformerConfig::from_meta(&ip_meta(INT4_REFORMER_NAME))
                .unwrap()
                .kind(),
            ReformerKind::InnerProductInt4
        );

        let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Fp32, 8)
            .with_reformer("NoSuchReformer", Params::new());
        assert!(matches!(
            ReformerConfig::from_meta(&meta),
            Err(Error::NoExist(_))
        ));
    }

    #[test]
    fn test_int8_kind_requires_scale_param() {
        let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Int8, 8)
            .with_reformer(INT8_REFORMER_NAME, Params::new());
        assert!(matches!(
            ReformerConfig::from_meta(&meta),
            Err(Error::InvalidArgument(_))
        ));

        let mut params = Params::new();
        params.set_f32(INT8_QUANTIZER_REFORMER_SCALE, 4.0);
        let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Int8, 8)
            .with_reformer(INT8_REFORMER_NAME, params);
        let config = ReformerConfig::from_meta(&meta).unwrap();
        assert_eq!(config.kind(), ReformerKind::Int8);
        assert_eq!(config.reciprocal(), 0.25);
    }

    #[test]
    fn test_ip_int8_transform_records_scale() {
        let config = ReformerConfig::from_meta(&ip_meta(INT8_REFORMER_NAME)).unwrap();
        let mut wrapper = config.make_wrapper();

        let query = [0.5f32, -1.0, 0.25, 0.0];
        let QueryData::I8(codes) = wrapper.transform(&query, 4).unwrap() else {
            panic!("expected i8 codes");
        };
        assert_eq!(codes, &[64, -127, 32, 0]);
        assert_eq!(wrapper.scales(), &[127.0]);
    }

    #[test]
    fn test_ip_int8_all_zero_query() {
        let config = ReformerConfig::from_meta(&ip_meta(INT8_REFORMER_NAME)).unwrap();
        let mut wrapper = config.make_wrapper();

        let query = [0.0f32; 4];
        let QueryData::I8(codes) = wrapper.transform(&query, 4).unwrap() else {
            panic!("expected i8 codes");
        };
        assert_eq!(codes, &[1, 1, 1, 1]);
        assert_eq!(wrapper.scales(), &[f32::MAX]);
    }

    #[test]
    fn test_ip_int4_range_choice() {
        let config = ReformerConfig::from_meta(&ip_meta(INT4_REFORMER_NAME)).unwrap();
        let mut wrapper = config.make_wrapper();

        // Mostly negative: 7 * abs_max > 8 * max, so the range stretches
        // to 8.
        let query = [-1.0f32, 0.1];
        let QueryData::I4(codes) = wrapper.transform(&query, 2).unwrap() else {
            panic!("expected packed codes");
        };
        let codes: Vec<u8> = codes.to_vec();
        assert_eq!(wrapper.scales(), &[8.0]);
        let lo = ((codes[0] << 4) as i8) >> 4;
        let hi = (codes[0] as i8) >> 4;
        assert_eq!(lo, -8);
        assert_eq!(hi, 1);
    }

    #[test]
    fn test_normalize_divides_by_query_scale() {
        let config = ReformerConfig::from_meta(&ip_meta(INT8_REFORMER_NAME)).unwrap();
        let mut wrapper = config.make_wrapper();
        let query = [1.0f32, 0.0];
        wrapper.transform(&query, 2).unwrap();
        assert_eq!(wrapper.scales(), &[127.0]);

        let mut heap = TopkHeap::new(4);
        heap.push(1, 254.0, 0);
        heap.push(2, 127.0, 1);
        wrapper.normalize(0, &mut heap);

        let mut scores: Vec<f32> = heap.iter().map(|d| d.score).collect();
        scores.sort_by(f32::total_cmp);
        assert_eq!(scores, vec![1.0, 2.0]);
    }

    #[test]
    fn test_gpu_transform_maps_int4_through_int8() {
        let config = ReformerConfig::from_meta(&ip_meta(INT4_REFORMER_NAME)).unwrap();
        let mut wrapper = config.make_wrapper();
        let query = [0.5f32, -0.25];
        let out = wrapper.transform_for_gpu(&query, 2, 1).unwrap();
        assert!(matches!(out, QueryData::I8(_)));
    }
}
