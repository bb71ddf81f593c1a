//! Index metadata: element types, metrics and the serialized meta blob
//! embedded in the IVF header segment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a stored vector.
///
/// The packed 4-bit types store two lanes per byte, low lane in bits `[0..3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 32-bit IEEE float.
    Fp32,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 4-bit integer, two lanes per byte.
    Int4,
    /// Unsigned 4-bit integer, two lanes per byte.
    Uint4,
}

impl DataType {
    /// Byte size of one vector of `dimension` elements of this type.
    #[must_use]
    pub fn element_size(self, dimension: usize) -> usize {
        match self {
            DataType::Fp32 => dimension * 4,
            DataType::Int16 | DataType::Uint16 => dimension * 2,
            DataType::Int8 | DataType::Uint8 => dimension,
            DataType::Int4 | DataType::Uint4 => dimension.div_ceil(2),
        }
    }

    /// Transpose granularity in bytes: the word size at which column-major
    /// blocks interleave vectors.
    #[must_use]
    pub fn align_size(self) -> usize {
        match self {
            DataType::Int16 | DataType::Uint16 => 2,
            _ => 4,
        }
    }

    /// Whether two logical elements share one byte.
    #[must_use]
    pub fn is_packed(self) -> bool {
        matches!(self, DataType::Int4 | DataType::Uint4)
    }
}

/// Distance metric registry.
///
/// Metric instances are resolved by name at load time; an unknown name is a
/// `NoExist` error, matching the plugin-factory contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// `sqrt(sum((a - b)^2))`
    Euclidean,
    /// `sum((a - b)^2)`
    SquaredEuclidean,
    /// `sum(|a - b|)`
    Manhattan,
    /// `sum(a * b)`
    InnerProduct,
    /// `-sum(a * b)`, so that smaller is better.
    MinusInnerProduct,
}

impl MetricKind {
    /// Resolves a metric by its registered name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "Euclidean" => Ok(MetricKind::Euclidean),
            "SquaredEuclidean" => Ok(MetricKind::SquaredEuclidean),
            "Manhattan" => Ok(MetricKind::Manhattan),
            "InnerProduct" => Ok(MetricKind::InnerProduct),
            "MinusInnerProduct" => Ok(MetricKind::MinusInnerProduct),
            other => Err(Error::NoExist(format!("metric {other}"))),
        }
    }

    /// Registered name of the metric.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Euclidean => "Euclidean",
            MetricKind::SquaredEuclidean => "SquaredEuclidean",
            MetricKind::Manhattan => "Manhattan",
            MetricKind::InnerProduct => "InnerProduct",
            MetricKind::MinusInnerProduct => "MinusInnerProduct",
        }
    }

    /// Whether per-list score normalizers take a square root for this metric.
    #[must_use]
    pub fn normalizes_by_sqrt(self) -> bool {
        matches!(self, MetricKind::Euclidean | MetricKind::Manhattan)
    }
}

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
    /// Single-precision float.
    F32(f32),
    /// Free-form string.
    Str(String),
}

/// String-keyed parameter map carried by metas and searcher contexts.
///
/// Lookups are loosely typed: numeric values convert between widths, and a
/// missing key yields the caller-provided default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Creates an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Inserts a float parameter.
    pub fn set_f32(&mut self, key: impl Into<String>, value: f32) -> &mut Self {
        self.set(key, ParamValue::F32(value))
    }

    /// Inserts an unsigned integer parameter.
    pub fn set_u32(&mut self, key: impl Into<String>, value: u32) -> &mut Self {
        self.set(key, ParamValue::U32(value))
    }

    /// Whether the key is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Reads a parameter as `f32`, or 0.0 when absent.
    #[must_use]
    pub fn get_as_f32(&self, key: &str) -> f32 {
        match self.0.get(key) {
            Some(ParamValue::F32(v)) => *v,
            #[allow(clippy::cast_precision_loss)]
            Some(ParamValue::U32(v)) => *v as f32,
            #[allow(clippy::cast_precision_loss)]
            Some(ParamValue::U64(v)) => *v as f32,
            _ => 0.0,
        }
    }

    /// Reads a parameter as `u32`, or `default` when absent.
    #[must_use]
    pub fn get_as_u32(&self, key: &str, default: u32) -> u32 {
        match self.0.get(key) {
            Some(ParamValue::U32(v)) => *v,
            Some(ParamValue::U64(v)) => u32::try_from(*v).unwrap_or(default),
            _ => default,
        }
    }

    /// Reads a parameter as a string slice, or `""` when absent.
    #[must_use]
    pub fn get_as_str(&self, key: &str) -> &str {
        match self.0.get(key) {
            Some(ParamValue::Str(v)) => v.as_str(),
            _ => "",
        }
    }
}

/// Immutable description of one index: metric, element layout and the
/// reformer used to adapt queries to stored codes.
///
/// Serialized with a stable binary layout into the header segment; set at
/// index creation and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    metric_name: String,
    data_type: DataType,
    dimension: usize,
    reformer_name: String,
    metric_params: Params,
    reformer_params: Params,
}

impl IndexMeta {
    /// Creates a meta with no reformer.
    #[must_use]
    pub fn new(metric: MetricKind, data_type: DataType, dimension: usize) -> Self {
        Self {
            metric_name: metric.name().to_string(),
            data_type,
            dimension,
            reformer_name: String::new(),
            metric_params: Params::new(),
            reformer_params: Params::new(),
        }
    }

    /// Sets the reformer name and parameters.
    #[must_use]
    pub fn with_reformer(mut self, name: &str, params: Params) -> Self {
        self.reformer_name = name.to_string();
        self.reformer_params = params;
        self
    }

    /// Metric name, e.g. `"Euclidean"`.
    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Element type of stored vectors.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Logical dimension (element count) of stored vectors.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Byte size of one stored vector.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.data_type.element_size(self.dimension)
    }

    /// Reformer name; empty when queries need no adaptation.
    #[must_use]
    pub fn reformer_name(&self) -> &str {
        &self.reformer_name
    }

    /// Reformer parameters.
    #[must_use]
    pub fn reformer_params(&self) -> &Params {
        &self.reformer_params
    }

    /// Mutable reformer parameters (builder side).
    pub fn reformer_params_mut(&mut self) -> &mut Params {
        &mut self.reformer_params
    }

    /// Metric parameters.
    #[must_use]
    pub fn metric_params(&self) -> &Params {
        &self.metric_params
    }

    /// Serializes the meta into its header-segment byte form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Runtime(format!("serialize meta: {e}")))
    }

    /// Deserializes a meta from header-segment bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::InvalidFormat(format!("deserialize meta: {e}")))
    }
}
