//! # zvec Core
//!
//! Vector search engine core: maintains collections of high-dimensional
//! records, persists them with durability guarantees, builds inverted-file
//! (IVF) approximate-nearest-neighbor indexes over them, and serves top-k
//! similarity queries with optional scalar filters.
//!
//! ## Features
//!
//! - **IVF index**: block-wise scans over column-major inverted lists with
//!   metric-aware score normalization
//! - **Integer quantization**: entropy-calibrated INT4/INT8/INT16 codes
//! - **SIMD distance kernels**: batched `batch x query` matrices for FP32,
//!   INT8 and packed INT4, with MIPS injection reductions
//! - **Durable ingest**: CRC-framed write-ahead log and an Arrow/Parquet
//!   columnar forward store
//! - **Filtered search**: fixed and sparse bitmaps as filter vectors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zvec_core::ivf::{CentroidSearcher, IvfBuilder, IvfBuilderOptions, IvfEntity, IvfSearcher, IvfSearcherContext};
//! use zvec_core::meta::{DataType, IndexMeta, MetricKind, Params};
//!
//! fn main() -> zvec_core::Result<()> {
//!     let meta = IndexMeta::new(MetricKind::Euclidean, DataType::Fp32, 2);
//!     let centroids = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
//!     let mut builder = IvfBuilder::new(meta, centroids.clone(), IvfBuilderOptions::default())?;
//!     builder.add(1, &[0.5, 0.5])?;
//!     builder.add(2, &[9.5, 9.5])?;
//!
//!     let storage = builder.build()?;
//!     let entity = Arc::new(IvfEntity::load(&storage)?);
//!     let flat: Vec<f32> = centroids.into_iter().flatten().collect();
//!     let searcher = IvfSearcher::new(
//!         Arc::clone(&entity),
//!         CentroidSearcher::new(flat, 2, MetricKind::Euclidean)?,
//!     )?;
//!
//!     let mut ctx = IvfSearcherContext::new(entity);
//!     ctx.set_topk(1);
//!     searcher.search(&mut ctx, &[0.4, 0.6], None)?;
//!     assert_eq!(ctx.result(0)[0].key, 1);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod bitset;
pub mod constants;
pub mod error;
pub mod ivf;
pub mod meta;
pub mod pool;
pub mod quantizer;
pub mod simd;
pub mod storage;

pub use bitset::{Bitmap, FixedBitset};
pub use error::{Error, Result};
pub use ivf::{
    CentroidSearcher, Document, IndexFilter, IvfBuilder, IvfBuilderOptions, IvfEntity,
    IvfSearcher, IvfSearcherContext, SearchStats, TopkHeap,
};
pub use meta::{DataType, IndexMeta, MetricKind, ParamValue, Params};
pub use pool::{TaskControl, TaskGroup, ThreadPool};
pub use quantizer::{
    EntropyInt16Quantizer, EntropyInt4Quantizer, EntropyInt8Quantizer, EntropyQuantizer,
    EntropyUInt16Quantizer, EntropyUInt4Quantizer, EntropyUInt8Quantizer,
};
pub use storage::{
    CollectionSchema, Doc, FieldType, FieldValue, FileFormat, IndexStorage, LocalWalFile,
    MemForwardStore, MemIndexStorage, MmapIndexStorage, Segment, WalOptions,
};
