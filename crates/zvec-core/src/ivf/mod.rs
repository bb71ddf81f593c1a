//! Inverted-file vector index: on-disk layout, builder, entity and the
//! query-time searcher.

pub mod builder;
pub mod entity;
pub mod heap;
pub mod layout;
pub mod reformer;
pub mod searcher;
pub mod transpose;

pub use builder::{load_centroids, IvfBuilder, IvfBuilderOptions, CENTROIDS_SEG_ID};
pub use entity::{IndexFilter, IvfEntity, SearchStats, BATCH_BLOCKS};
pub use heap::{Document, TopkHeap};
pub use layout::{InvertedListMeta, InvertedQuantizerParams, InvertedVecLocation, IvfHeader};
pub use reformer::{create_reformer, QueryData, Reformer, ReformerConfig, ReformerKind, ReformerWrapper};
pub use searcher::{compute_scan_ratio, CentroidSearcher, IvfSearcher, IvfSearcherContext};
