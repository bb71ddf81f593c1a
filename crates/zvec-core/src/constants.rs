//! Shared constants: segment ids, reserved column names, sentinels and the
//! parameter keys recognized by the searcher.

/// Reserved primary key marking an invalid or deleted record slot.
pub const INVALID_KEY: u64 = u64::MAX;

/// Sentinel returned by key lookups when the key is absent.
pub const INVALID_ID: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// IVF container segment ids
// ---------------------------------------------------------------------------

/// Header segment: fixed header struct followed by the serialized index meta.
pub const IVF_INVERTED_HEADER_SEG_ID: &str = "inverted_header";
/// Concatenated block bytes for all inverted lists, ordered by list id.
pub const IVF_INVERTED_BODY_SEG_ID: &str = "inverted_body";
/// Array of per-list meta records.
pub const IVF_INVERTED_META_SEG_ID: &str = "inverted_meta";
/// `u64` primary keys in physical (local id) order.
pub const IVF_KEYS_SEG_ID: &str = "keys";
/// Per-vector location records (byte offset + layout flag).
pub const IVF_OFFSETS_SEG_ID: &str = "offsets";
/// Local ids sorted by their key, for binary search.
pub const IVF_MAPPING_SEG_ID: &str = "mapping";
/// Optional per-list INT8 quantizer parameter records.
pub const IVF_INT8_QUANTIZED_PARAMS_SEG_ID: &str = "int8_quantized_params";
/// Optional per-list INT4 quantizer parameter records.
pub const IVF_INT4_QUANTIZED_PARAMS_SEG_ID: &str = "int4_quantized_params";
/// Optional dense feature store for exact rescoring.
pub const IVF_FEATURES_SEG_ID: &str = "features";

// ---------------------------------------------------------------------------
// Searcher parameters
// ---------------------------------------------------------------------------

/// Below this vector count the searcher switches to a full scan.
pub const PARAM_IVF_SEARCHER_BRUTE_FORCE_THRESHOLD: &str =
    "proxima.ivf.searcher.brute_force_threshold";
/// Fraction of inverted lists to visit per query (must be > 0).
pub const PARAM_IVF_SEARCHER_SCAN_RATIO: &str = "proxima.ivf.searcher.scan_ratio";

/// Default scan ratio when none is configured.
pub const DEFAULT_SCAN_RATIO: f32 = 0.1;
/// Default brute-force threshold when none is configured.
pub const DEFAULT_BRUTE_FORCE_THRESHOLD: u32 = 1000;

// ---------------------------------------------------------------------------
// Reformer names and parameter keys
// ---------------------------------------------------------------------------

/// Registered name of the INT8 quantizer reformer.
pub const INT8_REFORMER_NAME: &str = "Int8QuantizerReformer";
/// Registered name of the INT4 quantizer reformer.
pub const INT4_REFORMER_NAME: &str = "Int4QuantizerReformer";

/// Global scale parameter of the INT8 reformer.
pub const INT8_QUANTIZER_REFORMER_SCALE: &str = "proxima.int8.reformer.scale";
/// Global bias parameter of the INT8 reformer.
pub const INT8_QUANTIZER_REFORMER_BIAS: &str = "proxima.int8.reformer.bias";
/// Global scale parameter of the INT4 reformer.
pub const INT4_QUANTIZER_REFORMER_SCALE: &str = "proxima.int4.reformer.scale";
/// Global bias parameter of the INT4 reformer.
pub const INT4_QUANTIZER_REFORMER_BIAS: &str = "proxima.int4.reformer.bias";

// ---------------------------------------------------------------------------
// Forward store reserved column names
// ---------------------------------------------------------------------------

/// Synthesized local row id column; never stored.
pub const LOCAL_ROW_ID: &str = "_zvec_row_id_";
/// User-visible primary key column (maps to `pk`).
pub const USER_ID: &str = "_zvec_user_id_";
/// Global document id column (maps to `doc_id`).
pub const GLOBAL_DOC_ID: &str = "_zvec_doc_id_";

// ---------------------------------------------------------------------------
// HNSW wiring defaults surfaced to collection callers
// ---------------------------------------------------------------------------

/// Default `ef_construction` for HNSW collections.
pub const DEFAULT_HNSW_EF_CONSTRUCTION: u32 = 500;
/// Default neighbor count for HNSW collections.
pub const DEFAULT_HNSW_NEIGHBOR_CNT: u32 = 50;
/// Default `ef_search` for HNSW collections.
pub const DEFAULT_HNSW_EF_SEARCH: u32 = 300;
