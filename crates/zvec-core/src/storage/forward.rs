//! Memory forward store: the authoritative columnar record of a collection's
//! scalar attributes.
//!
//! Rows buffer in an in-memory column cache until a byte threshold spills
//! them into immutable record batches; `flush` merges batches greedily and
//! appends them to the backing columnar file. Fetch and scan project by
//! column name, with the reserved names synthesized or remapped.

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float32Builder, Float64Builder, Int32Builder, Int64Builder,
    StringBuilder, UInt64Array, UInt64Builder,
};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use tracing::{error, info};

use super::columnar::{ChunkedFileWriter, FileFormat};
use crate::constants::{GLOBAL_DOC_ID, LOCAL_ROW_ID, USER_ID};
use crate::error::{Error, Result};

/// Largest row count a flushed record batch may hold; smaller neighbors are
/// merged up to this bound.
pub const MAX_RECORD_BATCH_NUM_ROWS: usize = 8192;

/// Scalar column type of a collection schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
}

impl FieldType {
    fn to_arrow(self) -> ArrowDataType {
        match self {
            FieldType::Int32 => ArrowDataType::Int32,
            FieldType::Int64 => ArrowDataType::Int64,
            FieldType::Float32 => ArrowDataType::Float32,
            FieldType::Float64 => ArrowDataType::Float64,
            FieldType::String => ArrowDataType::Utf8,
            FieldType::Bool => ArrowDataType::Boolean,
        }
    }
}

/// User-declared scalar columns of a collection, excluding the two leading
/// reserved columns.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    fields: Vec<(String, FieldType)>,
}

impl CollectionSchema {
    /// Creates a schema from `(name, type)` pairs in declared order.
    #[must_use]
    pub fn new(fields: Vec<(String, FieldType)>) -> Self {
        Self { fields }
    }

    /// Declared scalar fields.
    #[must_use]
    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    /// Physical arrow schema: `doc_id`, `pk`, then the declared fields.
    #[must_use]
    pub fn arrow_schema(&self) -> SchemaRef {
        let mut fields = Vec::with_capacity(2 + self.fields.len());
        fields.push(Field::new(GLOBAL_DOC_ID, ArrowDataType::UInt64, false));
        fields.push(Field::new(USER_ID, ArrowDataType::Utf8, false));
        for (name, ty) in &self.fields {
            fields.push(Field::new(name, ty.to_arrow(), true));
        }
        Arc::new(Schema::new(fields))
    }
}

/// One typed scalar value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Missing value.
    Null,
}

impl FieldValue {
    fn heap_bytes(&self) -> usize {
        match self {
            FieldValue::Str(s) => s.len() + 24,
            FieldValue::Int64(_) | FieldValue::Float64(_) => 8,
            FieldValue::Int32(_) | FieldValue::Float32(_) => 4,
            FieldValue::Bool(_) => 1,
            FieldValue::Null => 0,
        }
    }
}

/// One row of the forward store.
#[derive(Debug, Clone)]
pub struct Doc {
    doc_id: u64,
    pk: String,
    fields: Vec<FieldValue>,
}

impl Doc {
    /// Creates a row; `fields` follow the collection schema in declared
    /// order.
    #[must_use]
    pub fn new(doc_id: u64, pk: impl Into<String>, fields: Vec<FieldValue>) -> Self {
        Self {
            doc_id,
            pk: pk.into(),
            fields,
        }
    }

    /// Global document id.
    #[must_use]
    pub fn doc_id(&self) -> u64 {
        self.doc_id
    }

    /// User primary key.
    #[must_use]
    pub fn pk(&self) -> &str {
        &self.pk
    }

    /// Approximate resident size, used for the cache byte accounting.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        48 + self.pk.len() + self.fields.iter().map(FieldValue::heap_bytes).sum::<usize>()
    }
}

enum ColBuilder {
    U64(UInt64Builder),
    Str(StringBuilder),
    I32(Int32Builder),
    I64(Int64Builder),
    F32(Float32Builder),
    F64(Float64Builder),
    Bool(BooleanBuilder),
}

impl ColBuilder {
    fn for_type(ty: &ArrowDataType) -> Result<Self> {
        Ok(match ty {
            ArrowDataType::UInt64 => ColBuilder::U64(UInt64Builder::new()),
            ArrowDataType::Utf8 => ColBuilder::Str(StringBuilder::new()),
            ArrowDataType::Int32 => ColBuilder::I32(Int32Builder::new()),
            ArrowDataType::Int64 => ColBuilder::I64(Int64Builder::new()),
            ArrowDataType::Float32 => ColBuilder::F32(Float32Builder::new()),
            ArrowDataType::Float64 => ColBuilder::F64(Float64Builder::new()),
            ArrowDataType::Boolean => ColBuilder::Bool(BooleanBuilder::new()),
            other => {
                return Err(Error::Unsupported(format!(
                    "forward store column type {other}"
                )))
            }
        })
    }

    fn append(&mut self, value: &FieldValue) -> Result<()> {
        match (self, value) {
            (ColBuilder::I32(b), FieldValue::Int32(v)) => b.append_value(*v),
            (ColBuilder::I64(b), FieldValue::Int64(v)) => b.append_value(*v),
            (ColBuilder::F32(b), FieldValue::Float32(v)) => b.append_value(*v),
            (ColBuilder::F64(b), FieldValue::Float64(v)) => b.append_value(*v),
            (ColBuilder::Str(b), FieldValue::Str(v)) => b.append_value(v),
            (ColBuilder::Bool(b), FieldValue::Bool(v)) => b.append_value(*v),
            (ColBuilder::I32(b), FieldValue::Null) => b.append_null(),
            (ColBuilder::I64(b), FieldValue::Null) => b.append_null(),
            (ColBuilder::F32(b), FieldValue::Null) => b.append_null(),
            (ColBuilder::F64(b), FieldValue::Null) => b.append_null(),
            (ColBuilder::Str(b), FieldValue::Null) => b.append_null(),
            (ColBuilder::Bool(b), FieldValue::Null) => b.append_null(),
            (_, value) => {
                return Err(Error::invalid_argument(format!(
                    "field value {value:?} does not match the column type"
                )))
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColBuilder::U64(b) => Arc::new(b.finish()),
            ColBuilder::Str(b) => Arc::new(b.finish()),
            ColBuilder::I32(b) => Arc::new(b.finish()),
            ColBuilder::I64(b) => Arc::new(b.finish()),
            ColBuilder::F32(b) => Arc::new(b.finish()),
            ColBuilder::F64(b) => Arc::new(b.finish()),
            ColBuilder::Bool(b) => Arc::new(b.finish()),
        }
    }
}

struct StoreState {
    cache: Vec<Doc>,
    cache_bytes: usize,
    batches: Vec<RecordBatch>,
    flushed_batches: usize,
    writer: Option<ChunkedFileWriter>,
    num_rows: u64,
}

/// In-memory forward store spilling to a columnar file.
pub struct MemForwardStore {
    schema: SchemaRef,
    path: PathBuf,
    format: FileFormat,
    max_cache_bytes: usize,
    state: Mutex<StoreState>,
}

impl MemForwardStore {
    /// Creates a store over `schema`, spilling to `path` in `format`.
    ///
    /// The row cache flushes into a record batch at `max_buffer_size / 100`
    /// bytes.
    #[must_use]
    pub fn new(
        schema: &CollectionSchema,
        path: impl Into<PathBuf>,
        format: FileFormat,
        max_buffer_size: u32,
    ) -> Self {
        Self {
            schema: schema.arrow_schema(),
            path: path.into(),
            format,
            max_cache_bytes: (max_buffer_size / 100) as usize,
            state: Mutex::new(StoreState {
                cache: Vec::with_capacity(128),
                cache_bytes: 0,
                batches: Vec::new(),
                flushed_batches: 0,
                writer: None,
                num_rows: 0,
            }),
        }
    }

    /// Opens the backing columnar file for writing.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.writer.is_some() {
            return Err(Error::StatusError("forward store already open".to_string()));
        }
        state.writer = Some(ChunkedFileWriter::open(
            &self.path,
            &self.schema,
            self.format,
        )?);
        Ok(())
    }

    /// Physical schema of the store.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Total inserted row count.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.state.lock().num_rows
    }

    /// Appends a row, spilling the cache into a batch past the byte
    /// threshold.
    pub fn insert(&self, doc: Doc) -> Result<()> {
        if doc.fields.len() != self.schema.fields().len() - 2 {
            return Err(Error::invalid_argument(format!(
                "row has {} fields, schema expects {}",
                doc.fields.len(),
                self.schema.fields().len() - 2
            )));
        }

        let mut state = self.state.lock();
        state.cache_bytes += doc.memory_usage();
        state.cache.push(doc);
        state.num_rows += 1;
        if state.cache_bytes < self.max_cache_bytes {
            return Ok(());
        }

        let batch = self.cache_to_batch(&state.cache)?;
        if batch.num_rows() > 0 {
            state.batches.push(batch);
        }
        state.cache.clear();
        state.cache_bytes = 0;
        Ok(())
    }

    fn cache_to_batch(&self, docs: &[Doc]) -> Result<RecordBatch> {
        let mut builders: Vec<ColBuilder> = self
            .schema
            .fields()
            .iter()
            .map(|f| ColBuilder::for_type(f.data_type()))
            .collect::<Result<_>>()?;

        for doc in docs {
            match &mut builders[0] {
                ColBuilder::U64(b) => b.append_value(doc.doc_id),
                _ => unreachable!("doc_id column is always u64"),
            }
            match &mut builders[1] {
                ColBuilder::Str(b) => b.append_value(&doc.pk),
                _ => unreachable!("pk column is always utf8"),
            }
            for (builder, value) in builders[2..].iter_mut().zip(doc.fields.iter()) {
                builder.append(value)?;
            }
        }

        let arrays: Vec<ArrayRef> = builders.iter_mut().map(ColBuilder::finish).collect();
        RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .map_err(|e| Error::Runtime(format!("build record batch: {e}")))
    }

    fn combined(&self, state: &StoreState) -> Result<RecordBatch> {
        let cache_batch = self.cache_to_batch(&state.cache)?;
        let mut all: Vec<&RecordBatch> = state.batches.iter().collect();
        if cache_batch.num_rows() > 0 {
            all.push(&cache_batch);
        }
        if all.is_empty() {
            return Ok(RecordBatch::new_empty(Arc::clone(&self.schema)));
        }
        concat_batches(&self.schema, all)
            .map_err(|e| Error::Runtime(format!("combine record batches: {e}")))
    }

    fn validate_columns(&self, columns: &[&str]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::invalid_argument("empty column list"));
        }
        for column in columns {
            if *column == LOCAL_ROW_ID {
                continue;
            }
            if self.schema.index_of(column).is_err() {
                error!(column = %column, "unknown forward store column");
                return Err(Error::invalid_argument(format!("unknown column {column}")));
            }
        }
        Ok(())
    }

    /// Fetches `indices` as a projected table.
    ///
    /// The output column order mirrors `columns` exactly; `LOCAL_ROW_ID` is
    /// synthesized from `indices` as a `u64` array.
    pub fn fetch(&self, columns: &[&str], indices: &[i64]) -> Result<RecordBatch> {
        self.validate_columns(columns)?;
        let state = self.state.lock();

        let out_fields: Vec<Field> = columns
            .iter()
            .map(|column| {
                if *column == LOCAL_ROW_ID {
                    Field::new(LOCAL_ROW_ID, ArrowDataType::UInt64, false)
                } else {
                    let idx = self.schema.index_of(column).expect("validated");
                    self.schema.field(idx).clone()
                }
            })
            .collect();
        let out_schema = Arc::new(Schema::new(out_fields));

        if indices.is_empty() {
            return Ok(RecordBatch::new_empty(out_schema));
        }

        let combined = self.combined(&state)?;
        #[allow(clippy::cast_possible_wrap)]
        let num_rows = combined.num_rows() as i64;
        for &idx in indices {
            if idx < 0 || idx >= num_rows {
                return Err(Error::invalid_argument(format!(
                    "row index {idx} out of range {num_rows}"
                )));
            }
        }

        #[allow(clippy::cast_sign_loss)]
        let rowids: Vec<u64> = indices.iter().map(|&i| i as u64).collect();
        let take_indices = UInt64Array::from(rowids.clone());

        let arrays: Vec<ArrayRef> = columns
            .iter()
            .map(|column| -> Result<ArrayRef> {
                if *column == LOCAL_ROW_ID {
                    Ok(Arc::new(UInt64Array::from(rowids.clone())))
                } else {
                    let idx = self.schema.index_of(column).expect("validated");
                    take(combined.column(idx).as_ref(), &take_indices, None)
                        .map_err(|e| Error::Runtime(format!("take column {column}: {e}")))
                }
            })
            .collect::<Result<_>>()?;

        RecordBatch::try_new(out_schema, arrays)
            .map_err(|e| Error::Runtime(format!("assemble fetch result: {e}")))
    }

    /// Fetches a single row as a one-row projected batch.
    pub fn fetch_row(&self, columns: &[&str], index: i64) -> Result<RecordBatch> {
        self.fetch(columns, &[index])
    }

    /// Scans every row, projected by column name.
    pub fn scan(&self, columns: &[&str]) -> Result<Vec<RecordBatch>> {
        self.validate_columns(columns)?;
        if columns.contains(&LOCAL_ROW_ID) {
            return Err(Error::invalid_argument(
                "scan cannot synthesize the local row id",
            ));
        }
        let state = self.state.lock();

        let cache_batch = self.cache_to_batch(&state.cache)?;
        let mut all: Vec<RecordBatch> = state.batches.clone();
        if cache_batch.num_rows() > 0 {
            all.push(cache_batch);
        }

        let projection: Vec<usize> = columns
            .iter()
            .map(|c| self.schema.index_of(c).expect("validated"))
            .collect();
        all.iter()
            .map(|batch| {
                batch
                    .project(&projection)
                    .map_err(|e| Error::Runtime(format!("project scan batch: {e}")))
            })
            .collect()
    }

    /// Spills the cache and writes all unflushed batches to the file,
    /// merging neighbors up to [`MAX_RECORD_BATCH_NUM_ROWS`] rows.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.cache.is_empty() && state.batches.is_empty() {
            return Ok(());
        }

        let cache_batch = self.cache_to_batch(&state.cache)?;
        if cache_batch.num_rows() > 0 {
            state.batches.push(cache_batch);
            state.cache.clear();
            state.cache_bytes = 0;
        }

        if state.writer.is_none() {
            return Err(Error::StatusError("forward store is not open".to_string()));
        }

        let mut wrote = false;
        let mut start = state.flushed_batches;
        while start < state.batches.len() {
            let mut total_rows = 0usize;
            let mut end = start;
            while end < state.batches.len() {
                let rows = state.batches[end].num_rows();
                if rows >= MAX_RECORD_BATCH_NUM_ROWS {
                    if end == start {
                        end += 1;
                    }
                    break;
                }
                if end > start && total_rows + rows > MAX_RECORD_BATCH_NUM_ROWS {
                    break;
                }
                total_rows += rows;
                end += 1;
            }
            if end == start {
                break;
            }

            let merged = if end - start == 1 {
                state.batches[start].clone()
            } else {
                concat_batches(&self.schema, &state.batches[start..end])
                    .map_err(|e| Error::Runtime(format!("merge batches: {e}")))?
            };
            state
                .writer
                .as_mut()
                .expect("checked above")
                .write(&merged)?;
            state.flushed_batches = end;
            wrote = true;
            start = end;
        }

        if wrote {
            info!(
                path = %self.path.display(),
                batches = state.flushed_batches,
                "forward store flushed"
            );
        }
        Ok(())
    }

    /// Flushes and finalizes the backing file.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            writer.close()?;
        }
        state.batches.clear();
        state.cache.clear();
        state.cache_bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int32Array, StringArray};
    use tempfile::tempdir;

    fn sample_schema() -> CollectionSchema {
        CollectionSchema::new(vec![
            ("id".to_string(), FieldType::Int32),
            ("name".to_string(), FieldType::String),
            ("score".to_string(), FieldType::Float64),
        ])
    }

    fn sample_store(dir: &std::path::Path) -> MemForwardStore {
        let store = MemForwardStore::new(
            &sample_schema(),
            dir.join("forward.ipc"),
            FileFormat::Ipc,
            1 << 20,
        );
        store.open().unwrap();
        for i in 0..8i32 {
            store
                .insert(Doc::new(
                    1000 + i as u64,
                    format!("pk-{i}"),
                    vec![
                        FieldValue::Int32(i * 10),
                        FieldValue::Str(format!("name-{i}")),
                        FieldValue::Float64(f64::from(i) * 0.5),
                    ],
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_projection_preserves_requested_order() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());

        let batch = store
            .fetch(&[USER_ID, "id", LOCAL_ROW_ID, "score"], &[0, 3, 6, 1, 0])
            .unwrap();
        assert_eq!(batch.num_rows(), 5);
        assert_eq!(batch.schema().field(0).name(), USER_ID);
        assert_eq!(batch.schema().field(1).name(), "id");
        assert_eq!(batch.schema().field(2).name(), LOCAL_ROW_ID);
        assert_eq!(batch.schema().field(3).name(), "score");

        let rowids = batch
            .column(2)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        let got: Vec<u64> = rowids.values().to_vec();
        assert_eq!(got, vec![0, 3, 6, 1, 0]);

        let ids = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        let got: Vec<i32> = ids.values().to_vec();
        assert_eq!(got, vec![0, 30, 60, 10, 0]);

        let pks = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(pks.value(0), "pk-0");
        assert_eq!(pks.value(1), "pk-3");

        let scores = batch
            .column(3)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(scores.value(2), 3.0);
    }

    #[test]
    fn test_empty_indices_keep_schema_shape() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());

        let batch = store.fetch(&["id", LOCAL_ROW_ID], &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(0).name(), "id");
    }

    #[test]
    fn test_invalid_arguments() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());

        assert!(store.fetch(&[], &[0]).is_err());
        assert!(store.fetch(&["missing"], &[0]).is_err());
        assert!(store.fetch(&["id"], &[-1]).is_err());
        assert!(store.fetch(&["id"], &[999]).is_err());
        assert!(store
            .insert(Doc::new(1, "short", vec![FieldValue::Int32(1)]))
            .is_err());
    }

    #[test]
    fn test_fetch_row_single() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());

        let row = store.fetch_row(&[GLOBAL_DOC_ID, "name"], 2).unwrap();
        assert_eq!(row.num_rows(), 1);
        let doc_ids = row
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(doc_ids.value(0), 1002);
    }

    #[test]
    fn test_scan_projected() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());

        let batches = store.scan(&["name"]).unwrap();
        let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(total, 8);
        assert!(batches.iter().all(|b| b.num_columns() == 1));
    }

    #[test]
    fn test_flush_writes_file_and_close() {
        let dir = tempdir().unwrap();
        let store = sample_store(dir.path());
        store.flush().unwrap();
        store.close().unwrap();

        let batches = super::super::columnar::read_columnar_file(
            &dir.path().join("forward.ipc"),
            FileFormat::Ipc,
            Some(&[USER_ID.to_string()]),
        )
        .unwrap();
        let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn test_cache_spills_at_threshold() {
        let dir = tempdir().unwrap();
        // ~60 bytes per row threshold: max_buffer_size 6000 / 100.
        let store = MemForwardStore::new(
            &CollectionSchema::new(vec![("id".to_string(), FieldType::Int32)]),
            dir.path().join("spill.ipc"),
            FileFormat::Ipc,
            6000,
        );
        store.open().unwrap();
        for i in 0..10i32 {
            store
                .insert(Doc::new(i as u64, "k", vec![FieldValue::Int32(i)]))
                .unwrap();
        }
        // Some rows have spilled out of the cache into batches, none lost.
        let batch = store.fetch(&["id"], &[0, 9]).unwrap();
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        let got: Vec<i32> = ids.values().to_vec();
        assert_eq!(got, vec![0, 9]);
    }
}
