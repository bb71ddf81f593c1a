//! Columnar file plumbing: a chunked record-batch writer and a projected
//! reader over Arrow IPC (feather v2) and Parquet files.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader as IpcFileReader;
use arrow::ipc::writer::FileWriter as IpcFileWriter;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// On-disk format of a columnar file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Arrow IPC file (feather v2).
    #[default]
    Ipc,
    /// Apache Parquet.
    Parquet,
}

enum WriterInner {
    Ipc(IpcFileWriter<File>),
    Parquet(ArrowWriter<File>),
}

/// Appends record batches to one columnar file.
pub struct ChunkedFileWriter {
    inner: Option<WriterInner>,
}

impl ChunkedFileWriter {
    /// Creates the file and writes the schema preamble.
    pub fn open(path: &Path, schema: &SchemaRef, format: FileFormat) -> Result<Self> {
        let file = File::create(path)?;
        let inner = match format {
            FileFormat::Ipc => WriterInner::Ipc(
                IpcFileWriter::try_new(file, schema)
                    .map_err(|e| Error::Runtime(format!("open ipc writer: {e}")))?,
            ),
            FileFormat::Parquet => WriterInner::Parquet(
                ArrowWriter::try_new(file, Arc::clone(schema), None)
                    .map_err(|e| Error::Runtime(format!("open parquet writer: {e}")))?,
            ),
        };
        Ok(Self { inner: Some(inner) })
    }

    /// Appends one batch.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        match self.inner.as_mut() {
            Some(WriterInner::Ipc(writer)) => writer
                .write(batch)
                .map_err(|e| Error::Runtime(format!("ipc write: {e}"))),
            Some(WriterInner::Parquet(writer)) => writer
                .write(batch)
                .map_err(|e| Error::Runtime(format!("parquet write: {e}"))),
            None => Err(Error::StatusError("columnar writer closed".to_string())),
        }
    }

    /// Finalizes the file footer. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(WriterInner::Ipc(mut writer)) => writer
                .finish()
                .map_err(|e| Error::Runtime(format!("ipc finish: {e}"))),
            Some(WriterInner::Parquet(writer)) => writer
                .close()
                .map(|_| ())
                .map_err(|e| Error::Runtime(format!("parquet close: {e}"))),
            None => Ok(()),
        }
    }
}

impl Drop for ChunkedFileWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Reads a columnar file back, optionally projected by column name.
///
/// Unknown projection columns are an `InvalidArgument` error.
pub fn read_columnar_file(
    path: &Path,
    format: FileFormat,
    columns: Option<&[String]>,
) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    match format {
        FileFormat::Ipc => {
            let probe = IpcFileReader::try_new(File::open(path)?, None)
                .map_err(|e| Error::read_data(format!("open ipc reader: {e}")))?;
            let projection = match columns {
                Some(cols) => Some(resolve_projection(&probe.schema(), cols)?),
                None => None,
            };
            let reader = IpcFileReader::try_new(file, projection)
                .map_err(|e| Error::read_data(format!("open ipc reader: {e}")))?;
            reader
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::read_data(format!("ipc read: {e}")))
        }
        FileFormat::Parquet => {
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)
                .map_err(|e| Error::read_data(format!("open parquet reader: {e}")))?;
            let builder = match columns {
                Some(cols) => {
                    let indices = resolve_projection(builder.schema(), cols)?;
                    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                    builder.with_projection(mask)
                }
                None => builder,
            };
            let reader = builder
                .build()
                .map_err(|e| Error::read_data(format!("build parquet reader: {e}")))?;
            reader
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::read_data(format!("parquet read: {e}")))
        }
    }
}

fn resolve_projection(schema: &SchemaRef, columns: &[String]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .map_err(|_| Error::invalid_argument(format!("unknown column {name}")))
        })
        .collect()
}
