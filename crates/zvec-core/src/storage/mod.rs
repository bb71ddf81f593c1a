//! Storage layer: segmented blob containers, the write-ahead log, columnar
//! files and the memory forward store.

pub mod columnar;
pub mod container;
pub mod forward;
pub mod wal;

pub use columnar::{read_columnar_file, ChunkedFileWriter, FileFormat};
pub use container::{IndexStorage, MemIndexStorage, MmapIndexStorage, Segment};
pub use forward::{
    CollectionSchema, Doc, FieldType, FieldValue, MemForwardStore, MAX_RECORD_BATCH_NUM_ROWS,
};
pub use wal::{crc32c, LocalWalFile, WalHeader, WalOptions, MAX_RECORD_SIZE, WAL_HEADER_SIZE};
