//! Segmented blob container: named segments addressed by string id, backed
//! by memory or a memory-mapped file.
//!
//! On disk the container is a directory header followed by the segment
//! payloads:
//!
//! ```text
//! [Magic: "ZVST" 4 bytes][Version: u32][Segment count: u32][Reserved: u32]
//! [Entries: name_len u16, name bytes, offset u64, size u64] x N
//! [Payloads]
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use tracing::error;

use crate::error::{Error, Result};

/// Container file magic bytes.
const CONTAINER_MAGIC: &[u8; 4] = b"ZVST";

/// Current container format version.
const CONTAINER_VERSION: u32 = 1;

/// One named byte range of an index container.
pub trait Segment: Send + Sync {
    /// Total payload size in bytes.
    fn data_size(&self) -> usize;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// A range reaching past the payload is a `ReadData` error; the contract
    /// is all-or-nothing, there are no short reads.
    fn read(&self, offset: usize, len: usize) -> Result<Bytes>;

    /// Produces an independent handle onto the same payload.
    fn clone_segment(&self) -> Arc<dyn Segment>;
}

/// A container of named segments.
pub trait IndexStorage: Send + Sync {
    /// Looks up a segment by id.
    fn get(&self, seg_id: &str) -> Option<Arc<dyn Segment>>;
}

// ---------------------------------------------------------------------------
// In-memory container
// ---------------------------------------------------------------------------

struct MemSegment {
    data: Bytes,
}

impl Segment for MemSegment {
    fn data_size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<Bytes> {
        if offset + len > self.data.len() {
            return Err(Error::read_data(format!(
                "segment read out of range: off={offset} len={len} size={}",
                self.data.len()
            )));
        }
        Ok(self.data.slice(offset..offset + len))
    }

    fn clone_segment(&self) -> Arc<dyn Segment> {
        Arc::new(MemSegment {
            data: self.data.clone(),
        })
    }
}

/// Builder-side container holding every segment in memory.
#[derive(Default)]
pub struct MemIndexStorage {
    segments: FxHashMap<String, Bytes>,
}

impl MemIndexStorage {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a segment.
    pub fn put(&mut self, seg_id: impl Into<String>, data: impl Into<Bytes>) {
        self.segments.insert(seg_id.into(), data.into());
    }

    /// Segment ids present, unordered.
    pub fn segment_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    /// Serializes the container into its on-disk form.
    pub fn dump(&self, path: &Path) -> Result<()> {
        // Deterministic directory order keeps images byte-stable.
        let mut ids: Vec<&String> = self.segments.keys().collect();
        ids.sort();

        let mut dir_size = 16usize;
        for id in &ids {
            dir_size += 2 + id.len() + 16;
        }

        let mut buf = Vec::with_capacity(dir_size);
        buf.extend_from_slice(CONTAINER_MAGIC);
        buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let mut offset = dir_size as u64;
        for id in &ids {
            let data = &self.segments[*id];
            #[allow(clippy::cast_possible_truncation)]
            buf.extend_from_slice(&(id.len() as u16).to_le_bytes());
            buf.extend_from_slice(id.as_bytes());
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
            offset += data.len() as u64;
        }
        debug_assert_eq!(buf.len(), dir_size);

        let mut file = File::create(path)?;
        file.write_all(&buf)?;
        for id in &ids {
            file.write_all(&self.segments[*id])?;
        }
        file.sync_data()?;
        Ok(())
    }
}

impl IndexStorage for MemIndexStorage {
    fn get(&self, seg_id: &str) -> Option<Arc<dyn Segment>> {
        self.segments.get(seg_id).map(|data| {
            Arc::new(MemSegment { data: data.clone() }) as Arc<dyn Segment>
        })
    }
}

// ---------------------------------------------------------------------------
// Memory-mapped container
// ---------------------------------------------------------------------------

struct MmapSegment {
    map: Arc<Mmap>,
    offset: usize,
    len: usize,
}

impl Segment for MmapSegment {
    fn data_size(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, len: usize) -> Result<Bytes> {
        if offset + len > self.len {
            error!(
                offset,
                len,
                size = self.len,
                "mmap segment read out of range"
            );
            return Err(Error::read_data(format!(
                "segment read out of range: off={offset} len={len} size={}",
                self.len
            )));
        }
        let start = self.offset + offset;
        Ok(Bytes::copy_from_slice(&self.map[start..start + len]))
    }

    fn clone_segment(&self) -> Arc<dyn Segment> {
        Arc::new(MmapSegment {
            map: Arc::clone(&self.map),
            offset: self.offset,
            len: self.len,
        })
    }
}

/// Read-only container over a memory-mapped file.
pub struct MmapIndexStorage {
    map: Arc<Mmap>,
    directory: FxHashMap<String, (usize, usize)>,
}

impl MmapIndexStorage {
    /// Maps the container file and parses its segment directory.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the file is opened read-only and mapped read-only; the map
        // is shared behind Arc and outlives every segment handle.
        let map = unsafe { Mmap::map(&file)? };
        let data = &map[..];

        if data.len() < 16 || &data[0..4] != CONTAINER_MAGIC {
            return Err(Error::invalid_format("bad container magic"));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != CONTAINER_VERSION {
            return Err(Error::invalid_format(format!(
                "unsupported container version {version}"
            )));
        }
        let count = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;

        let mut directory = FxHashMap::default();
        let mut pos = 16usize;
        for _ in 0..count {
            if pos + 2 > data.len() {
                return Err(Error::invalid_format("truncated container directory"));
            }
            let name_len = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + name_len + 16 > data.len() {
                return Err(Error::invalid_format("truncated container directory"));
            }
            let name = std::str::from_utf8(&data[pos..pos + name_len])
                .map_err(|_| Error::invalid_format("non-utf8 segment id"))?
                .to_string();
            pos += name_len;
            let offset = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
            let size = u64::from_le_bytes(data[pos + 8..pos + 16].try_into().unwrap());
            pos += 16;

            let offset = usize::try_from(offset)
                .map_err(|_| Error::invalid_format("segment offset overflow"))?;
            let size = usize::try_from(size)
                .map_err(|_| Error::invalid_format("segment size overflow"))?;
            if offset + size > data.len() {
                return Err(Error::invalid_format(format!(
                    "segment {name} reaches past the container"
                )));
            }
            directory.insert(name, (offset, size));
        }

        Ok(Self {
            map: Arc::new(map),
            directory,
        })
    }
}

impl IndexStorage for MmapIndexStorage {
    fn get(&self, seg_id: &str) -> Option<Arc<dyn Segment>> {
        self.directory.get(seg_id).map(|&(offset, len)| {
            Arc::new(MmapSegment {
                map: Arc::clone(&self.map),
                offset,
                len,
            }) as Arc<dyn Segment>
        })
    }
}
