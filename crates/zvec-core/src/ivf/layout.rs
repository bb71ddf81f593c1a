//! Fixed on-disk structs of the IVF image, laid out little-endian.

use crate::error::{Error, Result};

/// Fixed header of the `inverted_header` segment, followed immediately by
/// the serialized index meta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IvfHeader {
    /// `IvfHeader::SIZE + index_meta_size`.
    pub header_size: u32,
    /// Byte length of the serialized index meta.
    pub index_meta_size: u32,
    /// Number of inverted lists.
    pub inverted_list_count: u32,
    /// Total block count across all lists.
    pub block_count: u32,
    /// Vector slots per block.
    pub block_vector_count: u32,
    /// Byte size of one block.
    pub block_size: u32,
    /// Total logical vector count.
    pub total_vector_count: u32,
    /// Byte size of the `inverted_body` segment.
    pub inverted_body_size: u64,
}

impl IvfHeader {
    /// Encoded byte size.
    pub const SIZE: usize = 36;

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.header_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.index_meta_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.inverted_list_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.block_vector_count.to_le_bytes());
        buf[20..24].copy_from_slice(&self.block_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.total_vector_count.to_le_bytes());
        buf[28..36].copy_from_slice(&self.inverted_body_size.to_le_bytes());
        buf
    }

    /// Parses a header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::invalid_format(format!(
                "header segment too small: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            header_size: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            index_meta_size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            inverted_list_count: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            block_count: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            block_vector_count: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            block_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            total_vector_count: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            inverted_body_size: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
        })
    }
}

/// Per-list record of the `inverted_meta` segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvertedListMeta {
    /// First local id of the list.
    pub id_offset: u32,
    /// Logical vector count.
    pub vector_count: u32,
    /// Physical block count; the tail block may be partially filled.
    pub block_count: u32,
    /// Byte offset of the list's first block in the inverted body.
    pub offset: u64,
}

impl InvertedListMeta {
    /// Encoded byte size.
    pub const SIZE: usize = 24;

    /// Encodes the record.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.id_offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.vector_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    /// Parses a record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::invalid_format("inverted list meta truncated"));
        }
        Ok(Self {
            id_offset: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            vector_count: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            block_count: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// Per-vector record of the `offsets` segment: where the vector's bytes
/// start and how the enclosing block is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvertedVecLocation {
    /// Byte offset into the inverted body.
    pub offset: u64,
    /// Non-zero when the enclosing block is column-major.
    pub column_major: u32,
}

impl InvertedVecLocation {
    /// Encoded byte size.
    pub const SIZE: usize = 16;

    /// Encodes the record.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.column_major.to_le_bytes());
        buf
    }

    /// Parses a record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::invalid_format("vector location truncated"));
        }
        Ok(Self {
            offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            column_major: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

/// Per-list record of the quantizer parameter segments.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvertedQuantizerParams {
    /// Trained scale.
    pub scale: f32,
    /// Trained bias.
    pub bias: f32,
    /// Observed sample minimum.
    pub min: f32,
    /// Observed sample maximum.
    pub max: f32,
}

impl InvertedQuantizerParams {
    /// Encoded byte size.
    pub const SIZE: usize = 16;

    /// Encodes the record.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.scale.to_le_bytes());
        buf[4..8].copy_from_slice(&self.bias.to_le_bytes());
        buf[8..12].copy_from_slice(&self.min.to_le_bytes());
        buf[12..16].copy_from_slice(&self.max.to_le_bytes());
        buf
    }

    /// Parses a record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::invalid_format("quantizer params truncated"));
        }
        Ok(Self {
            scale: f32::from_le_bytes(buf[0..4].try_into().unwrap()),
            bias: f32::from_le_bytes(buf[4..8].try_into().unwrap()),
            min: f32::from_le_bytes(buf[8..12].try_into().unwrap()),
            max: f32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}
