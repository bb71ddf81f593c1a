//! Write-ahead log: length+CRC framed append-only record stream.
//!
//! The file starts with a 64-byte version header; every record is
//! `[u32 length][u32 crc32c][payload]`. Appends are serialized under a
//! mutex, replay stops at the first CRC mismatch or implausible length.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Records larger than this are treated as corruption on replay.
pub const MAX_RECORD_SIZE: u32 = 4 * 1024 * 1024;

/// Byte size of the file header.
pub const WAL_HEADER_SIZE: usize = 64;

/// CRC32-C (Castagnoli), the polynomial the framing checksums use.
#[inline]
#[must_use]
pub fn crc32c(data: &[u8]) -> u32 {
    const CRC32C_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0x82F6_3B78;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32C_TABLE[idx];
    }
    !crc
}

/// File header: a version word and reserved space, 64 bytes total.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalHeader {
    /// Format version; only 0 is readable.
    pub version: u64,
}

impl WalHeader {
    fn encode(self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.version.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; WAL_HEADER_SIZE]) -> Self {
        Self {
            version: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        }
    }
}

/// Open options for a WAL file.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalOptions {
    /// Create a fresh file; fails if one already exists. When false the
    /// file must already exist.
    pub create_new: bool,
    /// Flush after this many appended records; 0 disables counter-driven
    /// flushing.
    pub max_docs_wal_flush: u32,
}

struct WalIo {
    file: File,
    read_pos: u64,
}

/// Append-only WAL over a local file.
pub struct LocalWalFile {
    path: PathBuf,
    io: Mutex<Option<WalIo>>,
    max_docs_wal_flush: u32,
    docs_count: AtomicU64,
}

impl LocalWalFile {
    /// Creates a handle; no file is touched until [`open`](Self::open).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(None),
            max_docs_wal_flush: 0,
            docs_count: AtomicU64::new(0),
        }
    }

    /// Opens or creates the file per `options`.
    pub fn open(&mut self, options: WalOptions) -> Result<()> {
        let mut io = self.io.lock();
        if io.is_some() {
            error!(path = %self.path.display(), "wal already open");
            return Err(Error::StatusError("wal already open".to_string()));
        }

        let file = if options.create_new {
            if self.path.exists() {
                error!(path = %self.path.display(), "wal file already exists");
                return Err(Error::StatusError("wal file already exists".to_string()));
            }
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&self.path)?;
            file.write_all(&WalHeader::default().encode())?;
            file
        } else {
            if !self.path.exists() {
                error!(path = %self.path.display(), "wal file does not exist");
                return Err(Error::StatusError("wal file does not exist".to_string()));
            }
            let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            file.seek(SeekFrom::End(0))?;
            file
        };

        *io = Some(WalIo { file, read_pos: 0 });
        self.max_docs_wal_flush = options.max_docs_wal_flush;
        info!(path = %self.path.display(), create_new = options.create_new, "wal open");
        Ok(())
    }

    /// Whether the file holds at least one record beyond the header.
    #[must_use]
    pub fn has_record(&self) -> bool {
        let io = self.io.lock();
        match io.as_ref() {
            Some(io) => io
                .file
                .metadata()
                .map(|m| m.len() > WAL_HEADER_SIZE as u64)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Appends one framed record, honoring the counter flush policy.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let length = payload.len() as u32;
        let crc = crc32c(payload);

        {
            let mut io = self.io.lock();
            let Some(io) = io.as_mut() else {
                error!(path = %self.path.display(), "append on closed wal");
                return Err(Error::StatusError("wal is not open".to_string()));
            };

            io.file.seek(SeekFrom::End(0))?;
            io.file.write_all(&length.to_le_bytes())?;
            io.file.write_all(&crc.to_le_bytes())?;
            io.file.write_all(payload)?;
        }

        let count = self.docs_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_docs_wal_flush != 0 && count >= u64::from(self.max_docs_wal_flush) {
            if let Err(err) = self.flush() {
                error!(path = %self.path.display(), error = %err, "wal counter flush failed");
            }
            self.docs_count.store(0, Ordering::Release);
        }
        Ok(())
    }

    /// Forces the file contents to stable storage.
    pub fn flush(&self) -> Result<()> {
        let io = self.io.lock();
        let Some(io) = io.as_ref() else {
            return Err(Error::StatusError("wal is not open".to_string()));
        };
        io.file.sync_data()?;
        Ok(())
    }

    /// Seeks to the start and validates the header, arming [`next`](Self::next).
    pub fn prepare_for_read(&self) -> Result<()> {
        let mut io = self.io.lock();
        let Some(io) = io.as_mut() else {
            return Err(Error::StatusError("wal is not open".to_string()));
        };

        io.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; WAL_HEADER_SIZE];
        io.file.read_exact(&mut buf).map_err(|err| {
            error!(path = %self.path.display(), error = %err, "wal header read failed");
            Error::read_data("wal header read failed")
        })?;
        let header = WalHeader::decode(&buf);
        if header.version != 0 {
            error!(path = %self.path.display(), version = header.version, "wal version not supported");
            return Err(Error::invalid_format(format!(
                "wal version {} not supported",
                header.version
            )));
        }
        io.read_pos = WAL_HEADER_SIZE as u64;
        Ok(())
    }

    /// Returns the next payload, or empty on end-of-file or corruption.
    ///
    /// Replay stops at the first CRC mismatch or out-of-range length; the
    /// error is logged and an empty payload returned.
    #[must_use]
    pub fn next(&self) -> Vec<u8> {
        let mut io = self.io.lock();
        let Some(io) = io.as_mut() else {
            return Vec::new();
        };

        if io.file.seek(SeekFrom::Start(io.read_pos)).is_err() {
            return Vec::new();
        }

        let mut frame = [0u8; 8];
        match io.file.read_exact(&mut frame) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!(path = %self.path.display(), "wal read finished");
                return Vec::new();
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "wal frame read failed");
                return Vec::new();
            }
        }
        let length = u32::from_le_bytes(frame[0..4].try_into().unwrap());
        let crc = u32::from_le_bytes(frame[4..8].try_into().unwrap());

        if length == 0 || length > MAX_RECORD_SIZE {
            error!(path = %self.path.display(), length, "wal record length out of range");
            return Vec::new();
        }

        let mut payload = vec![0u8; length as usize];
        if let Err(err) = io.file.read_exact(&mut payload) {
            error!(path = %self.path.display(), error = %err, "wal payload read failed");
            return Vec::new();
        }

        let actual = crc32c(&payload);
        if actual != crc {
            error!(
                path = %self.path.display(),
                expected = crc,
                actual,
                "wal crc mismatch"
            );
            return Vec::new();
        }

        io.read_pos += 8 + u64::from(length);
        payload
    }

    /// Closes the file.
    pub fn close(&self) -> Result<()> {
        let mut io = self.io.lock();
        if io.is_none() {
            return Err(Error::StatusError("wal is not open".to_string()));
        }
        *io = None;
        info!(path = %self.path.display(), "wal close");
        Ok(())
    }

    /// Closes (if open) and deletes the on-disk file.
    pub fn remove(&self) -> Result<()> {
        {
            let mut io = self.io.lock();
            *io = None;
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "wal remove");
        }
        Ok(())
    }
}

impl Drop for LocalWalFile {
    fn drop(&mut self) {
        let mut io = self.io.lock();
        if let Some(io) = io.as_mut() {
            if let Err(err) = io.file.sync_data() {
                warn!(path = %self.path.display(), error = %err, "wal sync on drop failed");
            }
        }
        *io = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_crc32c_known_vector() {
        // RFC 3720 check value for "123456789".
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
        assert_eq!(crc32c(b""), 0);
    }

    #[test]
    fn test_append_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions {
            create_new: true,
            max_docs_wal_flush: 0,
        })
        .unwrap();
        wal.append(b"alpha").unwrap();
        wal.append(b"beta").unwrap();
        wal.append(b"gamma").unwrap();
        wal.flush().unwrap();
        wal.close().unwrap();

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions::default()).unwrap();
        assert!(wal.has_record());
        wal.prepare_for_read().unwrap();
        assert_eq!(wal.next(), b"alpha");
        assert_eq!(wal.next(), b"beta");
        assert_eq!(wal.next(), b"gamma");
        assert_eq!(wal.next(), Vec::<u8>::new());
    }

    #[test]
    fn test_create_new_guards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guard.wal");

        let mut wal = LocalWalFile::new(&path);
        // Opening a missing file without create_new fails.
        assert!(wal.open(WalOptions::default()).is_err());

        wal.open(WalOptions {
            create_new: true,
            ..WalOptions::default()
        })
        .unwrap();
        wal.close().unwrap();

        // Creating over an existing file fails.
        let mut wal = LocalWalFile::new(&path);
        assert!(wal
            .open(WalOptions {
                create_new: true,
                ..WalOptions::default()
            })
            .is_err());
    }

    #[test]
    fn test_append_on_closed_is_status_error() {
        let dir = tempdir().unwrap();
        let wal = LocalWalFile::new(dir.path().join("closed.wal"));
        assert!(matches!(wal.append(b"x"), Err(Error::StatusError(_))));
        assert!(matches!(wal.flush(), Err(Error::StatusError(_))));
        assert!(matches!(wal.prepare_for_read(), Err(Error::StatusError(_))));
    }

    #[test]
    fn test_replay_stops_at_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.wal");

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions {
            create_new: true,
            ..WalOptions::default()
        })
        .unwrap();
        wal.append(b"good").unwrap();
        wal.append(b"trashed").unwrap();
        wal.append(b"unreachable").unwrap();
        wal.close().unwrap();

        // Flip a payload byte of the second record.
        let mut raw = std::fs::read(&path).unwrap();
        let second_payload = WAL_HEADER_SIZE + 8 + 4 + 8;
        raw[second_payload] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions::default()).unwrap();
        wal.prepare_for_read().unwrap();
        assert_eq!(wal.next(), b"good");
        assert_eq!(wal.next(), Vec::<u8>::new());
        assert_eq!(wal.next(), Vec::<u8>::new());
    }

    #[test]
    fn test_counter_flush_and_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flushy.wal");

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions {
            create_new: true,
            max_docs_wal_flush: 2,
        })
        .unwrap();
        for i in 0..5u32 {
            wal.append(&i.to_le_bytes()).unwrap();
        }

        wal.remove().unwrap();
        assert!(!path.exists());
        // remove is idempotent.
        wal.remove().unwrap();
    }

    #[test]
    fn test_bad_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("versioned.wal");

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions {
            create_new: true,
            ..WalOptions::default()
        })
        .unwrap();
        wal.close().unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[0] = 9;
        std::fs::write(&path, &raw).unwrap();

        let mut wal = LocalWalFile::new(&path);
        wal.open(WalOptions::default()).unwrap();
        assert!(matches!(
            wal.prepare_for_read(),
            Err(Error::InvalidFormat(_))
        ));
    }
}
