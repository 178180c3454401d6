//! Container file I/O
//!
//! Thin seek-then-transfer wrapper over one `std::fs::File`. Every write is
//! flushed before the call returns; the engine layers its record framing and
//! cipher on top of raw byte ranges.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};

/// How to open the physical container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing container; fails if it does not exist.
    Open,
    /// Create a fresh container, truncating any existing file.
    Create,
    /// Open if present, otherwise create.
    OpenOrCreate,
    /// Not supported; rejected before the file is touched. Kept so callers
    /// porting from filesystem-style APIs get a typed refusal.
    Truncate,
}

/// Disk-backed container storage.
pub struct PackFile {
    file: File,
    path: PathBuf,
}

impl PackFile {
    /// Open the container file.
    ///
    /// Returns the handle plus whether a fresh (empty) container was just
    /// created — the engine then writes the base layout.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<(Self, bool)> {
        let path = path.as_ref();
        let existed = path.exists();

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match mode {
            OpenMode::Open => {}
            OpenMode::Create => {
                options.create(true).truncate(true);
            }
            OpenMode::OpenOrCreate => {
                options.create(true);
            }
            OpenMode::Truncate => {
                return Err(PackError::UnsupportedOperation(
                    "truncate mode is not supported",
                ));
            }
        }

        let file = options.open(path)?;
        let fresh = matches!(mode, OpenMode::Create) || !existed;

        Ok((
            PackFile {
                file,
                path: path.to_path_buf(),
            },
            fresh,
        ))
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Write `data` at `offset` and flush.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Zero-fill `count` bytes at end of file; returns the pre-append length.
    pub fn append_zeroed(&mut self, count: u64) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&vec![0u8; count as usize])?;
        self.file.flush()?;
        Ok(offset)
    }

    /// Flush file contents and metadata to the storage device.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
