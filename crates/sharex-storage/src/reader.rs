//! Lazily opened byte streams.
//!
//! A [`LazyReader`] is handed out unopened so that requesting an entry never
//! touches its bytes. `read`, `seek` and `close` fail with
//! [`StorageError::NotOpened`] until `open` has been called.
//!
//! Calling `open` on an already opened reader reinitializes it: a fresh
//! handle positioned at offset 0 replaces the old one. `close` returns the
//! reader to the unopened state.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{StorageError, StorageResult};

/// A byte stream that must be explicitly opened before use.
pub trait LazyReader: Send {
    /// Transition to the opened state.
    fn open(&mut self) -> StorageResult<()>;

    /// Whether `open` has been called (and `close` has not).
    fn is_open(&self) -> bool;

    /// Read into `buf`, returning the number of bytes read (0 at end).
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize>;

    /// Move the read position.
    fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64>;

    /// Release the underlying handle.
    fn close(&mut self) -> StorageResult<()>;

    /// Read everything from the current position to the end.
    fn read_to_end(&mut self, out: &mut Vec<u8>) -> StorageResult<usize> {
        let mut chunk = [0u8; 8 * 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Total length in bytes, leaving the position at the start.
    fn len(&mut self) -> StorageResult<u64> {
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(0))?;
        Ok(len)
    }
}

/// In-memory reader over a shared buffer.
#[derive(Debug)]
pub struct MemoryReader {
    data: Bytes,
    cursor: Option<Cursor<Bytes>>,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cursor: None,
        }
    }

    fn cursor(&mut self) -> StorageResult<&mut Cursor<Bytes>> {
        self.cursor.as_mut().ok_or(StorageError::NotOpened)
    }
}

impl LazyReader for MemoryReader {
    fn open(&mut self) -> StorageResult<()> {
        self.cursor = Some(Cursor::new(self.data.clone()));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.cursor.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        Ok(self.cursor()?.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64> {
        Ok(self.cursor()?.seek(pos)?)
    }

    fn close(&mut self) -> StorageResult<()> {
        self.cursor.take().map(drop).ok_or(StorageError::NotOpened)
    }
}

/// Filesystem-backed reader; the file is opened by `open`, not on construction.
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    file: Option<File>,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> StorageResult<&mut File> {
        self.file.as_mut().ok_or(StorageError::NotOpened)
    }
}

impl LazyReader for FileReader {
    fn open(&mut self) -> StorageResult<()> {
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        Ok(self.file()?.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> StorageResult<u64> {
        Ok(self.file()?.seek(pos)?)
    }

    fn close(&mut self) -> StorageResult<()> {
        // Dropping the handle closes it; std reports no close errors.
        self.file.take().map(drop).ok_or(StorageError::NotOpened)
    }
}
