//! Byte-addressed file adapter.
//!
//! All higher layers address the store file exclusively by absolute byte
//! offset. Positioned reads and writes leave the cursor just past the
//! transferred bytes, so a positioned access may be followed by sequential
//! ones.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

use kardex_common::Result;

/// A store file opened for byte-addressed access.
#[derive(Debug)]
pub struct StoreFile {
    file: File,
}

impl StoreFile {
    /// Opens an existing file. With `read_only` the file is opened without
    /// write access.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        Ok(Self { file })
    }

    /// Creates a new file for read/write access. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Reads exactly `buf.len()` bytes at the given byte offset.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes at the current position.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes all bytes at the given byte offset.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Writes all bytes at the current position.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    /// Appends all bytes at the end of the file and returns the offset the
    /// data was written at.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        Ok(offset)
    }

    /// Returns the current cursor position.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    /// Returns the file size in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncates the file at the given byte offset.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        self.file.set_len(offset)?;
        Ok(())
    }

    /// Returns the time of last modification.
    pub fn modified(&self) -> Result<SystemTime> {
        Ok(self.file.metadata()?.modified()?)
    }

    /// Forces pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Deletes a file by path.
    pub fn erase(path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}
