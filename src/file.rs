use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::BitOr;
use std::path::Path;

use crate::error::Result;

/// Combinable open mode for [`RandomAccessFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(1 << 0);
    pub const WRITE: OpenMode = OpenMode(1 << 1);
    pub const TRUNCATE: OpenMode = OpenMode(1 << 2);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Random-access file handle with explicit byte offsets.
///
/// Partial reads and writes are errors. The underlying handle is released
/// when the value is dropped. This is the only I/O primitive the rest of the
/// crate uses.
#[derive(Debug)]
pub struct RandomAccessFile {
    file: File,
}

impl RandomAccessFile {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let file = OpenOptions::new()
            .read(mode.contains(OpenMode::READ))
            .write(mode.contains(OpenMode::WRITE))
            .create(mode.contains(OpenMode::WRITE))
            .truncate(mode.contains(OpenMode::TRUNCATE))
            .open(path)?;

        Ok(RandomAccessFile { file })
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn offset(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Moves to an absolute offset, returning the previous offset.
    pub fn set_offset(&mut self, offset: u64) -> Result<u64> {
        let previous = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(previous)
    }

    /// Advances the offset by `bytes`, returning the new offset.
    pub fn skip(&mut self, bytes: u64) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::Current(bytes as i64))?)
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_mode_combination() {
        let mode = OpenMode::READ | OpenMode::WRITE;
        assert!(mode.contains(OpenMode::READ));
        assert!(mode.contains(OpenMode::WRITE));
        assert!(!mode.contains(OpenMode::TRUNCATE));
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut file =
            RandomAccessFile::open(&path, OpenMode::READ | OpenMode::WRITE).unwrap();
        file.write(b"hello world").unwrap();
        assert_eq!(file.size().unwrap(), 11);

        file.set_offset(6).unwrap();
        let mut buf = [0u8; 5];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_set_offset_returns_previous() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut file =
            RandomAccessFile::open(&path, OpenMode::READ | OpenMode::WRITE).unwrap();
        file.write(&[0u8; 16]).unwrap();

        let previous = file.set_offset(4).unwrap();
        assert_eq!(previous, 16);
        assert_eq!(file.offset().unwrap(), 4);
    }

    #[test]
    fn test_skip_returns_new_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut file =
            RandomAccessFile::open(&path, OpenMode::READ | OpenMode::WRITE).unwrap();
        file.write(&[0u8; 8]).unwrap();
        file.set_offset(2).unwrap();
        assert_eq!(file.skip(3).unwrap(), 5);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut file =
            RandomAccessFile::open(&path, OpenMode::READ | OpenMode::WRITE).unwrap();
        file.write(&[0u8; 4]).unwrap();
        file.set_offset(0).unwrap();

        let mut buf = [0u8; 8];
        assert!(file.read(&mut buf).is_err());
    }

    #[test]
    fn test_set_size_extends_with_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut file =
            RandomAccessFile::open(&path, OpenMode::READ | OpenMode::WRITE).unwrap();
        file.write(b"ab").unwrap();
        file.set_size(6).unwrap();
        assert_eq!(file.size().unwrap(), 6);

        file.set_offset(0).unwrap();
        let mut buf = [0u8; 6];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"ab\0\0\0\0");
    }

    #[test]
    fn test_truncate_discards_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        {
            let mut file =
                RandomAccessFile::open(&path, OpenMode::WRITE).unwrap();
            file.write(b"leftovers").unwrap();
        }

        let file =
            RandomAccessFile::open(&path, OpenMode::WRITE | OpenMode::TRUNCATE).unwrap();
        assert_eq!(file.size().unwrap(), 0);
    }
}
