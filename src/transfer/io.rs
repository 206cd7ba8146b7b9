//! Positioned file I/O for chunk workers.
//!
//! Every call opens its own handle, so concurrent workers never contend on
//! shared file state; the offsets they write are disjoint by construction.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Creates `path` at exactly `size` bytes, making parent directories as
/// needed. An existing file is truncated; resumed transfers never call this.
pub fn allocate(path: &Path, size: u64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    file.set_len(size)
}

/// Reads exactly `len` bytes at `offset`.
pub fn read_at(path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Writes `data` at `offset` into an existing file.
pub fn write_at(path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_creates_file_at_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");

        allocate(&path, 1234).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 1234);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunked.bin");
        allocate(&path, 32).unwrap();

        write_at(&path, 8, b"abcdef").unwrap();
        assert_eq!(read_at(&path, 8, 6).unwrap(), b"abcdef");
        // Untouched bytes stay zeroed.
        assert_eq!(read_at(&path, 0, 8).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        allocate(&path, 4).unwrap();

        assert!(read_at(&path, 2, 8).is_err());
    }

    #[test]
    fn test_write_into_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-allocated.bin");
        assert!(write_at(&path, 0, b"x").is_err());
    }
}
