//! Shared-file plumbing: advisory locks, atomic replacement and size-capped
//! reads for the state files that several hook processes may touch at once.

pub mod lock;

pub use lock::FileLock;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Result of reading a state file with a size cap
#[derive(Debug)]
pub enum CappedRead {
    Missing,
    TooLarge(u64),
    Contents(String),
}

pub fn read_capped(path: &Path, max_bytes: u64) -> io::Result<CappedRead> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CappedRead::Missing),
        Err(e) => return Err(e),
    };
    if meta.len() > max_bytes {
        return Ok(CappedRead::TooLarge(meta.len()));
    }
    match fs::read_to_string(path) {
        Ok(text) => Ok(CappedRead::Contents(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CappedRead::Missing),
        Err(e) => Err(e),
    }
}

/// Replace `path` via a sibling temp file so readers never observe a partial write
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like `atomic_write`, but never replaces an existing file. Returns whether
/// this call created it.
pub fn write_new(path: &Path, contents: &[u8]) -> io::Result<bool> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
