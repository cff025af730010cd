//! File access backends for tile fetches.
//!
//! Two interchangeable backends: plain positional reads, and private
//! copy-on-write memory maps. Files are opened read-only per access and
//! closed immediately; the OS page cache does the heavy lifting across
//! repeated fetches. The `mmap` cargo feature flips the default backend.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::storage::schema::{ATTR_FILE_SUFFIX, VAR_FILE_INFIX};
use crate::{LatticaError, Result};

/// Tile-fetch backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBackend {
    /// Positional reads into caller-owned buffers.
    Read,
    /// Private (copy-on-write) memory maps of the requested byte range.
    Mmap,
}

impl Default for IoBackend {
    fn default() -> Self {
        if cfg!(feature = "mmap") {
            IoBackend::Mmap
        } else {
            IoBackend::Read
        }
    }
}

/// Path of an attribute's fixed data file inside a fragment directory.
pub fn attr_path(fragment_dir: &Path, attr_name: &str) -> PathBuf {
    fragment_dir.join(format!("{attr_name}{ATTR_FILE_SUFFIX}"))
}

/// Path of a variable attribute's payload file.
pub fn attr_var_path(fragment_dir: &Path, attr_name: &str) -> PathBuf {
    fragment_dir.join(format!("{attr_name}{VAR_FILE_INFIX}{ATTR_FILE_SUFFIX}"))
}

pub fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Fill `buf` from `path` starting at `offset`. Errors on short files
/// instead of returning partial data.
pub fn read_exact_at(path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
    let file = File::open(path)?;
    let available = file.metadata()?.len();
    if offset + buf.len() as u64 > available {
        return Err(LatticaError::ShortRead { wanted: buf.len(), offset, available });
    }
    pread(&file, buf, offset)?;
    Ok(())
}

/// Map `len` bytes of `path` at `offset` as a private, writable region.
///
/// memmap2 floors the offset to the page size internally and hands back
/// the pointer advanced by the remainder, so unaligned tile offsets are
/// fine. The mapping is copy-on-write: offset rebasing can scribble on it
/// without touching the file.
pub fn map_range(path: &Path, offset: u64, len: usize) -> Result<MmapMut> {
    let file = File::open(path)?;
    let available = file.metadata()?.len();
    if offset + len as u64 > available {
        return Err(LatticaError::ShortRead { wanted: len, offset, available });
    }
    // SAFETY: the map is private; later writes to the file cannot alias it.
    let map = unsafe { MmapOptions::new().offset(offset).len(len).map_copy(&file)? };
    Ok(map)
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total_read = 0;
    while total_read < buf.len() {
        let n = file.seek_read(&mut buf[total_read..], offset + total_read as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "EOF"));
        }
        total_read += n;
    }
    Ok(())
}
