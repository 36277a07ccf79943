//! File-backed shared memory mappings.

use crate::{Result, ShmError};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// A named shared-memory region backed by a file (typically under
/// `/dev/shm`), mapped read-write.
///
/// The creating side owns the region: it truncates the file to the requested
/// length, zeroes it implicitly, and unlinks the name when dropped.
/// Attaching sides map the existing file and never remove it.
pub struct ShmRegion {
    map: MmapMut,
    path: PathBuf,
    is_creator: bool,
}

impl ShmRegion {
    /// Creates a fresh region of `len` bytes. Fails if the name exists.
    pub fn create(path: &Path, len: usize) -> Result<ShmRegion> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        tracing::debug!(path = %path.display(), len, "created shm region");
        Ok(ShmRegion {
            map,
            path: path.to_owned(),
            is_creator: true,
        })
    }

    /// Attaches to an existing region created by another process.
    pub fn open(path: &Path) -> Result<ShmRegion> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(ShmRegion {
            map,
            path: path.to_owned(),
            is_creator: false,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    /// Checks that a window `[offset, offset + len)` lies inside the region.
    pub fn check_window(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).ok_or(ShmError::Corrupt(
            "shm window offset arithmetic overflowed",
        ))?;
        if end > self.map.len() {
            return Err(ShmError::TooSmall {
                needed: end,
                available: self.map.len(),
            });
        }
        Ok(())
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.is_creator {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "could not unlink shm region");
            }
        }
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .field("is_creator", &self.is_creator)
            .finish()
    }
}
