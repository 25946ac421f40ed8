//! Shared memory regions
//!
//! The publisher owns the region; we only ever read it. `RegionOpener`
//! is the seam that lets tests substitute an in-memory region for /dev/shm.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{FramegovError, Result};

/// A read-only view of a published region
pub trait SharedRegion: Send + Sync {
    /// Size of the mapped region in bytes
    fn len(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset`
    ///
    /// Fails with `TelemetryDisconnected` when the range is no longer backed.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens regions by their well-known name
pub trait RegionOpener: Send + Sync {
    /// Whether a region with this name is currently published
    fn exists(&self, name: &str) -> bool;

    fn open(&self, name: &str) -> Result<Box<dyn SharedRegion>>;
}

fn out_of_bounds(offset: usize, want: usize, len: usize) -> FramegovError {
    FramegovError::disconnected(format!(
        "read of {} bytes at {} exceeds region of {} bytes",
        want, offset, len
    ))
}

fn copy_range(src: &[u8], offset: usize, buf: &mut [u8]) -> Result<()> {
    let end = offset
        .checked_add(buf.len())
        .ok_or_else(|| out_of_bounds(offset, buf.len(), src.len()))?;
    let slice = src
        .get(offset..end)
        .ok_or_else(|| out_of_bounds(offset, buf.len(), src.len()))?;
    buf.copy_from_slice(slice);
    Ok(())
}

// ============================================================================
// POSIX shared memory (/dev/shm)
// ============================================================================

/// A file under the shm directory, read with positioned reads
///
/// The publisher may shrink or replace the file at any time, so nothing is
/// mapped: a short read is reported as a disconnection instead of faulting.
pub struct FileRegion {
    file: File,
    path: PathBuf,
}

impl SharedRegion for FileRegion {
    fn len(&self) -> usize {
        self.file
            .metadata()
            .map(|m| usize::try_from(m.len()).unwrap_or(usize::MAX))
            .unwrap_or(0)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, offset as u64)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => out_of_bounds(offset, buf.len(), self.len()),
                _ => FramegovError::disconnected(format!("{}: {}", self.path.display(), e)),
            })
    }
}

/// Opens regions published as files in a shm directory (normally /dev/shm)
#[derive(Debug, Clone)]
pub struct ShmOpener {
    dir: PathBuf,
}

impl ShmOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl RegionOpener for ShmOpener {
    fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    fn open(&self, name: &str) -> Result<Box<dyn SharedRegion>> {
        let path = self.path_for(name);
        let file = File::open(&path).map_err(|e| {
            FramegovError::TelemetryUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(FramegovError::TelemetryUnavailable(format!(
                "{} is empty",
                path.display()
            )));
        }

        debug!("Opened {} ({} bytes)", path.display(), len);
        Ok(Box::new(FileRegion { file, path }))
    }
}

// ============================================================================
// In-memory regions
// ============================================================================

/// Snapshot of bytes held in memory
pub struct MemoryRegion {
    bytes: Arc<Vec<u8>>,
}

impl MemoryRegion {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }
}

impl SharedRegion for MemoryRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        copy_range(&self.bytes, offset, buf)
    }
}

/// Named in-memory regions; publishing replaces the bytes a later `open` sees
#[derive(Clone, Default)]
pub struct MemoryOpener {
    regions: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, bytes: Vec<u8>) {
        self.regions.write().insert(name.to_string(), Arc::new(bytes));
    }

    pub fn remove(&self, name: &str) {
        self.regions.write().remove(name);
    }
}

impl RegionOpener for MemoryOpener {
    fn exists(&self, name: &str) -> bool {
        self.regions.read().contains_key(name)
    }

    fn open(&self, name: &str) -> Result<Box<dyn SharedRegion>> {
        let bytes = self
            .regions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FramegovError::TelemetryUnavailable(format!("{} not published", name)))?;
        Ok(Box::new(MemoryRegion { bytes }))
    }
}
