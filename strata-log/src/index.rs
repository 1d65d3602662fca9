//! Memory-mapped offset index.
//!
//! An index file is a dense array of fixed-width entries mapping a record's
//! offset relative to the segment's base to its frame position in the store:
//!
//! ```text
//! +----------------------+------------------------+
//! | relative offset (4)  | store position (8)     |   12 bytes, big-endian
//! +----------------------+------------------------+
//! ```
//!
//! The file is grown to its configured maximum before mapping so the mapped
//! region is stable for the index's lifetime, and truncated back to its used
//! size on close so a later open can infer the entry count from the file
//! length.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{LogError, LogResult};

/// Width of the relative-offset column.
const OFF_WIDTH: u64 = 4;
/// Width of the store-position column.
const POS_WIDTH: u64 = 8;
/// Width of one index entry.
pub(crate) const ENT_WIDTH: u64 = OFF_WIDTH + POS_WIDTH;

/// Fixed-width, memory-mapped offset index.
#[derive(Debug)]
pub(crate) struct Index {
    file: File,
    mmap: MmapMut,
    /// Bytes of used entries; the write cursor into the map.
    size: u64,
    path: PathBuf,
}

impl Index {
    /// Opens or creates the index at `path`, padding the file to
    /// `max_index_bytes` and mapping it read-write. The used size is the
    /// file's length before padding.
    pub(crate) fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| LogError::io("open index", e))?;
        let size = file
            .metadata()
            .map_err(|e| LogError::io("stat index", e))?
            .len();
        file.set_len(max_index_bytes)
            .map_err(|e| LogError::io("grow index", e))?;
        // Safety: the file is open read-write and outlives the map; entries
        // are only accessed through the checked read/write methods below.
        #[allow(unsafe_code)]
        let mmap =
            unsafe { MmapMut::map_mut(&file) }.map_err(|e| LogError::io("map index", e))?;
        Ok(Self {
            file,
            mmap,
            size,
            path,
        })
    }

    /// Reads the entry at relative slot `rel`, or the last entry when `rel`
    /// is `None`.
    ///
    /// # Errors
    /// [`LogError::Eof`] if the index is empty or the slot is past the last
    /// used entry.
    pub(crate) fn read(&self, rel: Option<u32>) -> LogResult<(u32, u64)> {
        if self.size == 0 {
            return Err(LogError::Eof);
        }
        let entries = self.size / ENT_WIDTH;
        let slot = match rel {
            Some(r) => u64::from(r),
            None => entries - 1,
        };
        if slot >= entries {
            return Err(LogError::Eof);
        }

        let at = (slot * ENT_WIDTH) as usize;
        let mut off_bytes = [0u8; OFF_WIDTH as usize];
        off_bytes.copy_from_slice(&self.mmap[at..at + OFF_WIDTH as usize]);
        let mut pos_bytes = [0u8; POS_WIDTH as usize];
        pos_bytes.copy_from_slice(&self.mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize]);
        Ok((u32::from_be_bytes(off_bytes), u64::from_be_bytes(pos_bytes)))
    }

    /// Appends an entry.
    ///
    /// # Errors
    /// [`LogError::Eof`] if the map has no room for another entry; the
    /// segment is maxed at that point.
    pub(crate) fn write(&mut self, rel: u32, pos: u64) -> LogResult<()> {
        if self.size + ENT_WIDTH > self.mmap.len() as u64 {
            return Err(LogError::Eof);
        }
        let at = self.size as usize;
        self.mmap[at..at + OFF_WIDTH as usize].copy_from_slice(&rel.to_be_bytes());
        self.mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize]
            .copy_from_slice(&pos.to_be_bytes());
        self.size += ENT_WIDTH;
        Ok(())
    }

    /// Bytes of used entries.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Syncs the map and the file, then truncates the file back to its used
    /// size so the next open can infer the entry count.
    pub(crate) fn close(self) -> LogResult<()> {
        self.mmap
            .flush()
            .map_err(|e| LogError::io("sync index map", e))?;
        self.file
            .sync_all()
            .map_err(|e| LogError::io("sync index file", e))?;
        let Self {
            file, mmap, size, ..
        } = self;
        // Unmap before shrinking the file under the mapping.
        drop(mmap);
        file.set_len(size)
            .map_err(|e| LogError::io("truncate index", e))?;
        Ok(())
    }

    /// Path of the backing file, used for segment removal.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
