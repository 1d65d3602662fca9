//! Append-only store file.
//!
//! A store is a flat file of length-prefixed frames:
//!
//! ```text
//! +----------------+---------------+----------------+---------------+
//! | len (8, BE)    | payload       | len (8, BE)    | payload       | ...
//! +----------------+---------------+----------------+---------------+
//! ```
//!
//! Appends go through a buffered writer; reads are positional and flush the
//! writer first, so a read always observes every prior append. A single
//! mutex serializes all operations on the store.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{LogError, LogResult};

/// Number of bytes in a frame's length prefix.
pub(crate) const LEN_WIDTH: u64 = 8;

/// Buffered, append-only frame file with positional reads.
#[derive(Debug)]
pub(crate) struct Store {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Handle used for positional reads; never moves a cursor.
    file: File,
    /// Buffered writer over a second handle opened in append mode.
    writer: std::io::BufWriter<File>,
    /// Current logical size: position at which the next frame lands.
    size: u64,
}

impl Store {
    /// Opens or creates the store file at `path`, resuming at its current
    /// size.
    pub(crate) fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogError::io("open store", e))?;
        let size = file
            .metadata()
            .map_err(|e| LogError::io("stat store", e))?
            .len();
        let writer = std::io::BufWriter::new(
            file.try_clone()
                .map_err(|e| LogError::io("clone store handle", e))?,
        );
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, writer, size }),
        })
    }

    /// Appends a frame holding `p`.
    ///
    /// Returns the total bytes written (payload plus length prefix) and the
    /// position at which the frame starts.
    ///
    /// # Errors
    /// Any write failure surfaces unchanged; the frame may be partially
    /// written, which the index-is-truth recovery rule tolerates.
    pub(crate) fn append(&self, p: &[u8]) -> LogResult<(u64, u64)> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.size;
        inner
            .writer
            .write_all(&(p.len() as u64).to_be_bytes())
            .map_err(|e| LogError::io("append frame length", e))?;
        inner
            .writer
            .write_all(p)
            .map_err(|e| LogError::io("append frame payload", e))?;
        let written = LEN_WIDTH + p.len() as u64;
        inner.size += written;
        Ok((written, pos))
    }

    /// Reads the frame starting at `pos` and returns its payload.
    pub(crate) fn read(&self, pos: u64) -> LogResult<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .writer
            .flush()
            .map_err(|e| LogError::io("flush store", e))?;

        let mut len_bytes = [0u8; LEN_WIDTH as usize];
        inner
            .file
            .read_exact_at(&mut len_bytes, pos)
            .map_err(|e| LogError::io("read frame length", e))?;
        let len = u64::from_be_bytes(len_bytes);

        let mut payload = vec![0u8; len as usize];
        inner
            .file
            .read_exact_at(&mut payload, pos + LEN_WIDTH)
            .map_err(|e| LogError::io("read frame payload", e))?;
        Ok(payload)
    }

    /// Fills `buf` with bytes starting at `off`. Positional; does not move
    /// any cursor.
    pub(crate) fn read_at(&self, buf: &mut [u8], off: u64) -> LogResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .writer
            .flush()
            .map_err(|e| LogError::io("flush store", e))?;
        inner
            .file
            .read_exact_at(buf, off)
            .map_err(|e| LogError::io("read store", e))?;
        Ok(buf.len())
    }

    /// Current logical size in bytes.
    pub(crate) fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    /// Flushes buffered writes. The file itself closes when the last handle
    /// drops.
    pub(crate) fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .writer
            .flush()
            .map_err(|e| LogError::io("flush store", e))
    }

    /// Path of the backing file, used for segment removal.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = b"hello world";

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("0.store")).unwrap();

        let (written, pos) = store.append(PAYLOAD).unwrap();
        assert_eq!(written, LEN_WIDTH + PAYLOAD.len() as u64);
        assert_eq!(pos, 0);

        assert_eq!(store.read(pos).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_positions_advance_by_frame_width() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("0.store")).unwrap();

        let width = LEN_WIDTH + PAYLOAD.len() as u64;
        for i in 0..3 {
            let (written, pos) = store.append(PAYLOAD).unwrap();
            assert_eq!(written, width);
            assert_eq!(pos, i * width);
        }
        assert_eq!(store.size(), 3 * width);

        for i in 0..3 {
            assert_eq!(store.read(i * width).unwrap(), PAYLOAD);
        }
    }

    #[test]
    fn test_read_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("0.store")).unwrap();
        store.append(PAYLOAD).unwrap();

        let mut len_bytes = [0u8; LEN_WIDTH as usize];
        let n = store.read_at(&mut len_bytes, 0).unwrap();
        assert_eq!(n, LEN_WIDTH as usize);
        assert_eq!(u64::from_be_bytes(len_bytes), PAYLOAD.len() as u64);

        let mut payload = vec![0u8; PAYLOAD.len()];
        store.read_at(&mut payload, LEN_WIDTH).unwrap();
        assert_eq!(payload, PAYLOAD);
    }

    #[test]
    fn test_reopen_resumes_at_previous_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.store");

        let store = Store::open(&path).unwrap();
        let (written, _) = store.append(PAYLOAD).unwrap();
        store.close().unwrap();
        drop(store);

        let store = Store::open(&path).unwrap();
        assert_eq!(store.size(), written);
        assert_eq!(store.read(0).unwrap(), PAYLOAD);

        let (_, pos) = store.append(PAYLOAD).unwrap();
        assert_eq!(pos, written);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("0.store")).unwrap();
        store.append(PAYLOAD).unwrap();

        assert!(matches!(store.read(1024), Err(LogError::Io { .. })));
    }
}
