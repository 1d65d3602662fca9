//! The segmented commit log.
//!
//! A [`Log`] owns an ordered list of segments in a single directory and
//! routes every operation by offset. The last segment is always the active
//! one; appends go to it and rotate it out once it reaches a byte cap.
//!
//! # Directory layout
//!
//! ```text
//! /data-dir/
//!   0.store      0.index      # segment at base offset 0
//!   14.store     14.index     # segment at base offset 14
//!   29.store     29.index     # active segment
//! ```
//!
//! On open the directory is scanned and segments are rebuilt from the file
//! names; each segment recovers its next offset from its index, so store
//! bytes past the last indexed frame are silently orphaned (the index is the
//! source of truth after a crash).
//!
//! # Locking
//!
//! A readers-writer lock guards the segment list. `append`, `truncate`,
//! `close`, `remove` and `reset` take the writer half; `read`,
//! `lowest_offset`, `highest_offset` and `reader` take the reader half.
//! Stores serialize themselves internally, so reader-half callers can touch
//! them safely.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use strata_api::log_v1::Record;

use crate::config::Config;
use crate::error::{LogError, LogResult};
use crate::segment::Segment;
use crate::store::Store;

/// Segmented, durable commit log.
#[derive(Debug)]
pub struct Log {
    dir: PathBuf,
    config: Config,
    /// Segments in ascending base-offset order; the last one is active.
    segments: RwLock<Vec<Segment>>,
}

impl Log {
    /// Opens the log in `dir`, recovering any existing segments. A fresh
    /// directory gets one segment at the configured initial offset.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> LogResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = config.with_defaults();
        fs::create_dir_all(&dir).map_err(|e| LogError::io("create log dir", e))?;
        let segments = Self::setup(&dir, config)?;
        Ok(Self {
            dir,
            config,
            segments: RwLock::new(segments),
        })
    }

    /// Scans `dir` and opens one segment per base offset found, oldest
    /// first. Each base offset appears once per file extension; duplicates
    /// are collapsed.
    fn setup(dir: &Path, config: Config) -> LogResult<Vec<Segment>> {
        let mut base_offsets = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| LogError::io("read log dir", e))? {
            let entry = entry.map_err(|e| LogError::io("read log dir", e))?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(base) => base_offsets.push(base),
                Err(_) => debug!(path = %path.display(), "skipping non-segment file"),
            }
        }
        base_offsets.sort_unstable();
        base_offsets.dedup();

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base in base_offsets {
            let segment = Segment::open(dir, base, config.segment)?;
            debug!(
                base_offset = base,
                next_offset = segment.next_offset(),
                "recovered segment"
            );
            segments.push(segment);
        }
        if segments.is_empty() {
            segments.push(Segment::open(
                dir,
                config.segment.initial_offset,
                config.segment,
            )?);
        }
        Ok(segments)
    }

    /// Appends a record and returns its assigned offset.
    ///
    /// The record's offset field is overwritten with the assignment. When
    /// the active segment is maxed after the append, a fresh segment is
    /// created at `offset + 1` and becomes active; a rotation failure fails
    /// this call even though the record itself was written, and the next
    /// append re-attempts the rotation.
    pub fn append(&self, record: &mut Record) -> LogResult<u64> {
        let mut segments = self.segments.write().unwrap();
        let active = segments.last_mut().ok_or(LogError::Closed)?;
        let offset = match active.append(record) {
            Ok(offset) => offset,
            Err(LogError::Eof) => {
                // The index ran out mid-slot: a cap that is not a multiple
                // of the entry width exhausts before `is_maxed` trips.
                // Rotate now so the next append lands in a fresh segment;
                // this one still fails.
                let base = active.next_offset();
                let fresh = Segment::open(&self.dir, base, self.config.segment)?;
                segments.push(fresh);
                return Err(LogError::Eof);
            }
            Err(err) => return Err(err),
        };
        if active.is_maxed() {
            let fresh = Segment::open(&self.dir, offset + 1, self.config.segment)?;
            segments.push(fresh);
        }
        Ok(offset)
    }

    /// Reads the record at `offset`.
    ///
    /// # Errors
    /// [`LogError::OffsetOutOfRange`] when no segment covers the offset.
    pub fn read(&self, offset: u64) -> LogResult<Record> {
        let segments = self.segments.read().unwrap();
        let segment = segments
            .iter()
            .find(|s| s.base_offset() <= offset && offset < s.next_offset());
        match segment {
            Some(s) => s.read(offset),
            None => Err(LogError::OffsetOutOfRange { offset }),
        }
    }

    /// Base offset of the oldest segment.
    pub fn lowest_offset(&self) -> LogResult<u64> {
        let segments = self.segments.read().unwrap();
        segments
            .first()
            .map(Segment::base_offset)
            .ok_or(LogError::Closed)
    }

    /// Offset of the newest record: the active segment's next offset minus
    /// one, saturating at `0` for a log that has never appended.
    pub fn highest_offset(&self) -> LogResult<u64> {
        let segments = self.segments.read().unwrap();
        let next = segments
            .last()
            .map(Segment::next_offset)
            .ok_or(LogError::Closed)?;
        Ok(next.saturating_sub(1))
    }

    /// Removes every segment whose records all lie below `lowest`, freeing
    /// their disk space.
    ///
    /// Whole segments only: an intra-segment `lowest` is quantized up to the
    /// containing segment's boundary, so records at and above `lowest`
    /// always survive.
    pub fn truncate(&self, lowest: u64) -> LogResult<()> {
        let mut segments = self.segments.write().unwrap();
        let mut kept = Vec::with_capacity(segments.len());
        for segment in segments.drain(..) {
            if segment.next_offset() <= lowest {
                segment.remove()?;
            } else {
                kept.push(segment);
            }
        }
        *segments = kept;
        Ok(())
    }

    /// Returns a lazy, single-pass reader over the raw framed bytes of every
    /// segment store, in segment order.
    ///
    /// The stream is the stores' byte-for-byte content (length prefixes
    /// included), not a decoded record sequence; it is meant for
    /// disaster-recovery dumps and snapshots. Each store is read up to its
    /// size at the time of this call, and the reader stays valid even if the
    /// log is truncated while it is being consumed.
    pub fn reader(&self) -> LogReader {
        let segments = self.segments.read().unwrap();
        let stores = segments
            .iter()
            .map(|s| StoreReader {
                store: s.store_handle(),
                pos: 0,
                end: s.store_size(),
            })
            .collect();
        LogReader { stores }
    }

    /// Closes every segment, flushing stores and truncating indexes to their
    /// used size. Idempotent; a closed log rejects further operations.
    pub fn close(&self) -> LogResult<()> {
        let mut segments = self.segments.write().unwrap();
        for segment in segments.drain(..) {
            segment.close()?;
        }
        Ok(())
    }

    /// Closes the log and deletes its directory.
    pub fn remove(&self) -> LogResult<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir).map_err(|e| LogError::io("remove log dir", e))
    }

    /// Removes the log and reopens it empty in the same directory.
    pub fn reset(&self) -> LogResult<()> {
        self.remove()?;
        fs::create_dir_all(&self.dir).map_err(|e| LogError::io("create log dir", e))?;
        let mut segments = self.segments.write().unwrap();
        *segments = Self::setup(&self.dir, self.config)?;
        Ok(())
    }
}

/// Sequential reader over the concatenated segment stores.
///
/// Created by [`Log::reader`].
#[derive(Debug)]
pub struct LogReader {
    stores: VecDeque<StoreReader>,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(front) = self.stores.front_mut() {
            let n = front.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.stores.pop_front();
        }
        Ok(0)
    }
}

/// Reads one store from position 0 up to its size at reader creation.
#[derive(Debug)]
struct StoreReader {
    store: Arc<Store>,
    pos: u64,
    end: u64,
}

impl Read for StoreReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        #[allow(clippy::cast_possible_truncation)]
        let want = (self.end - self.pos).min(buf.len() as u64) as usize;
        self.store
            .read_at(&mut buf[..want], self.pos)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.pos += want as u64;
        Ok(want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LEN_WIDTH;
    use prost::Message;

    fn record(value: &str) -> Record {
        Record {
            value: value.as_bytes().to_vec(),
            offset: 0,
        }
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), Config::default()).unwrap();

        let mut rec = record("hello world");
        let offset = log.append(&mut rec).unwrap();
        assert_eq!(offset, 0);

        let got = log.read(0).unwrap();
        assert_eq!(got.value, b"hello world");
        assert_eq!(got.offset, 0);
    }

    #[test]
    fn test_read_out_of_range_carries_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), Config::default()).unwrap();

        match log.read(1) {
            Err(LogError::OffsetOutOfRange { offset }) => assert_eq!(offset, 1),
            other => panic!("expected offset out of range, got {other:?}"),
        }
    }

    #[test]
    fn test_reopen_preserves_range() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let log = Log::open(dir.path(), config).unwrap();
        for i in 0..3 {
            let off = log.append(&mut record("hello world")).unwrap();
            assert_eq!(off, i);
        }
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 2);
        log.close().unwrap();

        let log = Log::open(dir.path(), config).unwrap();
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 2);
        for i in 0..3 {
            assert_eq!(log.read(i).unwrap().offset, i);
        }
    }

    #[test]
    fn test_reader_streams_raw_frames() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), Config::default()).unwrap();
        log.append(&mut record("hello world")).unwrap();

        let mut bytes = Vec::new();
        log.reader().read_to_end(&mut bytes).unwrap();

        // Skip the frame's length prefix and decode the rest as a record.
        let decoded = Record::decode(&bytes[LEN_WIDTH as usize..]).unwrap();
        assert_eq!(decoded.value, b"hello world");
    }

    #[test]
    fn test_truncate_drops_whole_segments() {
        let dir = tempfile::tempdir().unwrap();
        // 32-byte store cap: offsets {0, 1} land in the first segment,
        // offset 2 in the second.
        let config = Config::default().with_max_store_bytes(32);
        let log = Log::open(dir.path(), config).unwrap();

        for i in 0..3 {
            log.append(&mut record(&format!("hello world {i}"))).unwrap();
        }

        // A truncation point inside a segment is quantized up to its
        // boundary: offset 1 is >= lowest and must survive, so its whole
        // segment stays.
        log.truncate(1).unwrap();
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.read(1).unwrap().value, b"hello world 1");

        // At the boundary the first segment's records all lie below lowest
        // and the segment goes.
        log.truncate(2).unwrap();
        assert!(matches!(
            log.read(0),
            Err(LogError::OffsetOutOfRange { offset: 0 })
        ));
        assert!(matches!(
            log.read(1),
            Err(LogError::OffsetOutOfRange { offset: 1 })
        ));
        assert_eq!(log.lowest_offset().unwrap(), 2);
        assert_eq!(log.read(2).unwrap().value, b"hello world 2");
    }

    #[test]
    fn test_rotation_keeps_offsets_dense() {
        let dir = tempfile::tempdir().unwrap();
        // Small store cap: every append maxes the segment.
        let config = Config::default().with_max_store_bytes(1);
        let log = Log::open(dir.path(), config).unwrap();

        for want in 0..8 {
            let off = log.append(&mut record("r")).unwrap();
            assert_eq!(off, want);
        }
        for want in 0..8 {
            assert_eq!(log.read(want).unwrap().offset, want);
        }

        // One store/index pair per record.
        let stores = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("store")
            })
            .count();
        assert!(stores > 1, "expected rotation to create multiple segments");
    }

    #[test]
    fn test_exhausted_index_rotates_for_next_append() {
        let dir = tempfile::tempdir().unwrap();
        // 2.5 entries worth of index: the third append exhausts the index
        // before the maxed check can trip.
        let config = Config::default().with_max_index_bytes(30);
        let log = Log::open(dir.path(), config).unwrap();

        assert_eq!(log.append(&mut record("a")).unwrap(), 0);
        assert_eq!(log.append(&mut record("b")).unwrap(), 1);

        assert!(matches!(log.append(&mut record("c")), Err(LogError::Eof)));

        // The failed append rotated; offsets stay dense.
        assert_eq!(log.append(&mut record("c")).unwrap(), 2);
        assert_eq!(log.read(2).unwrap().value, b"c");
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), Config::default()).unwrap();
        log.append(&mut record("x")).unwrap();

        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(log.append(&mut record("x")), Err(LogError::Closed)));
    }

    #[test]
    fn test_reset_yields_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), Config::default()).unwrap();
        for _ in 0..3 {
            log.append(&mut record("x")).unwrap();
        }

        log.reset().unwrap();
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 0);
        assert!(log.read(0).is_err());

        // Reset of a reset log is still an empty log.
        log.reset().unwrap();
        assert_eq!(log.highest_offset().unwrap(), 0);
    }

    #[test]
    fn test_initial_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_initial_offset(10);
        let log = Log::open(dir.path(), config).unwrap();

        assert_eq!(log.append(&mut record("first")).unwrap(), 10);
        assert_eq!(log.lowest_offset().unwrap(), 10);
        assert_eq!(log.highest_offset().unwrap(), 10);
    }

    #[test]
    fn test_reader_spans_segments() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_max_store_bytes(1);
        let log = Log::open(dir.path(), config).unwrap();

        let values = ["alpha", "beta", "gamma"];
        for value in values {
            log.append(&mut record(value)).unwrap();
        }

        let mut bytes = Vec::new();
        log.reader().read_to_end(&mut bytes).unwrap();

        // Walk the frames back out of the byte stream.
        let mut at = 0usize;
        for (i, value) in values.iter().enumerate() {
            let mut len_bytes = [0u8; LEN_WIDTH as usize];
            len_bytes.copy_from_slice(&bytes[at..at + LEN_WIDTH as usize]);
            let len = u64::from_be_bytes(len_bytes) as usize;
            at += LEN_WIDTH as usize;

            let decoded = Record::decode(&bytes[at..at + len]).unwrap();
            assert_eq!(decoded.value, value.as_bytes());
            assert_eq!(decoded.offset, i as u64);
            at += len;
        }
        assert_eq!(at, bytes.len());
    }
}
