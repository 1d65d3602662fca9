//! Log segments.
//!
//! A segment pairs one store file with one index file under a common base
//! offset (`{base_offset}.store` / `{base_offset}.index`). It assigns
//! offsets on append and resolves absolute offsets to store positions on
//! read. Segments are not internally synchronized; the owning log serializes
//! access.

use std::path::Path;
use std::sync::Arc;

use prost::Message;

use strata_api::log_v1::Record;

use crate::config::SegmentConfig;
use crate::error::{LogError, LogResult};
use crate::index::Index;
use crate::store::Store;

#[derive(Debug)]
pub(crate) struct Segment {
    store: Arc<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: SegmentConfig,
}

impl Segment {
    /// Opens or creates the segment with the given base offset in `dir`.
    ///
    /// The next offset to assign is recovered from the index's last entry:
    /// `base + last_relative + 1`, or `base` for an empty index.
    pub(crate) fn open(dir: &Path, base_offset: u64, config: SegmentConfig) -> LogResult<Self> {
        let store = Arc::new(Store::open(dir.join(format!("{base_offset}.store")))?);
        let index = Index::open(
            dir.join(format!("{base_offset}.index")),
            config.max_index_bytes,
        )?;
        let next_offset = match index.read(None) {
            Ok((rel, _)) => base_offset + u64::from(rel) + 1,
            Err(_) => base_offset,
        };
        Ok(Self {
            store,
            index,
            base_offset,
            next_offset,
            config,
        })
    }

    /// Appends a record, assigning it the segment's next offset.
    ///
    /// The record is stored in its protobuf wire form, the same encoding the
    /// external API uses. A failed index write after a successful store
    /// append leaves an orphan frame; the index-is-truth recovery rule
    /// ignores it on the next open.
    pub(crate) fn append(&mut self, record: &mut Record) -> LogResult<u64> {
        let offset = self.next_offset;
        record.offset = offset;

        let encoded = record.encode_to_vec();
        let (_, pos) = self.store.append(&encoded)?;
        // Relative offsets fit: the index caps a segment well below 2^32
        // entries.
        #[allow(clippy::cast_possible_truncation)]
        self.index.write((offset - self.base_offset) as u32, pos)?;
        self.next_offset += 1;
        Ok(offset)
    }

    /// Reads the record at the given absolute offset.
    ///
    /// The caller guarantees `offset` lies in `[base_offset, next_offset)`;
    /// out-of-segment offsets surface as the index's EOF.
    pub(crate) fn read(&self, offset: u64) -> LogResult<Record> {
        #[allow(clippy::cast_possible_truncation)]
        let rel = (offset - self.base_offset) as u32;
        let (_, pos) = self.index.read(Some(rel))?;
        let frame = self.store.read(pos)?;
        Record::decode(frame.as_slice()).map_err(|e| LogError::Corruption {
            message: e.to_string(),
        })
    }

    /// True when the store or the index has reached its byte cap.
    pub(crate) fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() >= self.config.max_index_bytes
    }

    pub(crate) fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Shared handle to the store, for the log's concatenating reader.
    pub(crate) fn store_handle(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Current store size in bytes.
    pub(crate) fn store_size(&self) -> u64 {
        self.store.size()
    }

    /// Closes index then store.
    pub(crate) fn close(self) -> LogResult<()> {
        self.index.close()?;
        self.store.close()
    }

    /// Closes the segment and deletes both files.
    pub(crate) fn remove(self) -> LogResult<()> {
        let index_path = self.index.path().to_path_buf();
        let store_path = self.store.path().to_path_buf();
        self.close()?;
        std::fs::remove_file(&index_path).map_err(|e| LogError::io("remove index", e))?;
        std::fs::remove_file(&store_path).map_err(|e| LogError::io("remove store", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ENT_WIDTH;
    use crate::store::LEN_WIDTH;

    fn record(value: &str) -> Record {
        Record {
            value: value.as_bytes().to_vec(),
            offset: 0,
        }
    }

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        }
    }

    #[test]
    fn test_append_assigns_sequential_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 1024)).unwrap();
        assert_eq!(segment.next_offset(), 16);

        for want in 16..19 {
            let mut rec = record("hello world");
            let off = segment.append(&mut rec).unwrap();
            assert_eq!(off, want);
            assert_eq!(rec.offset, want);

            let got = segment.read(want).unwrap();
            assert_eq!(got.value, b"hello world");
            assert_eq!(got.offset, want);
        }
        assert_eq!(segment.next_offset(), 19);
    }

    #[test]
    fn test_maxed_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(1024, 3 * ENT_WIDTH)).unwrap();

        for _ in 0..3 {
            assert!(!segment.is_maxed());
            segment.append(&mut record("x")).unwrap();
        }
        assert!(segment.is_maxed());
        assert!(matches!(
            segment.append(&mut record("x")),
            Err(LogError::Eof)
        ));
    }

    #[test]
    fn test_maxed_by_store() {
        let dir = tempfile::tempdir().unwrap();
        let value = "hello world";
        let frame = LEN_WIDTH + record(value).encoded_len() as u64;
        let mut segment = Segment::open(dir.path(), 0, config(frame, 1024)).unwrap();

        segment.append(&mut record(value)).unwrap();
        assert!(segment.is_maxed());
    }

    #[test]
    fn test_reopen_recovers_next_offset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(1024, 1024);

        let mut segment = Segment::open(dir.path(), 5, cfg).unwrap();
        for _ in 0..4 {
            segment.append(&mut record("persisted")).unwrap();
        }
        segment.close().unwrap();

        let segment = Segment::open(dir.path(), 5, cfg).unwrap();
        assert_eq!(segment.base_offset(), 5);
        assert_eq!(segment.next_offset(), 9);
        assert_eq!(segment.read(7).unwrap().value, b"persisted");
    }

    #[test]
    fn test_remove_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(1024, 1024)).unwrap();
        segment.append(&mut record("gone")).unwrap();
        segment.remove().unwrap();

        assert!(!dir.path().join("0.store").exists());
        assert!(!dir.path().join("0.index").exists());
    }
}
