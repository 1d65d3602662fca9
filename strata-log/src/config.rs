//! Log configuration.

/// Configuration for a log instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Per-segment settings.
    pub segment: SegmentConfig,
}

/// Per-segment byte caps and the starting offset for a fresh log.
///
/// A segment rotates when either cap is reached, whichever hits first. Zero
/// caps are replaced by the defaults when the log opens, so a zeroed config
/// is usable as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentConfig {
    /// Maximum bytes per store file.
    pub max_store_bytes: u64,
    /// Maximum bytes per index file.
    pub max_index_bytes: u64,
    /// Base offset of the first segment of a fresh log.
    pub initial_offset: u64,
}

/// Default cap for store and index files when the config leaves them unset.
pub(crate) const DEFAULT_MAX_BYTES: u64 = 1024;

impl Config {
    /// Sets the maximum store file size.
    #[must_use]
    pub const fn with_max_store_bytes(mut self, bytes: u64) -> Self {
        self.segment.max_store_bytes = bytes;
        self
    }

    /// Sets the maximum index file size.
    #[must_use]
    pub const fn with_max_index_bytes(mut self, bytes: u64) -> Self {
        self.segment.max_index_bytes = bytes;
        self
    }

    /// Sets the base offset for the first segment of a fresh log.
    #[must_use]
    pub const fn with_initial_offset(mut self, offset: u64) -> Self {
        self.segment.initial_offset = offset;
        self
    }

    /// Returns a copy with unset caps replaced by defaults.
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.segment.max_store_bytes == 0 {
            self.segment.max_store_bytes = DEFAULT_MAX_BYTES;
        }
        if self.segment.max_index_bytes == 0 {
            self.segment.max_index_bytes = DEFAULT_MAX_BYTES;
        }
        self
    }
}
