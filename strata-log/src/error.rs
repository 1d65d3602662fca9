//! Commit log error types.

use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The requested offset is outside the log's current range.
    ///
    /// This is the one domain error callers are expected to branch on: a
    /// streaming consumer treats it as "tail of the log, retry", everything
    /// else treats it as a failed read.
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange {
        /// The offending offset.
        offset: u64,
    },

    /// The index has no entry at the requested slot, or no room left for
    /// another entry. The end-of-file condition of the mapped region.
    #[error("end of index file")]
    Eof,

    /// A stored frame failed to decode as a record.
    #[error("corrupt record: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The log has been closed; no further operations are possible.
    #[error("log is closed")]
    Closed,

    /// I/O error from the underlying files or memory map.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl LogError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    /// Returns true if this error means the offset is simply not present,
    /// as opposed to a failure of the log itself.
    #[must_use]
    pub const fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Self::OffsetOutOfRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display_carries_offset() {
        let err = LogError::OffsetOutOfRange { offset: 17 };
        assert!(format!("{err}").contains("17"));
        assert!(err.is_offset_out_of_range());
    }

    #[test]
    fn test_io_helper() {
        let err = LogError::io("open store", "permission denied");
        assert!(format!("{err}").contains("open store"));
        assert!(!err.is_offset_out_of_range());
    }
}
