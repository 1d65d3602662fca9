//! Typed status payload for offset-out-of-range.
//!
//! The server's `ConsumeStream` loop and replication workers need to tell
//! "offset not written yet" apart from real failures. The condition travels
//! as a `NOT_FOUND` status carrying a prost-encoded [`OffsetOutOfRange`]
//! detail, so both sides classify it structurally rather than by matching
//! message strings.

use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

use crate::log_v1::OffsetOutOfRange;

/// Builds the status returned for a read outside the log's current range.
#[must_use]
pub fn offset_out_of_range_status(offset: u64) -> Status {
    let detail = OffsetOutOfRange { offset };
    Status::with_details(
        Code::NotFound,
        format!("offset out of range: {offset}"),
        Bytes::from(detail.encode_to_vec()),
    )
}

/// Extracts the offending offset from a status, if the status is an
/// offset-out-of-range raised by [`offset_out_of_range_status`].
#[must_use]
pub fn offset_from_status(status: &Status) -> Option<u64> {
    if status.code() != Code::NotFound {
        return None;
    }
    OffsetOutOfRange::decode(status.details())
        .ok()
        .map(|detail| detail.offset)
}
