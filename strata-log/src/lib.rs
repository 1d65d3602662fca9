//! Strata commit log - segmented, durable record storage.
//!
//! This crate implements the storage core of the Strata log service: an
//! append-only log of protobuf-framed records split across fixed-size
//! segments, each a store file paired with a memory-mapped index file.
//!
//! # Design
//!
//! - **Dense offsets**: every successful append is assigned the next
//!   monotonically increasing offset, preserved across restarts.
//! - **Index is truth**: recovery rebuilds state from index entries; store
//!   bytes past the last indexed frame are orphaned and ignored.
//! - **Reader/writer locking**: the log serializes segment-list mutation
//!   behind a writer lock while reads share a reader lock; each store has
//!   its own mutex for its buffered writer.
//!
//! # Example
//!
//! ```ignore
//! use strata_log::{Config, Log, Record};
//!
//! let log = Log::open("/var/lib/strata", Config::default())?;
//! let mut record = Record { value: b"hello".to_vec(), offset: 0 };
//! let offset = log.append(&mut record)?;
//! assert_eq!(log.read(offset)?.value, b"hello");
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod index;
mod log;
mod segment;
mod store;

pub use config::{Config, SegmentConfig};
pub use error::{LogError, LogResult};
pub use log::{Log, LogReader};

pub use strata_api::log_v1::Record;
