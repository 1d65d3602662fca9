//! Wire protocol types for the Strata commit-log service.
//!
//! This crate carries the prost/tonic types for the `log.v1` protocol and the
//! typed status payload used to signal reads past either end of the log.
//! Generated code is committed under `src/generated/` (from
//! `proto/log.proto`) so building the workspace does not require `protoc`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub mod log_v1 {
    //! Generated protobuf types for the `log.v1` protocol.
    #![allow(missing_docs)]
    include!("generated/log.v1.rs");
}

pub use error::{offset_from_status, offset_out_of_range_status};
