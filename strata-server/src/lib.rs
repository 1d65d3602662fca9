//! Strata log server.
//!
//! This crate provides the gRPC service over the commit log: unary produce
//! and consume, bidirectional and bulk produce streams, and a tail-following
//! consume stream. Authentication (mTLS subject extraction) and the policy
//! authorizer live in [`auth`]; TLS material loading lives in [`tls`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod service;
pub mod tls;

pub use auth::{authenticate, Authorizer, Subject};
pub use service::LogService;
