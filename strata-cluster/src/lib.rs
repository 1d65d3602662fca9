//! Strata cluster layer - membership-driven pull replication.
//!
//! Nodes discover each other through an external membership transport; this
//! crate turns that event stream into replication work. Each discovered peer
//! gets a worker that tails the peer's log over gRPC and re-produces every
//! record locally.
//!
//! Replication here is eventually consistent and makes no ordering or
//! uniqueness promises across peers; see [`Replicator`] for the exact
//! guarantees.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod membership;
mod replicator;

pub use error::{ClusterError, ClusterResult};
pub use membership::{Handler, MemberEvent, Membership};
pub use replicator::Replicator;
