//! Cluster error types.

use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by membership handlers.
///
/// The replicator itself never fails its handler calls (a broken peer only
/// terminates that peer's worker), but other handlers hooked into the
/// membership pump may.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A handler could not act on a membership event for a peer.
    #[error("peer {name}: {message}")]
    Peer {
        /// The peer's cluster-unique name.
        name: String,
        /// What went wrong.
        message: String,
    },
}
