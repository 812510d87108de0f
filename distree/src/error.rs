//! Error types for the communication core

use thiserror::Error;

use crate::traits::communication::{Rank, Tag};

/// Result type for plan building and exchanges
pub type Result<T> = std::result::Result<T, CommError>;

/// Error types for plan building and exchanges.
///
/// Precondition violations are reported as soon as they are detected, with the offending sizes,
/// nothing is truncated to fit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A caller supplied buffer does not match the size implied by the plan
    #[error("{buffer} buffer has {found} elements, expected {expected}")]
    BufferSizeMismatch {
        /// Which buffer was mis-sized
        buffer: &'static str,
        /// Number of elements implied by the plan and item shape
        expected: usize,
        /// Number of elements supplied
        found: usize,
    },

    /// A destination rank does not exist in the process group
    #[error("destination rank {destination} out of range for process group of size {size}")]
    InvalidDestination {
        /// Offending destination
        destination: Rank,
        /// Size of the process group
        size: usize,
    },

    /// A match tag names a query outside of [0, n_queries)
    #[error("match tag {tag} out of range for {n_queries} queries")]
    InvalidTag {
        /// Offending tag
        tag: usize,
        /// Number of logical queries
        n_queries: usize,
    },

    /// Message tag collides with tags reserved by the transport
    #[error("message tag {tag} must lie in [0, {max}]")]
    TagOutOfRange {
        /// Offending tag
        tag: Tag,
        /// Largest user tag
        max: Tag,
    },

    /// A ragged descriptor is malformed
    #[error("malformed offsets: {0}")]
    MalformedOffsets(String),

    /// Exchange attempted before `create_from_sends`
    #[error("communication plan has not been built")]
    PlanNotBuilt,

    /// Global number of items sent and received disagree, the group is desynchronised
    #[error("collective mismatch: {sent} items sent globally, {received} received")]
    CollectiveMismatch {
        /// Items sent across the whole group
        sent: u64,
        /// Items received across the whole group
        received: u64,
    },

    /// A receive did not complete in time
    #[error("timed out waiting for message from rank {peer:?} with tag {tag}")]
    Timeout {
        /// Peer being waited on, `None` for a receive from any source
        peer: Option<Rank>,
        /// Tag being waited on
        tag: Tag,
    },

    /// Error reported by the underlying transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
