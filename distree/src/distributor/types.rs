//! Data structures for communication plans
use crate::traits::communication::{Rank, Tag};

/// Strategy used to discover how many items each peer will send to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountDiscovery {
    /// All-to-all exchange of a count vector of length equal to the group size.
    #[default]
    Dense,

    /// Only peers with nonzero counts are messaged. The number of messages to expect is learned
    /// from an element-wise reduction of per-peer indicators, avoiding all-to-all traffic on
    /// large groups with sparse communication patterns.
    Sparse,
}

/// Configuration of a [`Distributor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributorConfig {
    /// Count discovery handshake
    pub discovery: CountDiscovery,
    /// Tag carried by every message of exchanges over this plan, concurrent exchanges on
    /// different plans must use distinct tags
    pub tag: Tag,
    /// Check after every plan build that the global number of items sent matches the global
    /// number of items received, a diagnostic for desynchronised collectives
    pub check_consistency: bool,
    /// Inputs of at least this many items are grouped and packed in parallel
    pub parallel_threshold: usize,
}

/// Builder for a [`DistributorConfig`], every setting is optional.
///
/// # Example
/// ```
/// use distree::{CountDiscovery, DistributorBuilder};
///
/// let config = DistributorBuilder::new()
///     .discovery(CountDiscovery::Sparse)
///     .tag(7)
///     .check_consistency(true)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.tag, 7);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DistributorBuilder {
    /// Count discovery handshake
    pub discovery: Option<CountDiscovery>,
    /// Message tag
    pub tag: Option<Tag>,
    /// Global consistency check
    pub check_consistency: Option<bool>,
    /// Parallel threshold
    pub parallel_threshold: Option<usize>,
}

/// How a peer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The peer is this process, items are copied locally
    Local,
    /// The peer is another process, items travel over the network
    Remote,
}

/// Contiguous run of items exchanged with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSegment {
    /// Peer rank
    pub rank: Rank,
    /// Number of items
    pub count: usize,
    /// Position of the first item in the packed send buffer, or in the receive buffer
    pub offset: usize,
    /// Local copy or network transfer
    pub route: Route,
}

/// Immutable schedule for one destination pattern.
///
/// Holds no payload data, and may be reused for any number of exchanges of different element
/// types and item shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// `permutation[p]` is the original index of the item packed at send position `p`
    pub(crate) permutation: Vec<usize>,
    /// Items are already grouped in original order
    pub(crate) identity: bool,
    /// Send segments, ascending peer rank
    pub(crate) sends: Vec<PeerSegment>,
    /// Receive segments, ascending peer rank, self included in its natural slot
    pub(crate) receives: Vec<PeerSegment>,
    /// Number of local items, N
    pub(crate) total_send: usize,
    /// Size of the receive buffer in items
    pub(crate) total_receive: usize,
}

/// Communication plan over a process group.
///
/// Starts out unbuilt, [`create_from_sends`](Distributor::create_from_sends) builds it, calling it
/// again discards the previous schedule. Rebuilding requires exclusive access, so it cannot race
/// with an exchange borrowing the plan.
pub struct Distributor<'a, C> {
    /// Process group the plan lives on
    pub(crate) comm: &'a C,
    /// Plan configuration
    pub(crate) config: DistributorConfig,
    /// Schedule, once built
    pub(crate) plan: Option<Plan>,
}
