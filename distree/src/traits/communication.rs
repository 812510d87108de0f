//! Transport seam for the communication core
//!
//! Everything transport specific is hidden behind [`ProcessGroup`], so that an alternate transport
//! can be substituted without touching plan building or the typed exchange.
use crate::error::Result;

/// Identifier of a process within a process group
pub type Rank = usize;

/// Identifying tag used to disambiguate concurrent exchanges
pub type Tag = i32;

/// Item counts as they travel on the wire
pub type Count = u64;

/// Largest tag available to callers, the tags above it are reserved for internal collectives.
///
/// Kept below 32767, the smallest tag upper bound an MPI implementation may advertise.
pub const MAX_USER_TAG: Tag = 32_000;

/// Tag used by the sparse count discovery handshake
pub const SPARSE_COUNTS_TAG: Tag = MAX_USER_TAG + 1;

/// Tag used by point to point emulations of dense collectives
pub const COLLECTIVE_TAG: Tag = MAX_USER_TAG + 2;

/// An outgoing message, a contiguous byte segment destined for one peer
#[derive(Debug, Clone, Copy)]
pub struct SendBuffer<'a> {
    /// Destination rank
    pub peer: Rank,
    /// Payload
    pub data: &'a [u8],
}

/// An incoming message slot, sized by the caller to exactly the expected payload
#[derive(Debug)]
pub struct ReceiveBuffer<'a> {
    /// Source rank
    pub peer: Rank,
    /// Destination for the payload
    pub data: &'a mut [u8],
}

/// Abstraction over a group of processes exchanging messages.
///
/// All collective methods must be called by every member of the group in the same order.
/// Implementations: [`LocalProcessGroup`](crate::comm::local::LocalProcessGroup) (threads
/// within one process) and `MpiProcessGroup` (via the mpi crate, behind the `mpi` feature).
pub trait ProcessGroup {
    /// This process's rank.
    fn rank(&self) -> Rank;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Dense all-to-all of one count per peer.
    ///
    /// `send_counts[r]` is delivered to rank `r`, the returned vector holds at index `r` the count
    /// rank `r` addressed to this process.
    fn all_to_all_counts(&self, send_counts: &[Count]) -> Result<Vec<Count>>;

    /// Element-wise sum of a fixed length vector across all ranks, every rank receives the result.
    fn all_reduce_sum(&self, local: &[Count]) -> Result<Vec<Count>>;

    /// Send one count to each peer in `outgoing`, and receive exactly `n_incoming` counts from
    /// whichever peers address this process.
    ///
    /// Returns `(source, count)` pairs in ascending source order.
    fn sparse_counts(
        &self,
        outgoing: &[(Rank, Count)],
        n_incoming: usize,
        tag: Tag,
    ) -> Result<Vec<(Rank, Count)>>;

    /// Post every send and receive as non-blocking operations, and wait for all of them to
    /// complete before returning.
    ///
    /// Receive slots must be sized to the exact payload expected from each peer.
    fn exchange_bytes(
        &self,
        sends: &[SendBuffer<'_>],
        receives: &mut [ReceiveBuffer<'_>],
        tag: Tag,
    ) -> Result<()>;
}
