//! MPI backed process group.
//!
//! Requires the `mpi` feature flag and an MPI installation. The caller initialises MPI and hands
//! over a communicator, which is duplicated so that exchanges never match user traffic.
//!
//! ```ignore
//! let universe = mpi::initialize().unwrap();
//! let world = universe.world();
//! let comm = MpiProcessGroup::new(&world);
//! ```
use mpi::{
    collective::SystemOperation,
    request::multiple_scope,
    topology::SimpleCommunicator,
    traits::{Communicator, CommunicatorCollectives, Destination, Source},
};
use tracing::trace;

use crate::{
    error::{CommError, Result},
    traits::communication::{Count, ProcessGroup, Rank, ReceiveBuffer, SendBuffer, Tag},
};

/// Process group over an MPI communicator
pub struct MpiProcessGroup {
    comm: SimpleCommunicator,
}

impl MpiProcessGroup {
    /// Wrap a duplicate of `comm`.
    pub fn new(comm: &SimpleCommunicator) -> Self {
        Self {
            comm: comm.duplicate(),
        }
    }

    /// Underlying communicator.
    pub fn communicator(&self) -> &SimpleCommunicator {
        &self.comm
    }

    fn mpi_rank(&self, peer: Rank) -> Result<i32> {
        if peer >= self.size() {
            return Err(CommError::InvalidDestination {
                destination: peer,
                size: self.size(),
            });
        }
        Ok(peer as i32)
    }
}

/// MPI message sizes are 32 bit, larger messages are refused rather than truncated
fn message_length(bytes: usize) -> Result<()> {
    i32::try_from(bytes)
        .map(|_| ())
        .map_err(|_| CommError::Transport(format!("message of {bytes} bytes exceeds MPI count")))
}

impl ProcessGroup for MpiProcessGroup {
    fn rank(&self) -> Rank {
        self.comm.rank() as Rank
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn all_to_all_counts(&self, send_counts: &[Count]) -> Result<Vec<Count>> {
        if send_counts.len() != self.size() {
            return Err(CommError::BufferSizeMismatch {
                buffer: "send counts",
                expected: self.size(),
                found: send_counts.len(),
            });
        }

        let mut receive_counts = vec![0 as Count; self.size()];
        self.comm
            .all_to_all_into(send_counts, &mut receive_counts[..]);
        Ok(receive_counts)
    }

    fn all_reduce_sum(&self, local: &[Count]) -> Result<Vec<Count>> {
        let mut global = vec![0 as Count; local.len()];
        self.comm
            .all_reduce_into(local, &mut global[..], SystemOperation::sum());
        Ok(global)
    }

    fn sparse_counts(
        &self,
        outgoing: &[(Rank, Count)],
        n_incoming: usize,
        tag: Tag,
    ) -> Result<Vec<(Rank, Count)>> {
        let destinations = outgoing
            .iter()
            .map(|&(peer, _)| self.mpi_rank(peer))
            .collect::<Result<Vec<_>>>()?;
        let messages = outgoing.iter().map(|&(_, count)| count).collect::<Vec<_>>();

        let mut incoming = Vec::with_capacity(n_incoming);

        // Sends stay in flight while the receives from any source are matched
        multiple_scope(messages.len(), |scope, coll| {
            for (&destination, message) in destinations.iter().zip(messages.iter()) {
                let request = self
                    .comm
                    .process_at_rank(destination)
                    .immediate_send_with_tag(scope, message, tag);
                coll.add(request);
            }

            for _ in 0..n_incoming {
                let (count, status) = self.comm.any_process().receive_with_tag::<Count>(tag);
                incoming.push((status.source_rank() as Rank, count));
            }

            let mut out = vec![];
            coll.wait_all(&mut out);
        });

        incoming.sort_unstable_by_key(|&(source, _)| source);
        Ok(incoming)
    }

    fn exchange_bytes(
        &self,
        sends: &[SendBuffer<'_>],
        receives: &mut [ReceiveBuffer<'_>],
        tag: Tag,
    ) -> Result<()> {
        let send_ranks = sends
            .iter()
            .map(|send| {
                message_length(send.data.len())?;
                self.mpi_rank(send.peer)
            })
            .collect::<Result<Vec<_>>>()?;

        let receive_ranks = receives
            .iter()
            .map(|receive| {
                message_length(receive.data.len())?;
                self.mpi_rank(receive.peer)
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(
            rank = self.rank(),
            n_sends = sends.len(),
            n_receives = receives.len(),
            tag,
            "exchange"
        );

        let n_requests = sends.len() + receives.len();
        multiple_scope(n_requests, |scope, coll| {
            for (receive, &source) in receives.iter_mut().zip(receive_ranks.iter()) {
                let request = self
                    .comm
                    .process_at_rank(source)
                    .immediate_receive_into_with_tag(scope, &mut receive.data[..], tag);
                coll.add(request);
            }

            for (send, &destination) in sends.iter().zip(send_ranks.iter()) {
                let request = self
                    .comm
                    .process_at_rank(destination)
                    .immediate_send_with_tag(scope, send.data, tag);
                coll.add(request);
            }

            let mut out = vec![];
            coll.wait_all(&mut out);
            debug_assert_eq!(out.len(), n_requests);
        });

        Ok(())
    }
}
