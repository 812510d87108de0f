//! In-process process group, each rank is a thread and messages travel over channels.
//!
//! Used for shared memory runs and for exercising the multi-process code paths in tests without
//! an MPI installation. Messages are matched on (source, tag), messages with the same source and
//! tag are delivered in the order they were sent.
use std::{collections::VecDeque, sync::Arc, time::Duration, time::Instant};

use bytemuck::{cast_slice, pod_collect_to_vec};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    error::{CommError, Result},
    traits::communication::{
        Count, ProcessGroup, Rank, ReceiveBuffer, SendBuffer, Tag, COLLECTIVE_TAG,
    },
};

/// How long a receive may wait before the group is considered stuck
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A message in flight
#[derive(Debug)]
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

/// Handle to one rank of an in-process process group.
///
/// # Example
/// ```
/// use distree::LocalProcessGroup;
/// use distree::traits::communication::ProcessGroup;
///
/// let totals = LocalProcessGroup::run(4, |comm| {
///     let reduced = comm.all_reduce_sum(&[comm.rank() as u64]).unwrap();
///     reduced[0]
/// });
/// assert_eq!(totals, vec![6; 4]);
/// ```
pub struct LocalProcessGroup {
    rank: Rank,
    mailboxes: Arc<Vec<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    /// Messages received while waiting for another (source, tag) pair
    unmatched: Mutex<VecDeque<Envelope>>,
    timeout: Duration,
}

impl LocalProcessGroup {
    /// Create handles for every rank of a group of `size` processes, handle `r` has rank `r`.
    pub fn create(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let mailboxes = Arc::new(senders);

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                mailboxes: Arc::clone(&mailboxes),
                inbox,
                unmatched: Mutex::new(VecDeque::new()),
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// Set how long a receive waits before failing with [`CommError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `f` on every rank of a fresh group of `size` processes, one thread per rank, returning
    /// the per-rank results in rank order.
    ///
    /// A panic on any rank is propagated to the caller once all ranks have finished.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(&LocalProcessGroup) -> R + Sync,
        R: Send,
    {
        let groups = Self::create(size);
        let f = &f;

        std::thread::scope(|scope| {
            let handles = groups
                .into_iter()
                .map(|group| scope.spawn(move || f(&group)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    fn post(&self, peer: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let mailbox = self
            .mailboxes
            .get(peer)
            .ok_or(CommError::InvalidDestination {
                destination: peer,
                size: self.mailboxes.len(),
            })?;

        trace!(source = self.rank, peer, tag, bytes = payload.len(), "post");

        mailbox
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| CommError::Transport(format!("rank {peer} has left the group")))
    }

    /// Block until a message with a matching tag, and source if given, arrives.
    fn receive_matching(&self, source: Option<Rank>, tag: Tag) -> Result<Envelope> {
        let matches = |e: &Envelope| e.tag == tag && source.map_or(true, |s| e.source == s);

        {
            let mut unmatched = self.unmatched.lock();
            let position = unmatched.iter().position(matches);
            if let Some(envelope) = position.and_then(|p| unmatched.remove(p)) {
                return Ok(envelope);
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inbox.recv_deadline(deadline) {
                Ok(envelope) if matches(&envelope) => return Ok(envelope),
                Ok(envelope) => self.unmatched.lock().push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CommError::Timeout { peer: source, tag })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Transport("process group disconnected".to_string()))
                }
            }
        }
    }

    fn receive_counts(&self, source: Rank, tag: Tag) -> Result<Vec<Count>> {
        let envelope = self.receive_matching(Some(source), tag)?;
        if envelope.payload.len() % std::mem::size_of::<Count>() != 0 {
            return Err(CommError::Transport(format!(
                "rank {source} sent {} bytes, not a whole number of counts",
                envelope.payload.len()
            )));
        }
        Ok(pod_collect_to_vec(&envelope.payload))
    }

    fn check_length(&self, name: &'static str, found: usize) -> Result<()> {
        if found != self.size() {
            return Err(CommError::BufferSizeMismatch {
                buffer: name,
                expected: self.size(),
                found,
            });
        }
        Ok(())
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.mailboxes.len()
    }

    fn all_to_all_counts(&self, send_counts: &[Count]) -> Result<Vec<Count>> {
        self.check_length("send counts", send_counts.len())?;

        for (peer, count) in send_counts.iter().enumerate() {
            self.post(peer, COLLECTIVE_TAG, count.to_le_bytes().to_vec())?;
        }

        let mut receive_counts = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            let received = self.receive_counts(peer, COLLECTIVE_TAG)?;
            match received[..] {
                [count] => receive_counts.push(count),
                _ => {
                    return Err(CommError::Transport(format!(
                        "rank {peer} sent {} counts, expected 1",
                        received.len()
                    )))
                }
            }
        }

        Ok(receive_counts)
    }

    fn all_reduce_sum(&self, local: &[Count]) -> Result<Vec<Count>> {
        let payload = cast_slice::<Count, u8>(local).to_vec();
        for peer in 0..self.size() {
            self.post(peer, COLLECTIVE_TAG, payload.clone())?;
        }

        // Summed in rank order on every rank, so all ranks agree exactly
        let mut global = vec![0 as Count; local.len()];
        for peer in 0..self.size() {
            let received = self.receive_counts(peer, COLLECTIVE_TAG)?;
            if received.len() != local.len() {
                return Err(CommError::BufferSizeMismatch {
                    buffer: "all reduce",
                    expected: local.len(),
                    found: received.len(),
                });
            }
            global.iter_mut().zip(received).for_each(|(g, r)| *g += r);
        }

        Ok(global)
    }

    fn sparse_counts(
        &self,
        outgoing: &[(Rank, Count)],
        n_incoming: usize,
        tag: Tag,
    ) -> Result<Vec<(Rank, Count)>> {
        for &(peer, count) in outgoing {
            self.post(peer, tag, count.to_le_bytes().to_vec())?;
        }

        let mut incoming = Vec::with_capacity(n_incoming);
        for _ in 0..n_incoming {
            let envelope = self.receive_matching(None, tag)?;
            let bytes: [u8; 8] = envelope.payload[..].try_into().map_err(|_| {
                CommError::Transport(format!(
                    "rank {} sent a malformed count of {} bytes",
                    envelope.source,
                    envelope.payload.len()
                ))
            })?;
            incoming.push((envelope.source, Count::from_le_bytes(bytes)));
        }

        incoming.sort_unstable_by_key(|&(source, _)| source);
        Ok(incoming)
    }

    fn exchange_bytes(
        &self,
        sends: &[SendBuffer<'_>],
        receives: &mut [ReceiveBuffer<'_>],
        tag: Tag,
    ) -> Result<()> {
        // Sends are buffered by the channels, so posting all of them first cannot deadlock
        for send in sends {
            self.post(send.peer, tag, send.data.to_vec())?;
        }

        for receive in receives.iter_mut() {
            let envelope = self.receive_matching(Some(receive.peer), tag)?;
            if envelope.payload.len() != receive.data.len() {
                return Err(CommError::BufferSizeMismatch {
                    buffer: "receive",
                    expected: receive.data.len(),
                    found: envelope.payload.len(),
                });
            }
            receive.data.copy_from_slice(&envelope.payload);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        error::CommError,
        traits::communication::{ProcessGroup, ReceiveBuffer, SendBuffer},
    };

    use super::LocalProcessGroup;

    #[test]
    fn test_rank_and_size() {
        let ranks = LocalProcessGroup::run(3, |comm| (comm.rank(), comm.size()));
        assert_eq!(ranks, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_all_to_all_counts() {
        // Rank r sends 10 * r + peer to each peer
        let received = LocalProcessGroup::run(4, |comm| {
            let send = (0..comm.size())
                .map(|peer| (10 * comm.rank() + peer) as u64)
                .collect::<Vec<_>>();
            comm.all_to_all_counts(&send).unwrap()
        });

        for (rank, counts) in received.iter().enumerate() {
            let expected = (0..4).map(|peer| (10 * peer + rank) as u64).collect::<Vec<_>>();
            assert_eq!(counts, &expected);
        }
    }

    #[test]
    fn test_sparse_counts_ring() {
        // Every rank messages only its right neighbour
        let received = LocalProcessGroup::run(5, |comm| {
            let right = (comm.rank() + 1) % comm.size();
            comm.sparse_counts(&[(right, comm.rank() as u64 + 100)], 1, 7)
                .unwrap()
        });

        for (rank, incoming) in received.iter().enumerate() {
            let left = (rank + 4) % 5;
            assert_eq!(incoming, &vec![(left, left as u64 + 100)]);
        }
    }

    #[test]
    fn test_exchange_bytes_matches_on_tag() {
        let received = LocalProcessGroup::run(2, |comm| {
            let peer = 1 - comm.rank();
            let first = [comm.rank() as u8; 3];
            let second = [comm.rank() as u8 + 10; 2];

            // Post tag 2 before tag 1, receive in the opposite order
            comm.exchange_bytes(&[SendBuffer { peer, data: &second }], &mut [], 2)
                .unwrap();

            let mut a = [0u8; 3];
            comm.exchange_bytes(
                &[SendBuffer { peer, data: &first }],
                &mut [ReceiveBuffer {
                    peer,
                    data: &mut a,
                }],
                1,
            )
            .unwrap();

            let mut b = [0u8; 2];
            comm.exchange_bytes(
                &[],
                &mut [ReceiveBuffer {
                    peer,
                    data: &mut b,
                }],
                2,
            )
            .unwrap();

            (a, b)
        });

        assert_eq!(received[0], ([1, 1, 1], [11, 11]));
        assert_eq!(received[1], ([0, 0, 0], [10, 10]));
    }

    #[test]
    fn test_invalid_peer() {
        let groups = LocalProcessGroup::create(2);
        let result = groups[0].exchange_bytes(&[SendBuffer { peer: 2, data: &[1] }], &mut [], 0);
        assert_eq!(
            result,
            Err(CommError::InvalidDestination {
                destination: 2,
                size: 2
            })
        );
    }

    #[test]
    fn test_receive_times_out() {
        let mut groups = LocalProcessGroup::create(2);
        let comm = groups.remove(0).with_timeout(Duration::from_millis(10));
        let mut data = [0u8; 1];
        let result = comm.exchange_bytes(
            &[],
            &mut [ReceiveBuffer {
                peer: 1,
                data: &mut data,
            }],
            3,
        );
        assert_eq!(
            result,
            Err(CommError::Timeout {
                peer: Some(1),
                tag: 3
            })
        );
    }
}
