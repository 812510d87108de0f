//! Collective count discovery.
//!
//! Establishes, for every pair of processes A and B, that A's receive count from B equals B's send
//! count to A. The self count is known locally and never travels over the network.
use itertools::Itertools;
use tracing::debug;

use crate::{
    error::Result,
    traits::communication::{Count, ProcessGroup, Rank, SPARSE_COUNTS_TAG},
};

use super::types::CountDiscovery;

/// Discover how many items each peer sends to this process.
///
/// # Arguments
/// * `comm` - Process group, every member must call this collectively.
/// * `sends` - `(peer, count)` pairs with nonzero counts, ascending peer rank.
/// * `discovery` - Handshake strategy.
///
/// Returns `(peer, count)` pairs with nonzero counts in ascending peer order, including this
/// process if it sends to itself.
pub(crate) fn discover_receive_counts<C: ProcessGroup>(
    comm: &C,
    sends: &[(Rank, usize)],
    discovery: CountDiscovery,
) -> Result<Vec<(Rank, usize)>> {
    let rank = comm.rank();
    let size = comm.size();

    debug!(rank, ?discovery, n_peers = sends.len(), "discovering receive counts");

    match discovery {
        CountDiscovery::Dense => {
            let mut send_counts = vec![0 as Count; size];
            for &(peer, count) in sends.iter() {
                send_counts[peer] = count as Count;
            }

            let receive_counts = comm.all_to_all_counts(&send_counts)?;

            Ok(receive_counts
                .iter()
                .enumerate()
                .filter(|(_, &count)| count > 0)
                .map(|(peer, &count)| (peer, count as usize))
                .collect_vec())
        }

        CountDiscovery::Sparse => {
            let local = sends
                .iter()
                .find(|&&(peer, _)| peer == rank)
                .map(|&(_, count)| count);

            let remote = sends
                .iter()
                .filter(|&&(peer, _)| peer != rank)
                .map(|&(peer, count)| (peer, count as Count))
                .collect_vec();

            // Summing indicators tells every rank how many peers will message it
            let mut indicators = vec![0 as Count; size];
            for &(peer, _) in remote.iter() {
                indicators[peer] = 1;
            }
            let n_senders = comm.all_reduce_sum(&indicators)?[rank] as usize;

            let mut receives = comm
                .sparse_counts(&remote, n_senders, SPARSE_COUNTS_TAG)?
                .into_iter()
                .map(|(peer, count)| (peer, count as usize))
                .collect_vec();

            if let Some(count) = local {
                receives.push((rank, count));
                receives.sort_unstable_by_key(|&(peer, _)| peer);
            }

            Ok(receives)
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{comm::local::LocalProcessGroup, distributor::types::CountDiscovery};

    use crate::traits::communication::ProcessGroup;
    use super::discover_receive_counts;

    /// Rank r sends r + 1 items to every rank at distance 0 or 2 to its right
    fn pattern(rank: usize, size: usize) -> Vec<(usize, usize)> {
        let mut sends = vec![(rank, rank + 1), ((rank + 2) % size, rank + 1)];
        sends.sort();
        sends.dedup_by_key(|s| s.0);
        sends
    }

    fn check(discovery: CountDiscovery) {
        let size = 5;
        let received = LocalProcessGroup::run(size, |comm| {
            discover_receive_counts(comm, &pattern(comm.rank(), size), discovery).unwrap()
        });

        for (rank, receives) in received.iter().enumerate() {
            let left = (rank + size - 2) % size;
            let mut expected = vec![(rank, rank + 1), (left, left + 1)];
            expected.sort();
            assert_eq!(receives, &expected);
        }
    }

    #[test]
    fn test_dense_discovery() {
        check(CountDiscovery::Dense);
    }

    #[test]
    fn test_sparse_discovery() {
        check(CountDiscovery::Sparse);
    }

    #[test]
    fn test_sparse_discovery_repeated_rounds() {
        // Back to back handshakes on the same tag must not mix rounds
        let received = LocalProcessGroup::run(4, |comm| {
            (0..3)
                .map(|round| {
                    let peer = (comm.rank() + round + 1) % comm.size();
                    discover_receive_counts(comm, &[(peer, round + 1)], CountDiscovery::Sparse)
                        .unwrap()
                })
                .collect::<Vec<_>>()
        });

        for (rank, rounds) in received.iter().enumerate() {
            for (round, receives) in rounds.iter().enumerate() {
                let source = (rank + 4 - (round + 1) % 4) % 4;
                assert_eq!(receives, &vec![(source, round + 1)]);
            }
        }
    }

    #[test]
    fn test_silent_ranks() {
        // Only rank 0 sends, to rank 2
        let received = LocalProcessGroup::run(3, |comm| {
            let sends = if comm.rank() == 0 { vec![(2, 4)] } else { vec![] };
            discover_receive_counts(comm, &sends, CountDiscovery::Sparse).unwrap()
        });

        assert_eq!(received, vec![vec![], vec![], vec![(0, 4)]]);
    }
}
