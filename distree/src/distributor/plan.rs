//! Construction of communication plans from per-item destinations
use itertools::{izip, Itertools};
use tracing::debug;

use crate::{
    error::{CommError, Result},
    sorting::buffer_layout::sort_and_determine_buffer_layout_with_threshold,
    traits::communication::{Count, ProcessGroup, Rank},
};

use super::{
    handshake::discover_receive_counts,
    types::{Distributor, DistributorConfig, PeerSegment, Plan, Route},
};

impl<'a, C: ProcessGroup> Distributor<'a, C> {
    /// Unbuilt plan over `comm` with the default configuration
    pub fn new(comm: &'a C) -> Self {
        Self::with_config(comm, DistributorConfig::default())
    }

    /// Unbuilt plan over `comm`
    pub fn with_config(comm: &'a C, config: DistributorConfig) -> Self {
        Self {
            comm,
            config,
            plan: None,
        }
    }

    /// Build the send and receive schedule for one item per entry of `destinations`.
    ///
    /// Collective, every member of the process group must call it in the same logical round.
    /// Any previously built schedule is discarded. Returns the number of items this process will
    /// receive, which sizes the destination buffer of subsequent exchanges.
    ///
    /// # Arguments
    /// * `destinations` - Destination rank of each local item, in any order and with repetition,
    ///   possibly including this process's own rank.
    pub fn create_from_sends(&mut self, destinations: &[Rank]) -> Result<usize> {
        let rank = self.comm.rank();
        let size = self.comm.size();

        // Drop the old schedule first, a failed rebuild must not leave it usable
        self.plan = None;

        if let Some(&destination) = destinations.iter().find(|&&d| d >= size) {
            return Err(CommError::InvalidDestination { destination, size });
        }

        let layout = sort_and_determine_buffer_layout_with_threshold(
            destinations,
            self.config.parallel_threshold,
        );
        let identity = layout.is_identity();

        let sends = izip!(&layout.unique, &layout.counts, &layout.offsets)
            .map(|(&peer, &count, &offset)| segment(rank, peer, count, offset))
            .collect_vec();

        let send_counts = sends.iter().map(|s| (s.rank, s.count)).collect_vec();
        let receive_counts =
            discover_receive_counts(self.comm, &send_counts, self.config.discovery)?;

        let mut total_receive = 0;
        let receives = receive_counts
            .into_iter()
            .map(|(peer, count)| {
                let offset = total_receive;
                total_receive += count;
                segment(rank, peer, count, offset)
            })
            .collect_vec();

        let total_send = destinations.len();

        if self.config.check_consistency {
            let global = self
                .comm
                .all_reduce_sum(&[total_send as Count, total_receive as Count])?;
            if global[0] != global[1] {
                return Err(CommError::CollectiveMismatch {
                    sent: global[0],
                    received: global[1],
                });
            }
        }

        debug!(
            rank,
            n_items = total_send,
            n_send_peers = sends.len(),
            n_receive_peers = receives.len(),
            total_receive,
            identity,
            "built communication plan"
        );

        self.plan = Some(Plan {
            permutation: layout.permutation,
            identity,
            sends,
            receives,
            total_send,
            total_receive,
        });

        Ok(total_receive)
    }

    /// The built schedule
    pub fn plan(&self) -> Result<&Plan> {
        self.plan.as_ref().ok_or(CommError::PlanNotBuilt)
    }

    /// True once `create_from_sends` has succeeded
    pub fn is_built(&self) -> bool {
        self.plan.is_some()
    }

    /// Process group of this plan
    pub fn comm(&self) -> &'a C {
        self.comm
    }

    /// Configuration of this plan
    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Number of local items the plan was built for
    pub fn total_send_count(&self) -> Result<usize> {
        Ok(self.plan()?.total_send)
    }

    /// Number of items this process receives, the leading extent of any destination buffer
    pub fn total_receive_count(&self) -> Result<usize> {
        Ok(self.plan()?.total_receive)
    }
}

fn segment(rank: Rank, peer: Rank, count: usize, offset: usize) -> PeerSegment {
    PeerSegment {
        rank: peer,
        count,
        offset,
        route: if peer == rank {
            Route::Local
        } else {
            Route::Remote
        },
    }
}

impl Plan {
    /// Packing permutation, `permutation()[p]` is the original index of the item sent at
    /// position `p`
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// True if items are already grouped by destination, packing is then skipped
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Send segments in ascending peer order
    pub fn sends(&self) -> &[PeerSegment] {
        &self.sends
    }

    /// Receive segments in ascending peer order, self included in its natural slot
    pub fn receives(&self) -> &[PeerSegment] {
        &self.receives
    }

    /// `(peer, count)` for every peer this process sends to
    pub fn send_counts(&self) -> Vec<(Rank, usize)> {
        self.sends.iter().map(|s| (s.rank, s.count)).collect()
    }

    /// `(peer, count)` for every peer this process receives from
    pub fn receive_counts(&self) -> Vec<(Rank, usize)> {
        self.receives.iter().map(|s| (s.rank, s.count)).collect()
    }

    /// Number of local items
    pub fn total_send_count(&self) -> usize {
        self.total_send
    }

    /// Number of received items
    pub fn total_receive_count(&self) -> usize {
        self.total_receive
    }

    /// Segment of the packed send buffer copied locally, if any
    pub fn local_send(&self) -> Option<&PeerSegment> {
        self.sends.iter().find(|s| s.route == Route::Local)
    }

    /// Number of remote peers messaged and received from
    pub fn n_remote_peers(&self) -> (usize, usize) {
        let remote = |segments: &[PeerSegment]| {
            segments
                .iter()
                .filter(|s| s.route == Route::Remote)
                .count()
        };
        (remote(&self.sends), remote(&self.receives))
    }

    /// Source rank of every item in the receive buffer, in receive order
    pub fn receive_ranks(&self) -> Vec<Rank> {
        self.receives
            .iter()
            .flat_map(|s| std::iter::repeat(s.rank).take(s.count))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        comm::local::LocalProcessGroup,
        distributor::types::{
            CountDiscovery, Distributor, DistributorBuilder, PeerSegment, Route,
        },
        error::CommError,
        traits::communication::ProcessGroup,
    };

    #[test]
    fn test_unbuilt_plan() {
        let groups = LocalProcessGroup::create(1);
        let distributor = Distributor::new(&groups[0]);
        assert!(!distributor.is_built());
        assert_eq!(distributor.plan().err(), Some(CommError::PlanNotBuilt));
        assert_eq!(
            distributor.total_receive_count(),
            Err(CommError::PlanNotBuilt)
        );
    }

    #[test]
    fn test_empty_destinations() {
        let groups = LocalProcessGroup::create(1);
        let mut distributor = Distributor::new(&groups[0]);
        assert_eq!(distributor.create_from_sends(&[]).unwrap(), 0);

        let plan = distributor.plan().unwrap();
        assert!(plan.sends().is_empty());
        assert!(plan.receives().is_empty());
        assert!(plan.permutation().is_empty());
    }

    #[test]
    fn test_single_process_self_sends() {
        let groups = LocalProcessGroup::create(1);
        let mut distributor = Distributor::new(&groups[0]);
        assert_eq!(distributor.create_from_sends(&[0, 0, 0]).unwrap(), 3);

        let plan = distributor.plan().unwrap();
        let expected = PeerSegment {
            rank: 0,
            count: 3,
            offset: 0,
            route: Route::Local,
        };
        assert_eq!(plan.sends(), &[expected]);
        assert_eq!(plan.receives(), &[expected]);
        assert_eq!(plan.n_remote_peers(), (0, 0));
        assert!(plan.is_identity());
    }

    #[test]
    fn test_invalid_destination() {
        let groups = LocalProcessGroup::create(2);
        let mut distributor = Distributor::new(&groups[0]);
        assert_eq!(
            distributor.create_from_sends(&[0, 5, 1]),
            Err(CommError::InvalidDestination {
                destination: 5,
                size: 2
            })
        );
        assert!(!distributor.is_built());
    }

    #[test]
    fn test_failed_rebuild_discards_previous_plan() {
        let groups = LocalProcessGroup::create(1);
        let mut distributor = Distributor::new(&groups[0]);
        assert_eq!(distributor.create_from_sends(&[0, 0, 0]).unwrap(), 3);

        assert_eq!(
            distributor.create_from_sends(&[0, 7]),
            Err(CommError::InvalidDestination {
                destination: 7,
                size: 1
            })
        );
        assert!(!distributor.is_built());
        assert_eq!(
            distributor.total_receive_count(),
            Err(CommError::PlanNotBuilt)
        );
    }

    #[test]
    fn test_all_to_all_plan() {
        // Rank r sends r + 1 items to every rank, in reverse rank order
        for discovery in [CountDiscovery::Dense, CountDiscovery::Sparse] {
            let size = 4;
            let plans = LocalProcessGroup::run(size, |comm| {
                let config = DistributorBuilder::new()
                    .discovery(discovery)
                    .check_consistency(true)
                    .build()
                    .unwrap();
                let destinations = (0..size)
                    .rev()
                    .flat_map(|peer| std::iter::repeat(peer).take(comm.rank() + 1))
                    .collect::<Vec<_>>();

                let mut distributor = Distributor::with_config(comm, config);
                let total = distributor.create_from_sends(&destinations).unwrap();
                (total, distributor.plan().unwrap().clone())
            });

            for (rank, (total, plan)) in plans.iter().enumerate() {
                // Receive 1 + 2 + 3 + 4 items, grouped by ascending source rank
                assert_eq!(*total, 10);
                assert_eq!(
                    plan.receive_counts(),
                    vec![(0, 1), (1, 2), (2, 3), (3, 4)]
                );
                assert_eq!(plan.receives()[2].offset, 3);
                assert_eq!(plan.receive_ranks(), vec![0, 1, 1, 2, 2, 2, 3, 3, 3, 3]);
                assert_eq!(plan.local_send().unwrap().rank, rank);
                assert_eq!(plan.n_remote_peers(), (3, 3));
                assert_eq!(
                    plan.send_counts(),
                    (0..size).map(|peer| (peer, rank + 1)).collect::<Vec<_>>()
                );
                assert_eq!(plan.is_identity(), size == 1);
            }
        }
    }

    #[test]
    fn test_rebuild_discards_previous_plan() {
        let totals = LocalProcessGroup::run(2, |comm| {
            let mut distributor = Distributor::new(comm);
            let first = distributor.create_from_sends(&[0, 1, 1]).unwrap();
            let peer = 1 - comm.rank();
            let second = distributor.create_from_sends(&[peer]).unwrap();
            (first, second, distributor.plan().unwrap().receive_counts())
        });

        assert_eq!(totals[0], (2, 1, vec![(1, 1)]));
        assert_eq!(totals[1], (4, 1, vec![(0, 1)]));
    }
}
