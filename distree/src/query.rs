//! Two phase distributed query round: queries travel to the processes owning relevant geometry,
//! matches travel back to the processes that asked.
use bytemuck::Pod;
use itertools::Itertools;
use tracing::debug;

use crate::{
    distributor::types::{Distributor, DistributorConfig},
    error::{CommError, Result},
    exchange::{send_across_network, ItemShape},
    results::{group_results, QueryResults},
    traits::{
        communication::{ProcessGroup, Rank},
        index::LocalIndex,
    },
};

/// Queries received from other processes, one entry per received copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedQueries<Q> {
    /// Query predicates
    pub queries: Vec<Q>,
    /// Index of each query on the process that forwarded it
    pub origin_ids: Vec<usize>,
    /// Rank that forwarded each query
    pub origin_ranks: Vec<Rank>,
}

impl<Q> ForwardedQueries<Q> {
    /// Number of received queries
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// True if nothing was forwarded to this process
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Matches returned to this process, in receive order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedResults<T> {
    /// Match payloads
    pub values: Vec<T>,
    /// Local query each match belongs to
    pub query_ids: Vec<usize>,
    /// Rank that produced each match
    pub ranks: Vec<Rank>,
}

impl<T: Clone> ReturnedResults<T> {
    /// Compact into one ragged array over this process's `n_queries` queries.
    pub fn group(&self, n_queries: usize) -> Result<QueryResults<T>> {
        group_results(n_queries, &self.query_ids, &self.values)
    }

    /// As [`group`](Self::group), pairing each match with the rank that produced it.
    pub fn group_with_ranks(&self, n_queries: usize) -> Result<QueryResults<(T, Rank)>> {
        let tagged = self
            .values
            .iter()
            .cloned()
            .zip(self.ranks.iter().copied())
            .collect_vec();
        group_results(n_queries, &self.query_ids, &tagged)
    }
}

/// Ship `values` along a plan built from `destinations`, together with a `u64` id per item.
fn ship<T, C>(
    comm: &C,
    config: &DistributorConfig,
    destinations: &[Rank],
    values: &[T],
    ids: &[u64],
) -> Result<(Vec<T>, Vec<usize>, Vec<Rank>)>
where
    T: Pod + Send + Sync,
    C: ProcessGroup,
{
    let mut distributor = Distributor::with_config(comm, config.clone());
    let n = distributor.create_from_sends(destinations)?;

    let mut values_in = vec![T::zeroed(); n];
    send_across_network(&distributor, values, &ItemShape::scalar(), &mut values_in)?;

    let mut ids_in = vec![0u64; n];
    send_across_network(&distributor, ids, &ItemShape::scalar(), &mut ids_in)?;

    let ranks = distributor.plan()?.receive_ranks();
    Ok((
        values_in,
        ids_in.into_iter().map(|id| id as usize).collect(),
        ranks,
    ))
}

/// Forward each query to every rank listed for it.
///
/// Collective. Query `q` is sent to `ranks[offsets[q]..offsets[q + 1]]`, a rank listed twice
/// receives two copies.
///
/// # Arguments
/// * `comm` - Process group.
/// * `config` - Plan configuration used for the forwarding exchange.
/// * `queries` - Local query predicates.
/// * `offsets` - `queries.len() + 1` non-decreasing offsets into `ranks`.
/// * `ranks` - Flattened destination ranks of every query.
pub fn forward_queries<Q, C>(
    comm: &C,
    config: &DistributorConfig,
    queries: &[Q],
    offsets: &[usize],
    ranks: &[Rank],
) -> Result<ForwardedQueries<Q>>
where
    Q: Pod + Send + Sync,
    C: ProcessGroup,
{
    let routing = QueryResults::new(offsets.to_vec(), ranks.to_vec())?;
    if routing.n_queries() != queries.len() {
        return Err(CommError::MalformedOffsets(format!(
            "expected {} offsets for {} queries, found {}",
            queries.len() + 1,
            queries.len(),
            offsets.len()
        )));
    }

    let ids = routing
        .iter()
        .enumerate()
        .flat_map(|(q, targets)| std::iter::repeat(q).take(targets.len()))
        .collect_vec();
    let replicated = ids.iter().map(|&q| queries[q]).collect_vec();
    let ids = ids.into_iter().map(|q| q as u64).collect_vec();

    let (queries, origin_ids, origin_ranks) =
        ship(comm, config, routing.values(), &replicated, &ids)?;

    debug!(
        rank = comm.rank(),
        n_forwarded = replicated.len(),
        n_received = queries.len(),
        "forwarded queries"
    );

    Ok(ForwardedQueries {
        queries,
        origin_ids,
        origin_ranks,
    })
}

/// Evaluate forwarded queries against the local index, grouping matches by received query.
pub fn answer_forwarded_queries<I>(
    index: &I,
    forwarded: &ForwardedQueries<I::Query>,
) -> Result<QueryResults<I::Match>>
where
    I: LocalIndex,
    I::Match: Clone,
{
    let (values, tags): (Vec<_>, Vec<_>) =
        index.query_local(&forwarded.queries).into_iter().unzip();
    group_results(forwarded.len(), &tags, &values)
}

/// Return the matches of every forwarded query to the rank that forwarded it.
///
/// Collective, the reverse of [`forward_queries`]. Each returned match carries the origin query
/// id, ready for [`ReturnedResults::group`].
///
/// # Arguments
/// * `comm` - Process group.
/// * `config` - Plan configuration used for the return exchange.
/// * `forwarded` - Queries received by [`forward_queries`].
/// * `results` - Matches of each forwarded query, as from [`answer_forwarded_queries`].
pub fn communicate_results_back<T, Q, C>(
    comm: &C,
    config: &DistributorConfig,
    forwarded: &ForwardedQueries<Q>,
    results: &QueryResults<T>,
) -> Result<ReturnedResults<T>>
where
    T: Pod + Send + Sync,
    C: ProcessGroup,
{
    if results.n_queries() != forwarded.len() {
        return Err(CommError::MalformedOffsets(format!(
            "results cover {} queries, {} were forwarded",
            results.n_queries(),
            forwarded.len()
        )));
    }

    let (destinations, ids): (Vec<_>, Vec<_>) = results
        .iter()
        .enumerate()
        .flat_map(|(f, matches)| {
            std::iter::repeat((forwarded.origin_ranks[f], forwarded.origin_ids[f] as u64))
                .take(matches.len())
        })
        .unzip();

    let (values, query_ids, ranks) = ship(comm, config, &destinations, results.values(), &ids)?;

    debug!(
        rank = comm.rank(),
        n_sent = destinations.len(),
        n_received = values.len(),
        "returned results"
    );

    Ok(ReturnedResults {
        values,
        query_ids,
        ranks,
    })
}
