//! Interface to the local, single process, spatial index

/// The local spatial index owned by a process.
///
/// Tree construction and predicate evaluation live entirely behind this trait, the communication
/// core only consumes the facts it produces.
pub trait LocalIndex {
    /// Query predicate, e.g. a bounding volume or a nearest neighbour request
    type Query;

    /// Payload reported for each match
    type Match;

    /// Summary of the locally owned geometry, used by the caller to decide forwarding destinations
    type Bounds;

    /// Evaluate a batch of queries against local geometry.
    ///
    /// Returns one `(match, owning query index)` pair per match, in any order.
    fn query_local(&self, queries: &[Self::Query]) -> Vec<(Self::Match, usize)>;

    /// Summary of the locally owned geometry.
    fn bounding_info(&self) -> Self::Bounds;
}
