//! Grouping of items by destination rank into contiguous send buckets
use itertools::Itertools;
use rayon::slice::ParallelSliceMut;

use crate::{
    helpers::{exclusive_scan, histogram, DEFAULT_PARALLEL_THRESHOLD},
    traits::communication::Rank,
};

/// Destination key ranges up to this size are always bucketed with a counting sort
const DENSE_KEY_RANGE: usize = 1 << 16;

/// Grouping of a destination array into contiguous buckets, one per distinct destination.
///
/// Bucket `i` holds the items destined to `unique[i]`, their original indices are
/// `permutation[offsets[i]..offsets[i + 1]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferLayout {
    /// `permutation[p]` is the original index of the item packed at position `p`
    pub permutation: Vec<usize>,
    /// Distinct destinations, strictly ascending
    pub unique: Vec<Rank>,
    /// Number of items per distinct destination
    pub counts: Vec<usize>,
    /// Exclusive prefix sum of `counts`, of length `unique.len() + 1`
    pub offsets: Vec<usize>,
}

impl BufferLayout {
    /// Number of distinct destinations.
    pub fn n_buckets(&self) -> usize {
        self.unique.len()
    }

    /// Number of grouped items.
    pub fn n_items(&self) -> usize {
        self.permutation.len()
    }

    /// True if items are already grouped in their original order, so packing is a no-op.
    pub fn is_identity(&self) -> bool {
        self.permutation.iter().enumerate().all(|(p, &i)| p == i)
    }
}

/// Group items by destination, returning the packing permutation together with the distinct
/// destinations, per destination counts and offsets.
///
/// Destinations are bucketed in ascending order, items sharing a destination keep their original
/// relative order, so the layout is fully determined by the input.
///
/// # Arguments
/// * `destinations` - One destination rank per local item, in any order and with any repetition.
pub fn sort_and_determine_buffer_layout(destinations: &[Rank]) -> BufferLayout {
    sort_and_determine_buffer_layout_with_threshold(destinations, DEFAULT_PARALLEL_THRESHOLD)
}

/// As [`sort_and_determine_buffer_layout`], running in parallel for inputs of at least
/// `parallel_threshold` items.
pub fn sort_and_determine_buffer_layout_with_threshold(
    destinations: &[Rank],
    parallel_threshold: usize,
) -> BufferLayout {
    let n = destinations.len();

    let Some(&max) = destinations.iter().max() else {
        return BufferLayout {
            offsets: vec![0],
            ..Default::default()
        };
    };

    if max < n.max(DENSE_KEY_RANGE) {
        counting_sort(destinations, max + 1, parallel_threshold)
    } else {
        comparison_sort(destinations, parallel_threshold)
    }
}

/// Counting sort over a dense key range, linear in the number of items plus the key range.
fn counting_sort(destinations: &[Rank], n_keys: usize, parallel_threshold: usize) -> BufferLayout {
    let bins = histogram(destinations, n_keys, parallel_threshold);

    // Start of each key's bucket in packed order
    let mut starts = exclusive_scan(&bins, parallel_threshold);

    // Stable scatter, each packed position written exactly once
    let mut permutation = vec![0usize; destinations.len()];
    for (i, &destination) in destinations.iter().enumerate() {
        permutation[starts[destination]] = i;
        starts[destination] += 1;
    }

    let (unique, counts): (Vec<_>, Vec<_>) = bins
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(|(key, &count)| (key, count))
        .unzip();

    let offsets = exclusive_scan(&counts, parallel_threshold);

    BufferLayout {
        permutation,
        unique,
        counts,
        offsets,
    }
}

/// Stable comparison sort of item indices by key, for sparse key ranges.
fn comparison_sort(destinations: &[Rank], parallel_threshold: usize) -> BufferLayout {
    let mut permutation = (0..destinations.len()).collect_vec();

    if destinations.len() < parallel_threshold {
        permutation.sort_by_key(|&i| destinations[i]);
    } else {
        permutation.par_sort_by_key(|&i| destinations[i]);
    }

    let (counts, unique): (Vec<_>, Vec<_>) = permutation
        .iter()
        .map(|&i| destinations[i])
        .dedup_with_count()
        .unzip();

    let offsets = exclusive_scan(&counts, parallel_threshold);

    BufferLayout {
        permutation,
        unique,
        counts,
        offsets,
    }
}
