//! Compaction of unordered match streams into per-query ragged arrays
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    error::{CommError, Result},
    helpers::{exclusive_scan, histogram, DEFAULT_PARALLEL_THRESHOLD},
};

/// Count the matches of each of `n_queries` queries, returning `n_queries + 1` offsets such that
/// query `q` owns `offsets[q]..offsets[q + 1]` of the compacted results.
///
/// # Arguments
/// * `n_queries` - Number of logical queries, M.
/// * `tags` - Owning query of every match, in any order and with any repetition.
///
/// # Example
/// ```
/// use distree::count_results;
///
/// let offsets = count_results(5, &[4, 3, 2, 1, 4, 3, 2, 4, 3, 4]).unwrap();
/// assert_eq!(offsets, vec![0, 0, 1, 3, 6, 10]);
/// ```
pub fn count_results(n_queries: usize, tags: &[usize]) -> Result<Vec<usize>> {
    count_results_with_threshold(n_queries, tags, DEFAULT_PARALLEL_THRESHOLD)
}

/// As [`count_results`], running in parallel for at least `parallel_threshold` tags.
pub fn count_results_with_threshold(
    n_queries: usize,
    tags: &[usize],
    parallel_threshold: usize,
) -> Result<Vec<usize>> {
    let invalid = if tags.len() < parallel_threshold {
        tags.iter().copied().find(|&tag| tag >= n_queries)
    } else {
        tags.par_iter().copied().find_first(|&tag| tag >= n_queries)
    };

    if let Some(tag) = invalid {
        return Err(CommError::InvalidTag { tag, n_queries });
    }

    let counts = histogram(tags, n_queries, parallel_threshold);
    Ok(exclusive_scan(&counts, parallel_threshold))
}

/// Place each match into its query's slot, returning the compacted ragged array.
///
/// Matches of the same query keep their relative order from the input stream.
///
/// # Arguments
/// * `n_queries` - Number of logical queries, M.
/// * `tags` - Owning query of every match.
/// * `values` - Match payloads, one per tag.
pub fn group_results<T: Clone>(
    n_queries: usize,
    tags: &[usize],
    values: &[T],
) -> Result<QueryResults<T>> {
    if tags.len() != values.len() {
        return Err(CommError::BufferSizeMismatch {
            buffer: "values",
            expected: tags.len(),
            found: values.len(),
        });
    }

    let offsets = count_results(n_queries, tags)?;

    // Scratch copy of the offsets, each advanced past every match placed
    let mut cursor = offsets[..n_queries].to_vec();
    let mut order = vec![0usize; tags.len()];
    for (i, &tag) in tags.iter().enumerate() {
        order[cursor[tag]] = i;
        cursor[tag] += 1;
    }

    let values = order.iter().map(|&i| values[i].clone()).collect();

    Ok(QueryResults { offsets, values })
}

/// Results of a batch of queries as a ragged array, a flat value array delimited by offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResults<T> {
    offsets: Vec<usize>,
    values: Vec<T>,
}

impl<T> Default for QueryResults<T> {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            values: Vec::new(),
        }
    }
}

impl<T> QueryResults<T> {
    /// Assemble from an existing offsets and values pair.
    ///
    /// Offsets must be non-decreasing, start at zero and end at the number of values.
    pub fn new(offsets: Vec<usize>, values: Vec<T>) -> Result<Self> {
        match (offsets.first(), offsets.last()) {
            (Some(0), Some(&last)) if last == values.len() => {}
            _ => {
                return Err(CommError::MalformedOffsets(format!(
                    "offsets must run from 0 to {}, found {:?}..{:?}",
                    values.len(),
                    offsets.first(),
                    offsets.last()
                )))
            }
        }

        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(CommError::MalformedOffsets(
                "offsets must be non-decreasing".to_string(),
            ));
        }

        Ok(Self { offsets, values })
    }

    /// Number of queries
    pub fn n_queries(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of matches
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no query matched anything
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Offsets delimiting each query's results
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// All results, grouped by query
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Results of query `q`
    pub fn results(&self, q: usize) -> &[T] {
        &self.values[self.offsets[q]..self.offsets[q + 1]]
    }

    /// Iterate over the results of each query in turn
    pub fn iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.offsets
            .windows(2)
            .map(move |w| &self.values[w[0]..w[1]])
    }

    /// Decompose into offsets and values
    pub fn into_parts(self) -> (Vec<usize>, Vec<T>) {
        (self.offsets, self.values)
    }
}
