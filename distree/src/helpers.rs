//! Parallel building blocks shared by the sorter and the result counter
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::{
    IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator, ParallelSlice,
    ParallelSliceMut,
};

/// Inputs shorter than this run sequentially
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 14;

/// Exclusive prefix sum, the returned vector has one more element than `counts`, starting at zero
/// and ending at the total.
///
/// Above `parallel_threshold` the sum is computed blockwise, per block totals are combined
/// sequentially, so the result does not depend on scheduling.
pub fn exclusive_scan(counts: &[usize], parallel_threshold: usize) -> Vec<usize> {
    let mut offsets = vec![0usize; counts.len() + 1];

    if counts.len() < parallel_threshold.max(1) {
        let mut acc = 0;
        for (offset, &count) in offsets[1..].iter_mut().zip(counts) {
            acc += count;
            *offset = acc;
        }
        return offsets;
    }

    let block = (counts.len() / rayon::current_num_threads()).max(1024);

    let block_totals = counts
        .par_chunks(block)
        .map(|chunk| chunk.iter().sum::<usize>())
        .collect::<Vec<_>>();

    let mut block_starts = Vec::with_capacity(block_totals.len());
    let mut acc = 0;
    for &total in block_totals.iter() {
        block_starts.push(acc);
        acc += total;
    }

    offsets[1..]
        .par_chunks_mut(block)
        .zip(counts.par_chunks(block))
        .zip(block_starts.par_iter())
        .for_each(|((out, chunk), &start)| {
            let mut acc = start;
            for (o, &c) in out.iter_mut().zip(chunk) {
                acc += c;
                *o = acc;
            }
        });

    offsets
}

/// Histogram of `keys` into `n_bins` bins, every key must be smaller than `n_bins`.
///
/// Above `parallel_threshold`, workers fill private histograms which are then summed, as long as
/// one histogram per worker costs no more than the keys themselves. Otherwise all workers share a
/// single histogram of atomic counters, so memory stays linear in `n_bins`.
pub fn histogram(keys: &[usize], n_bins: usize, parallel_threshold: usize) -> Vec<usize> {
    if keys.len() < parallel_threshold.max(1) {
        let mut bins = vec![0usize; n_bins];
        for &key in keys {
            bins[key] += 1;
        }
        return bins;
    }

    if n_bins.saturating_mul(rayon::current_num_threads()) > keys.len() {
        let bins = (0..n_bins).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>();
        keys.par_iter().for_each(|&key| {
            bins[key].fetch_add(1, Ordering::Relaxed);
        });
        return bins.into_iter().map(AtomicUsize::into_inner).collect();
    }

    keys.par_chunks(parallel_threshold.max(1024))
        .fold(
            || vec![0usize; n_bins],
            |mut bins, chunk| {
                for &key in chunk {
                    bins[key] += 1;
                }
                bins
            },
        )
        .reduce(
            || vec![0usize; n_bins],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        )
}
