//! Typed bulk exchange of multi-dimensional buffers along a communication plan
use std::borrow::Cow;

use bytemuck::{cast_slice, cast_slice_mut, Pod};
use itertools::Itertools;
use rayon::prelude::{
    IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator, ParallelSliceMut,
};
use tracing::debug;

use crate::{
    distributor::types::{Distributor, Route},
    error::{CommError, Result},
    traits::communication::{ProcessGroup, ReceiveBuffer, SendBuffer},
};

/// Trailing shape of one item, buffers are row major with the item index as the leading extent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemShape {
    extents: Vec<usize>,
}

impl ItemShape {
    /// One scalar per item
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Items of shape `extents`, e.g. `[3]` for coordinates or `[2, 3]` for a box
    pub fn new(extents: &[usize]) -> Self {
        Self {
            extents: extents.to_vec(),
        }
    }

    /// Trailing extents
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Number of scalars per item
    pub fn width(&self) -> usize {
        self.extents.iter().product()
    }
}

/// Gather `source` into send order, item `p` of the result is item `permutation[p]` of the source.
fn pack<T: Pod + Send + Sync>(
    source: &[T],
    permutation: &[usize],
    width: usize,
    parallel_threshold: usize,
) -> Vec<T> {
    let mut packed = vec![T::zeroed(); source.len()];

    if permutation.len() < parallel_threshold {
        for (out, &i) in packed.chunks_exact_mut(width).zip(permutation) {
            out.copy_from_slice(&source[i * width..(i + 1) * width]);
        }
    } else {
        packed
            .par_chunks_exact_mut(width)
            .zip(permutation.par_iter())
            .for_each(|(out, &i)| out.copy_from_slice(&source[i * width..(i + 1) * width]));
    }

    packed
}

/// Send each local item to its destination along `distributor`'s plan, writing received items
/// into `destination` in receive order.
///
/// Collective over the plan's process group. Received items are grouped by source rank in
/// ascending order, items this process sends to itself are copied locally into their slot.
/// Returns once every item has been transferred.
///
/// # Arguments
/// * `distributor` - A built plan, may be reused for any number of exchanges.
/// * `source` - Row major buffer of `total_send_count` items of shape `shape`.
/// * `shape` - Trailing shape of an item, identical on source and destination.
/// * `destination` - Row major buffer of `total_receive_count` items of shape `shape`.
pub fn send_across_network<T, C>(
    distributor: &Distributor<'_, C>,
    source: &[T],
    shape: &ItemShape,
    destination: &mut [T],
) -> Result<()>
where
    T: Pod + Send + Sync,
    C: ProcessGroup,
{
    let plan = distributor.plan()?;
    let width = shape.width();

    let expected = plan.total_send_count() * width;
    if source.len() != expected {
        return Err(CommError::BufferSizeMismatch {
            buffer: "source",
            expected,
            found: source.len(),
        });
    }

    let expected = plan.total_receive_count() * width;
    if destination.len() != expected {
        return Err(CommError::BufferSizeMismatch {
            buffer: "destination",
            expected,
            found: destination.len(),
        });
    }

    if width == 0 {
        return Ok(());
    }

    let packed = if plan.is_identity() {
        Cow::Borrowed(source)
    } else {
        Cow::Owned(pack(
            source,
            plan.permutation(),
            width,
            distributor.config().parallel_threshold,
        ))
    };
    let segment = |offset: usize, count: usize| &packed[offset * width..(offset + count) * width];

    // Receive segments are contiguous and ordered, so receive directly into the destination
    let mut local = None;
    let mut receives = Vec::new();
    let mut rest = destination;
    for receive in plan.receives() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(receive.count * width);
        rest = tail;
        match receive.route {
            Route::Local => local = Some(head),
            Route::Remote => receives.push(ReceiveBuffer {
                peer: receive.rank,
                data: cast_slice_mut(head),
            }),
        }
    }

    let sends = plan
        .sends()
        .iter()
        .filter(|send| send.route == Route::Remote)
        .map(|send| SendBuffer {
            peer: send.rank,
            data: cast_slice(segment(send.offset, send.count)),
        })
        .collect_vec();

    let n_local = match (local, plan.local_send()) {
        (Some(local), Some(send)) => {
            local.copy_from_slice(segment(send.offset, send.count));
            send.count
        }
        _ => 0,
    };

    debug!(
        rank = distributor.comm().rank(),
        bytes_sent = sends.iter().map(|s| s.data.len()).sum::<usize>(),
        bytes_received = receives.iter().map(|r| r.data.len()).sum::<usize>(),
        n_local,
        packed = !plan.is_identity(),
        "exchange"
    );

    distributor
        .comm()
        .exchange_bytes(&sends, &mut receives, distributor.config().tag)
}

/// As [`send_across_network`] for fixed width items, e.g. `[f64; 3]` coordinates.
pub fn send_across_network_items<T, C, const W: usize>(
    distributor: &Distributor<'_, C>,
    source: &[[T; W]],
    destination: &mut [[T; W]],
) -> Result<()>
where
    T: Pod + Send + Sync,
    C: ProcessGroup,
{
    send_across_network(
        distributor,
        source.as_flattened(),
        &ItemShape::new(&[W]),
        destination.as_flattened_mut(),
    )
}

#[cfg(test)]
mod test {
    use crate::{
        comm::local::LocalProcessGroup,
        distributor::types::Distributor,
        error::CommError,
        traits::communication::ProcessGroup,
    };

    use super::{pack, send_across_network, send_across_network_items, ItemShape};

    #[test]
    fn test_item_shape() {
        assert_eq!(ItemShape::scalar().width(), 1);
        assert_eq!(ItemShape::new(&[3]).width(), 3);
        assert_eq!(ItemShape::new(&[2, 3]).width(), 6);
        assert_eq!(ItemShape::new(&[2, 0]).width(), 0);
    }

    #[test]
    fn test_pack() {
        let source = [0, 1, 10, 11, 20, 21];
        let permutation = [2, 0, 1];
        assert_eq!(pack(&source, &permutation, 2, usize::MAX), vec![20, 21, 0, 1, 10, 11]);
        assert_eq!(pack(&source, &permutation, 2, 1), vec![20, 21, 0, 1, 10, 11]);
    }

    #[test]
    fn test_single_process_local_copy() {
        // Every item targets this process, no network traffic
        let groups = LocalProcessGroup::create(1);
        let mut distributor = Distributor::new(&groups[0]);
        let n = distributor.create_from_sends(&[0; 5]).unwrap();

        let source: Vec<f64> = (0..5 * 3).map(|i| i as f64).collect();
        let mut destination = vec![0.0; n * 3];
        send_across_network(&distributor, &source, &ItemShape::new(&[3]), &mut destination)
            .unwrap();

        assert_eq!(destination, source);
        assert_eq!(distributor.plan().unwrap().n_remote_peers(), (0, 0));
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let groups = LocalProcessGroup::create(1);
        let mut distributor = Distributor::new(&groups[0]);
        distributor.create_from_sends(&[0, 0]).unwrap();

        let mut destination = [0u32; 4];
        assert_eq!(
            send_across_network(&distributor, &[1u32; 3], &ItemShape::new(&[2]), &mut destination),
            Err(CommError::BufferSizeMismatch {
                buffer: "source",
                expected: 4,
                found: 3
            })
        );

        let mut destination = [0u32; 5];
        assert_eq!(
            send_across_network(&distributor, &[1u32; 4], &ItemShape::new(&[2]), &mut destination),
            Err(CommError::BufferSizeMismatch {
                buffer: "destination",
                expected: 4,
                found: 5
            })
        );
    }

    #[test]
    fn test_exchange_before_build() {
        let groups = LocalProcessGroup::create(1);
        let distributor = Distributor::new(&groups[0]);
        let result = send_across_network(&distributor, &[0u8; 0], &ItemShape::scalar(), &mut []);
        assert_eq!(result, Err(CommError::PlanNotBuilt));
    }

    #[test]
    fn test_send_across_network_all_to_all() {
        // Send one item of width 3 to every rank k: u_exp[k][j] = k + j * rank.
        // Receive from every rank k: u_ref[k][j] = rank + j * k.
        let size = 4;
        let dim = 3;
        let received = LocalProcessGroup::run(size, |comm| {
            let rank = comm.rank();
            let exports = (0..size)
                .map(|k| {
                    let mut item = [0i32; 3];
                    for (j, x) in item.iter_mut().enumerate() {
                        *x = (k + j * rank) as i32;
                    }
                    item
                })
                .collect::<Vec<_>>();
            let destinations = (0..size).collect::<Vec<_>>();

            let mut distributor = Distributor::new(comm);
            let n = distributor.create_from_sends(&destinations).unwrap();
            let mut imports = vec![[0i32; 3]; n];
            send_across_network_items(&distributor, &exports, &mut imports).unwrap();
            imports
        });

        for (rank, imports) in received.iter().enumerate() {
            assert_eq!(imports.len(), size);
            for (k, item) in imports.iter().enumerate() {
                for j in 0..dim {
                    assert_eq!(item[j], (rank + j * k) as i32);
                }
            }
        }
    }

    #[test]
    fn test_plan_reuse_with_different_payloads() {
        // Rank r sends item i to rank (r + i) % size, out of destination order
        let size = 3;
        let results = LocalProcessGroup::run(size, |comm| {
            let rank = comm.rank();
            let destinations = (0..7).map(|i| (rank + i) % size).collect::<Vec<_>>();

            let mut distributor = Distributor::new(comm);
            let n = distributor.create_from_sends(&destinations).unwrap();

            // Global ids, encoding origin rank and local index
            let ids = (0..7).map(|i| (100 * rank + i) as u64).collect::<Vec<_>>();
            let mut ids_in = vec![0u64; n];
            send_across_network(&distributor, &ids, &ItemShape::scalar(), &mut ids_in).unwrap();

            // A second payload of a different type and width over the same plan
            let boxes = (0..7)
                .flat_map(|i| {
                    let v = (100 * rank + i) as f32;
                    [v, -v, 2.0 * v, -2.0 * v]
                })
                .collect::<Vec<_>>();
            let mut boxes_in = vec![0f32; n * 4];
            send_across_network(&distributor, &boxes, &ItemShape::new(&[2, 2]), &mut boxes_in)
                .unwrap();

            (ids_in, boxes_in, distributor.plan().unwrap().receive_ranks())
        });

        for (rank, (ids_in, boxes_in, sources)) in results.iter().enumerate() {
            // Identical routing for both payloads
            for (p, &id) in ids_in.iter().enumerate() {
                let v = id as f32;
                assert_eq!(&boxes_in[4 * p..4 * p + 4], &[v, -v, 2.0 * v, -2.0 * v]);

                // Attributed to the sending rank, and actually destined here
                let (origin, i) = (id as usize / 100, id as usize % 100);
                assert_eq!(sources[p], origin);
                assert_eq!((origin + i) % size, rank);
            }

            // Grouped by ascending source, original order within a source
            assert!(ids_in.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
