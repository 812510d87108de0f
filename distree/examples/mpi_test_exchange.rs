//? mpirun -n {{NPROCESSES}} --features "mpi"

#[cfg(feature = "mpi")]
fn main() {
    use distree::{
        count_results, send_across_network_items, CountDiscovery, Distributor, DistributorBuilder,
        MpiProcessGroup, ProcessGroup,
    };
    use mpi::traits::Communicator;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let comm = MpiProcessGroup::new(&world);

    let rank = comm.rank();
    let size = comm.size();
    assert_eq!(size, world.size() as usize);

    // Random destinations local to each process, including self sends
    let n_items = 1000;
    let mut rng = StdRng::seed_from_u64(rank as u64);
    let destinations = (0..n_items)
        .map(|_| rng.gen_range(0..size))
        .collect::<Vec<_>>();

    for discovery in [CountDiscovery::Dense, CountDiscovery::Sparse] {
        let config = DistributorBuilder::new()
            .discovery(discovery)
            .check_consistency(true)
            .build()
            .unwrap();

        let mut distributor = Distributor::with_config(&comm, config);
        let n = distributor.create_from_sends(&destinations).unwrap();

        // Each item carries its origin rank, local index and destination
        let exports = destinations
            .iter()
            .enumerate()
            .map(|(i, &d)| [rank as u64, i as u64, d as u64])
            .collect::<Vec<_>>();
        let mut imports = vec![[0u64; 3]; n];
        send_across_network_items(&distributor, &exports, &mut imports).unwrap();

        assert!(imports.iter().all(|item| item[2] == rank as u64));
        assert!(imports.windows(2).all(|w| w[0] < w[1]));

        // Count received items per origin rank
        let origins = imports
            .iter()
            .map(|item| item[0] as usize)
            .collect::<Vec<_>>();
        let offsets = count_results(size, &origins).unwrap();
        let receive_counts = distributor.plan().unwrap().receive_counts();
        for (source, count) in receive_counts {
            assert_eq!(offsets[source + 1] - offsets[source], count);
        }

        if rank == 0 {
            println!("...test_exchange_{discovery:?} passed");
        }
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
