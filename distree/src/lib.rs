//! # Distributed Tree Communication Core
//!
//! The communication layer beneath a spatial search index partitioned across many cooperating
//! processes, each owning a disjoint subset of the indexed geometry.
//!
//! Notable features of this library are:
//! * A bucketing primitive that groups items by destination rank,
//!   [`sort_and_determine_buffer_layout`].
//! * A reusable communication plan, [`Distributor`], built from an arbitrary data dependent list of
//!   destination ranks via a collective count discovery handshake.
//! * Typed bulk exchange of multi-dimensional buffers along a plan, [`send_across_network`].
//! * Compaction of an unordered match stream into a ragged per-query layout, [`count_results`].
//! * Transport agnostic, with an in-process thread backed process group for testing and shared
//!   memory runs, and an MPI backed process group with the `mpi` feature.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod comm;
pub mod distributor;
pub mod error;
pub mod exchange;
pub mod helpers;
pub mod query;
pub mod results;
pub mod sorting;
pub mod traits;

// Public API
#[doc(inline)]
pub use comm::local::LocalProcessGroup;
#[cfg(feature = "mpi")]
#[doc(inline)]
pub use comm::mpi::MpiProcessGroup;
#[doc(inline)]
pub use distributor::types::{
    CountDiscovery, Distributor, DistributorBuilder, DistributorConfig, PeerSegment, Plan, Route,
};
#[doc(inline)]
pub use error::{CommError, Result};
#[doc(inline)]
pub use exchange::{send_across_network, send_across_network_items, ItemShape};
#[doc(inline)]
pub use query::{
    answer_forwarded_queries, communicate_results_back, forward_queries, ForwardedQueries,
    ReturnedResults,
};
#[doc(inline)]
pub use results::{count_results, group_results, QueryResults};
#[doc(inline)]
pub use sorting::{sort_and_determine_buffer_layout, BufferLayout};
#[doc(inline)]
pub use traits::{communication::ProcessGroup, index::LocalIndex};
