//! Process group implementations
pub mod local;

#[cfg(feature = "mpi")]
pub mod mpi;
