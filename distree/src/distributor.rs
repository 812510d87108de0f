//! # Communication Plans
//!
//! A [`Distributor`](types::Distributor) turns a data dependent list of item destinations into a
//! reusable send and receive schedule. The receive side is discovered with a collective count
//! handshake, so no process needs prior knowledge of who will send to it.
pub mod types;

mod builder;
mod handshake;
mod plan;
