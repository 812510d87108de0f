//! # Trait Definitions
pub mod communication;
pub mod index;
