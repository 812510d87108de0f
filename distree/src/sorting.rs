//! Local sorting primitives
pub mod buffer_layout;

pub use buffer_layout::{sort_and_determine_buffer_layout, BufferLayout};
