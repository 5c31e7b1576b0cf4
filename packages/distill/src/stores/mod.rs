//! Store implementations for the pipeline's persistence traits.

pub mod memory;

pub use memory::{MemoryCheckpointStore, MemoryGraphStore};
