//! Core trait abstractions for the distillation pipeline.
//!
//! These traits define the interfaces that applications implement to
//! provide transcript segmentation, completion, extraction parsing, and
//! storage capabilities.

pub mod checkpoint;
pub mod completion;
pub mod extractor;
pub mod graph;
pub mod segmenter;
