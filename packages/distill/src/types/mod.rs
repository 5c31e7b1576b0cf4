//! Data types for the distillation pipeline.

pub mod checkpoint;
pub mod config;
pub mod episode;
pub mod knowledge;
pub mod unit;
