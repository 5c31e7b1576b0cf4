//! Episode execution: the stage-ordered executor and shutdown signaling.

pub mod cancel;
pub mod executor;

pub use cancel::ShutdownSignal;
pub use executor::Pipeline;
