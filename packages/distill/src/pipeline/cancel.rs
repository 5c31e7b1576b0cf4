//! Cooperative shutdown signaling.
//!
//! A stop request never interrupts in-flight work; workers observe it
//! before dequeuing the next unit and the executor observes it between
//! stages, so every checkpoint remains consistent.

use tokio_util::sync::CancellationToken;

/// Clonable handle for requesting and observing graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a fresh signal in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop. Idempotent.
    pub fn request_stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }
}
