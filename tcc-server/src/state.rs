//! Application state shared across all request handlers.

use tcc_core::processors::ReadinessFlag;

/// Application state that is shared across all request handlers.
///
/// Cheap to clone; the readiness flag is shared with the consumer.
#[derive(Clone, Default)]
pub struct AppState {
    /// Set once the consumer receives its first partition assignment.
    pub readiness: ReadinessFlag,
}

impl AppState {
    pub fn new(readiness: ReadinessFlag) -> Self {
        Self { readiness }
    }
}
