//! Liveness reporting on first partition assignment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Receives the "consumer is live" notification.
pub trait LivenessSignal: Send + Sync {
    fn mark_live(&self);
}

/// Shared boolean readiness flag.
#[derive(Debug, Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl LivenessSignal for ReadinessFlag {
    fn mark_live(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Invoked by the broker source on every partition assignment. Marks the
/// process live the first time only.
#[derive(Clone)]
pub struct AssignmentHook {
    signal: Arc<dyn LivenessSignal>,
    fired: Arc<AtomicBool>,
}

impl AssignmentHook {
    pub fn new(signal: Arc<dyn LivenessSignal>) -> Self {
        Self {
            signal,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on_assign(&self, partitions: &[(String, i32)]) {
        info!(?partitions, "Partitions assigned");
        if !self.fired.swap(true, Ordering::AcqRel) {
            info!("Consumer is live");
            self.signal.mark_live();
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
