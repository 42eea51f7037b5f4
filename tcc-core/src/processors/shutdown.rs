//! Shutdown coordination.
//!
//! State only moves forward: `Running -> Draining -> Stopped`. Every worker
//! and the telemetry sink watch the same channel.
//!
//! Sequence once intake has stopped:
//! 1. Broadcast `Draining`. Workers stop taking new items and exit once the
//!    item in hand, if any, is done.
//! 2. Wait up to the worker timeout for the worker tasks, then abort the rest.
//! 3. Close the work queue and reclaim anything still buffered as
//!    `shutdown_abandoned`, waiting up to the queue timeout for it to empty.
//! 4. Wait up to the queue timeout for the log queue, with the sink running.
//! 5. Broadcast `Stopped` and wait for the sink.
//!
//! The whole sequence is bounded by one worker timeout plus two queue
//! timeouts, plus the sink's own grace period.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{info, warn};

use super::verification_worker::VerificationWorkerPool;
use crate::events::{DrainTracker, WorkReceiver, WorkSender};
use crate::metrics::{self, SharedMetrics, error_type};

/// Grace period for worker tasks, and for the telemetry sink, before abort.
pub const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// How long each queue gets to empty during shutdown.
pub const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

/// Pipeline lifecycle broadcast to workers and the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// The queued-mode pieces handed over at shutdown.
pub struct WorkQueueParts {
    pub pool: Option<VerificationWorkerPool>,
    pub work_tx: WorkSender,
    pub work_rx: WorkReceiver,
}

/// Everything the coordinator tears down, handed over once intake stops.
pub struct ShutdownParts {
    /// `None` in inline mode.
    pub work: Option<WorkQueueParts>,
    pub log_tracker: DrainTracker,
    pub sink: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// ShutdownCoordinator
// ---------------------------------------------------------------------------

/// Owns the lifecycle broadcast and runs the shutdown sequence.
pub struct ShutdownCoordinator {
    state_tx: watch::Sender<ShutdownState>,
    worker_timeout: Duration,
    queue_timeout: Duration,
    metrics: SharedMetrics,
}

impl ShutdownCoordinator {
    pub fn new(metrics: SharedMetrics) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            state_tx,
            worker_timeout: WORKER_SHUTDOWN_TIMEOUT,
            queue_timeout: QUEUE_DRAIN_TIMEOUT,
            metrics,
        }
    }

    /// Override the worker and queue timeouts.
    pub fn with_timeouts(mut self, worker_timeout: Duration, queue_timeout: Duration) -> Self {
        self.worker_timeout = worker_timeout;
        self.queue_timeout = queue_timeout;
        self
    }

    /// A receiver for the lifecycle broadcast, starting at the current state.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    fn advance(&self, next: ShutdownState) {
        self.state_tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Run the shutdown sequence. Always terminates.
    pub async fn shutdown(&self, parts: ShutdownParts) {
        let ShutdownParts {
            work,
            log_tracker,
            sink,
        } = parts;

        info!("Shutting down pipeline");
        self.advance(ShutdownState::Draining);

        if let Some(WorkQueueParts {
            pool,
            work_tx,
            work_rx,
        }) = work
        {
            let work_tracker = work_tx.tracker();
            drop(work_tx);

            if let Some(pool) = pool {
                self.stop_workers(pool.into_tasks()).await;
            }

            let abandoned = work_rx.close_and_drain().await;
            if !abandoned.is_empty() {
                warn!(count = abandoned.len(), "Abandoning queued records");
            }
            for item in abandoned {
                self.metrics.increment_counter(
                    metrics::PROCESSING_ERRORS,
                    &[
                        (metrics::TOPIC, item.item().record.topic.as_str()),
                        (metrics::ERROR_TYPE, error_type::SHUTDOWN_ABANDONED),
                    ],
                );
            }

            if timeout(self.queue_timeout, work_tracker.drained())
                .await
                .is_err()
            {
                warn!(
                    pending = work_tracker.pending(),
                    "Work queue did not drain within timeout"
                );
            }
        }

        if timeout(self.queue_timeout, log_tracker.drained())
            .await
            .is_err()
        {
            warn!(
                pending = log_tracker.pending(),
                "Log queue did not drain within timeout"
            );
        }

        self.advance(ShutdownState::Stopped);
        let mut sink = sink;
        if timeout(self.worker_timeout, &mut sink).await.is_err() {
            warn!("Telemetry sink did not stop within timeout");
            sink.abort();
        }

        info!("Shutdown complete");
    }

    // -- Private helpers ----------------------------------------------------

    async fn stop_workers(&self, mut tasks: JoinSet<()>) {
        let joined = timeout(self.worker_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if joined.is_err() {
            warn!(
                remaining = tasks.len(),
                "Some workers did not shut down within timeout, aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{WorkItem, log_queue, work_queue};
    use crate::test_utils::{InMemoryMetrics, record};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_state_only_moves_forward() {
        let coordinator = ShutdownCoordinator::new(Arc::new(InMemoryMetrics::default()));
        let rx = coordinator.subscribe();
        coordinator.advance(ShutdownState::Stopped);
        coordinator.advance(ShutdownState::Draining);
        coordinator.advance(ShutdownState::Running);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(*rx.borrow(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_items_are_recorded_as_abandoned() {
        let metrics = Arc::new(InMemoryMetrics::default());
        let coordinator = ShutdownCoordinator::new(metrics.clone());
        let (work_tx, work_rx) = work_queue(4);
        let (log_tx, log_rx) = log_queue();
        for i in 0..3 {
            let item = WorkItem::new(record("trades", &format!("k{i}"), json!({})));
            work_tx.send(item).await.unwrap();
        }

        let mut state_rx = coordinator.subscribe();
        let sink = tokio::spawn(async move {
            let _log_rx = log_rx;
            while *state_rx.borrow_and_update() != ShutdownState::Stopped {
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let start = tokio::time::Instant::now();
        coordinator
            .shutdown(ShutdownParts {
                work: Some(WorkQueueParts {
                    pool: None,
                    work_tx,
                    work_rx,
                }),
                log_tracker: log_tx.tracker(),
                sink,
            })
            .await;

        // Leftovers are reclaimed up front, nothing waits on a timeout.
        assert!(start.elapsed() < WORKER_SHUTDOWN_TIMEOUT);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(
            metrics.counter(
                metrics::PROCESSING_ERRORS,
                &[("topic", "trades"), ("error_type", "shutdown_abandoned")]
            ),
            3.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_sink_is_aborted() {
        let coordinator = ShutdownCoordinator::new(Arc::new(InMemoryMetrics::default()))
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        let (log_tx, _log_rx) = log_queue();
        let sink = tokio::spawn(std::future::pending::<()>());

        let start = tokio::time::Instant::now();
        coordinator
            .shutdown(ShutdownParts {
                work: None,
                log_tracker: log_tx.tracker(),
                sink,
            })
            .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }
}
