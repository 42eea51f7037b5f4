//! Verification worker pool.
//!
//! A fixed set of workers share the receiving side of the bounded work queue.
//! While running, each worker waits on the queue and the shutdown broadcast
//! with an idle timeout. Once draining starts a worker takes no new items:
//! it finishes the one in hand, if any, and exits. Whatever is still buffered
//! is reclaimed by the shutdown coordinator.

use std::sync::Arc;
use std::time::Duration;

use kanau::processor::Processor;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::record_pipeline::{OutcomeTally, RecordJob, RecordOutcome, RecordPipeline};
use super::shutdown::ShutdownState;
use crate::events::{Ticketed, WorkItem, WorkReceiver};
use crate::metrics::{self, SharedMetrics, error_type};

/// How long an idle worker waits before re-checking the shutdown state.
pub const IDLE_WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// VerificationWorkerPool
// ---------------------------------------------------------------------------

/// The running worker tasks. Handed to the shutdown coordinator to join.
pub struct VerificationWorkerPool {
    tasks: JoinSet<()>,
}

impl VerificationWorkerPool {
    /// Spawn `worker_count` workers onto the current runtime.
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Shared per-record processor
    /// * `work_rx` - Receiving side of the work queue, cloned into each worker
    /// * `shutdown_rx` - Lifecycle broadcast; workers stop taking items once it leaves `Running`
    pub fn start(
        worker_count: usize,
        pipeline: Arc<RecordPipeline>,
        work_rx: WorkReceiver,
        shutdown_rx: watch::Receiver<ShutdownState>,
        metrics: SharedMetrics,
    ) -> Self {
        info!(worker_count, "Adding verification workers");
        let mut tasks = JoinSet::new();
        for id in 1..=worker_count {
            let worker = VerificationWorker {
                id,
                pipeline: pipeline.clone(),
                work_rx: work_rx.clone(),
                shutdown_rx: shutdown_rx.clone(),
                metrics: metrics.clone(),
            };
            tasks.spawn(worker.run());
        }
        Self { tasks }
    }

    pub(crate) fn into_tasks(self) -> JoinSet<()> {
        self.tasks
    }
}

// ---------------------------------------------------------------------------
// VerificationWorker
// ---------------------------------------------------------------------------

struct VerificationWorker {
    id: usize,
    pipeline: Arc<RecordPipeline>,
    work_rx: WorkReceiver,
    shutdown_rx: watch::Receiver<ShutdownState>,
    metrics: SharedMetrics,
}

impl VerificationWorker {
    async fn run(mut self) {
        debug!(worker_id = self.id, "Verification worker started");
        let _active = ActiveWorker::enter(self.metrics.clone());
        let mut tally = OutcomeTally::default();

        loop {
            if *self.shutdown_rx.borrow_and_update() != ShutdownState::Running {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        warn!(worker_id = self.id, "Shutdown channel closed");
                        break;
                    }
                }

                received = timeout(IDLE_WAIT, self.work_rx.recv()) => match received {
                    Err(_) => continue,
                    Ok(Some((item, depth))) => {
                        self.metrics.set_gauge(metrics::WORK_QUEUE_DEPTH, &[], depth as f64);
                        tally.add(self.handle(item).await);
                    }
                    Ok(None) => {
                        debug!(worker_id = self.id, "Work queue closed");
                        break;
                    }
                },
            }
        }

        debug!(
            worker_id = self.id,
            processed = tally.processed,
            failed = tally.failed,
            "Verification worker stopped"
        );
    }

    async fn handle(&self, item: Ticketed<WorkItem>) -> RecordOutcome {
        // Dropping the ticket marks the item consumed, including when this
        // task is aborted mid-call.
        let (item, _ticket) = item.into_parts();
        let mut guard = InFlight::new(
            item.record.topic.clone(),
            item.enqueued_at,
            self.metrics.clone(),
        );
        let Ok(outcome) = self.pipeline.process(RecordJob::from(item)).await;
        guard.finish();
        outcome
    }
}

// ---------------------------------------------------------------------------
// Drop guards
// ---------------------------------------------------------------------------

/// Keeps the active-worker gauge in step with running workers.
struct ActiveWorker {
    metrics: SharedMetrics,
}

impl ActiveWorker {
    fn enter(metrics: SharedMetrics) -> Self {
        metrics.increment_gauge(metrics::ACTIVE_VERIFICATION_WORKERS, &[], 1.0);
        Self { metrics }
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.metrics
            .decrement_gauge(metrics::ACTIVE_VERIFICATION_WORKERS, &[], 1.0);
    }
}

/// Records a `cancelled` processing error if dropped before `finish`.
struct InFlight {
    topic: String,
    started: Instant,
    metrics: SharedMetrics,
    finished: bool,
}

impl InFlight {
    fn new(topic: String, started: Instant, metrics: SharedMetrics) -> Self {
        Self {
            topic,
            started,
            metrics,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(topic = %self.topic, "Verification cancelled before completion");
        self.metrics.record_histogram(
            metrics::MESSAGE_PROCESSING_DURATION,
            &[(metrics::TOPIC, self.topic.as_str())],
            self.started.elapsed().as_secs_f64(),
        );
        self.metrics.increment_counter(
            metrics::PROCESSING_ERRORS,
            &[
                (metrics::TOPIC, self.topic.as_str()),
                (metrics::ERROR_TYPE, error_type::CANCELLED),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{log_queue, work_queue};
    use crate::test_utils::{InMemoryMetrics, StubGateway, record};
    use serde_json::json;

    struct Harness {
        pool: VerificationWorkerPool,
        work_tx: crate::events::WorkSender,
        state_tx: watch::Sender<ShutdownState>,
        log_rx: crate::events::LogReceiver,
        metrics: Arc<InMemoryMetrics>,
        gateway: Arc<StubGateway>,
    }

    fn harness(workers: usize, capacity: usize, gateway: StubGateway) -> Harness {
        let metrics = Arc::new(InMemoryMetrics::default());
        let gateway = Arc::new(gateway);
        let (log_tx, log_rx) = log_queue();
        let (work_tx, work_rx) = work_queue(capacity);
        let (state_tx, state_rx) = watch::channel(ShutdownState::Running);
        let pipeline = Arc::new(RecordPipeline::new(
            Some(gateway.clone()),
            metrics.clone(),
            log_tx,
        ));
        let pool =
            VerificationWorkerPool::start(workers, pipeline, work_rx, state_rx, metrics.clone());
        Harness {
            pool,
            work_tx,
            state_tx,
            log_rx,
            metrics,
            gateway,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_item_is_processed_once() {
        let mut h = harness(3, 4, StubGateway::new().with_latency(Duration::from_millis(20)));
        for i in 0..10 {
            let item = WorkItem::new(record("trades", &format!("k{i}"), json!({})));
            h.work_tx.send(item).await.unwrap();
        }

        let mut keys = Vec::new();
        for _ in 0..10 {
            keys.push(h.log_rx.recv().await.unwrap().item().key.clone());
        }
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 10);
        assert_eq!(h.gateway.calls(), 10);
        let peak = h.metrics.gauge_peak(metrics::WORK_QUEUE_DEPTH, &[]).unwrap();
        assert!((1.0..=4.0).contains(&peak), "peak depth {peak}");

        h.work_tx.tracker().drained().await;
        assert_eq!(
            h.metrics.gauge(metrics::ACTIVE_VERIFICATION_WORKERS, &[]),
            Some(3.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_stops_taking_new_items() {
        let mut h = harness(1, 8, StubGateway::new().with_latency(Duration::from_millis(50)));
        for i in 0..5 {
            let item = WorkItem::new(record("trades", &format!("k{i}"), json!({})));
            h.work_tx.send(item).await.unwrap();
        }

        // Let the worker pick up the first item and block in the gateway.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.gateway.in_flight(), 1);
        h.state_tx.send(ShutdownState::Draining).unwrap();

        let mut tasks = h.pool.into_tasks();
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        // The item in hand completes, the backlog stays queued.
        assert_eq!(h.gateway.calls(), 1);
        assert!(h.log_rx.recv().await.is_some());
        assert_eq!(h.work_tx.tracker().pending(), 4);
        assert_eq!(
            h.metrics.gauge(metrics::ACTIVE_VERIFICATION_WORKERS, &[]),
            Some(0.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_worker_records_cancellation() {
        let h = harness(1, 2, StubGateway::new().with_latency(Duration::from_secs(60)));
        let item = WorkItem::new(record("trades", "slow", json!({})));
        h.work_tx.send(item).await.unwrap();

        // Let the worker pick the item up and block in the gateway.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.gateway.in_flight(), 1);

        let mut tasks = h.pool.into_tasks();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        assert_eq!(h.work_tx.tracker().pending(), 0);
        assert_eq!(
            h.metrics.counter(
                metrics::PROCESSING_ERRORS,
                &[("topic", "trades"), ("error_type", "cancelled")]
            ),
            1.0
        );
        assert_eq!(
            h.metrics.gauge(metrics::ACTIVE_VERIFICATION_WORKERS, &[]),
            Some(0.0)
        );
    }
}
