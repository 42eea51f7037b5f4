//! Dispatcher.
//!
//! Owns one pipeline run: subscribes the consumer adapter, starts the
//! telemetry sink, then feeds records either straight through the
//! [`RecordPipeline`] or onto the bounded work queue for the verification
//! workers. When the stream ends, fails or an external shutdown is requested,
//! the adapter is closed first and the [`ShutdownCoordinator`] drains the rest.

use std::sync::Arc;

use kanau::processor::Processor;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use super::consumer::{BrokerSource, ConsumerAdapter, ConsumerError};
use super::liveness::{AssignmentHook, LivenessSignal};
use super::record_pipeline::{OutcomeTally, RecordJob, RecordOutcome, RecordPipeline};
use super::shutdown::{ShutdownCoordinator, ShutdownParts, WorkQueueParts};
use super::telemetry_sink::{SummaryContext, SummaryWriter, TelemetrySink, TracingWriter};
use super::verification_worker::VerificationWorkerPool;
use crate::config::{DeploymentLabels, PipelineConfig, PipelineConfigError, ProcessingStrategy};
use crate::events::{
    Consumed, InboundRecord, QueueClosed, WorkItem, WorkReceiver, WorkSender, log_queue,
    work_queue,
};
use crate::gateway::VerificationGateway;
use crate::metrics::{self, SharedMetrics, error_type};

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Nothing to subscribe to
    #[error("no topics configured")]
    NoTopics,

    /// Pipeline settings failed validation
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] PipelineConfigError),

    /// Subscription failed or the broker reported a fatal error
    #[error(transparent)]
    Broker(#[from] ConsumerError),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// One pipeline run over a broker source.
pub struct Dispatcher<B: BrokerSource, W: SummaryWriter = TracingWriter> {
    config: PipelineConfig,
    source: B,
    gateway: Option<Arc<dyn VerificationGateway>>,
    liveness: Arc<dyn LivenessSignal>,
    metrics: SharedMetrics,
    writer: W,
    context: SummaryContext,
    coordinator: ShutdownCoordinator,
}

impl<B: BrokerSource> Dispatcher<B, TracingWriter> {
    /// Create a Dispatcher that writes summaries through `tracing`.
    ///
    /// # Arguments
    ///
    /// * `config` - Pipeline settings, validated when the run starts
    /// * `labels` - Deployment labels rendered into every summary
    /// * `source` - Broker connection, subscribed when the run starts
    /// * `gateway` - Verification agent, ignored when verification is disabled
    /// * `liveness` - Marked live on the first partition assignment
    pub fn new(
        config: PipelineConfig,
        labels: &DeploymentLabels,
        source: B,
        gateway: Option<Arc<dyn VerificationGateway>>,
        liveness: Arc<dyn LivenessSignal>,
        metrics: SharedMetrics,
    ) -> Self {
        let coordinator = ShutdownCoordinator::new(metrics.clone());
        Self {
            config,
            source,
            gateway,
            liveness,
            metrics,
            writer: TracingWriter,
            context: SummaryContext::from(labels),
            coordinator,
        }
    }
}

impl<B: BrokerSource, W: SummaryWriter> Dispatcher<B, W> {
    /// Send rendered summaries to `writer` instead of `tracing`.
    pub fn with_writer<W2: SummaryWriter>(self, writer: W2) -> Dispatcher<B, W2> {
        Dispatcher {
            config: self.config,
            source: self.source,
            gateway: self.gateway,
            liveness: self.liveness,
            metrics: self.metrics,
            writer,
            context: self.context,
            coordinator: self.coordinator,
        }
    }

    /// Consume `topics` until the stream ends, a fatal broker error occurs or
    /// `shutdown_rx` turns true. Shutdown always completes before this returns.
    ///
    /// Invalid settings and an empty topic list are rejected before anything
    /// is started.
    pub async fn run(
        self,
        topics: Vec<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), DispatchError> {
        self.config.validate()?;
        if topics.is_empty() {
            return Err(DispatchError::NoTopics);
        }

        let Self {
            config,
            source,
            gateway,
            liveness,
            metrics,
            writer,
            context,
            coordinator,
        } = self;

        let strategy = config.strategy();
        info!(
            ssi_validation = config.verification_enabled,
            processing_mode = %config.effective_mode(),
            "Using {strategy}"
        );

        let (log_tx, log_rx) = log_queue();
        let log_tracker = log_tx.tracker();
        let sink = TelemetrySink::new(
            log_rx,
            coordinator.subscribe(),
            writer,
            context,
            metrics.clone(),
        );
        let sink = tokio::spawn(sink.run());

        let gateway = gateway.filter(|_| config.verification_enabled);
        let mut pipeline = RecordPipeline::new(gateway, metrics.clone(), log_tx);
        if strategy == ProcessingStrategy::Queued {
            pipeline = pipeline.with_permits(Arc::new(Semaphore::new(config.verification_permits)));
        }
        let pipeline = Arc::new(pipeline);

        let hook = AssignmentHook::new(liveness);
        let mut work = None;
        let result = match ConsumerAdapter::subscribe(source, topics, hook, metrics.clone()) {
            Ok(mut adapter) => {
                let result = match strategy {
                    ProcessingStrategy::Inline => {
                        run_inline(&mut adapter, &pipeline, &mut shutdown_rx).await
                    }
                    ProcessingStrategy::Queued => {
                        let (work_tx, work_rx) = work_queue(config.queue_capacity);
                        let mut intake = QueuedIntake {
                            config: &config,
                            pipeline: &pipeline,
                            coordinator: &coordinator,
                            metrics: &metrics,
                            work_tx,
                            work_rx,
                            pool: None,
                            enqueued: 0,
                            tally: OutcomeTally::default(),
                        };
                        let result = intake.run(&mut adapter, &mut shutdown_rx).await;
                        work = Some(intake.into_parts());
                        result
                    }
                };
                adapter.close();
                result
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            error!(error = %e, "Pipeline stopped with an error");
        }

        drop(pipeline);
        coordinator
            .shutdown(ShutdownParts {
                work,
                log_tracker,
                sink,
            })
            .await;

        result
    }
}

// ---------------------------------------------------------------------------
// Intake loops
// ---------------------------------------------------------------------------

async fn run_inline<B: BrokerSource>(
    adapter: &mut ConsumerAdapter<B>,
    pipeline: &RecordPipeline,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), DispatchError> {
    let mut tally = OutcomeTally::default();
    let result = loop {
        let consumed = tokio::select! {
            biased;

            _ = shutdown_requested(shutdown_rx) => {
                info!("Received shutdown signal");
                break Ok(());
            }

            consumed = adapter.next() => match consumed {
                Ok(consumed) => consumed,
                Err(e) => break Err(DispatchError::from(e)),
            },
        };

        match consumed {
            Some(Consumed::Record(record)) => {
                let Ok(outcome) = pipeline.process(RecordJob::new(record)).await;
                tally.add(outcome);
                tokio::task::yield_now().await;
            }
            Some(Consumed::NullRecord { topic, key }) => {
                tally.add(discard_null(&topic, &key));
            }
            None => break Ok(()),
        }
    };

    info!(
        processed = tally.processed,
        skipped = tally.skipped,
        failed = tally.failed,
        "Inline intake stopped"
    );
    result
}

/// Feeds the work queue and starts the worker pool on the first record.
struct QueuedIntake<'a> {
    config: &'a PipelineConfig,
    pipeline: &'a Arc<RecordPipeline>,
    coordinator: &'a ShutdownCoordinator,
    metrics: &'a SharedMetrics,
    work_tx: WorkSender,
    work_rx: WorkReceiver,
    pool: Option<VerificationWorkerPool>,
    enqueued: usize,
    /// Outcomes decided at intake. Queued records are tallied by the workers.
    tally: OutcomeTally,
}

impl QueuedIntake<'_> {
    async fn run<B: BrokerSource>(
        &mut self,
        adapter: &mut ConsumerAdapter<B>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), DispatchError> {
        loop {
            let consumed = tokio::select! {
                biased;

                _ = shutdown_requested(shutdown_rx) => {
                    info!("Received shutdown signal");
                    return Ok(());
                }

                consumed = adapter.next() => consumed?,
            };

            match consumed {
                Some(Consumed::Record(record)) => {
                    if !self.enqueue(record, shutdown_rx).await {
                        return Ok(());
                    }
                }
                Some(Consumed::NullRecord { topic, key }) => {
                    self.tally.add(discard_null(&topic, &key));
                }
                None => return Ok(()),
            }
        }
    }

    /// Push `record` onto the work queue, waiting for space. Returns `false`
    /// when the intake should stop.
    async fn enqueue(
        &mut self,
        record: InboundRecord,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        if self.pool.is_none() {
            self.pool = Some(VerificationWorkerPool::start(
                self.config.worker_count,
                self.pipeline.clone(),
                self.work_rx.clone(),
                self.coordinator.subscribe(),
                self.metrics.clone(),
            ));
        }

        let topic = record.topic.clone();
        tokio::select! {
            biased;

            sent = self.work_tx.send(WorkItem::new(record)) => match sent {
                Ok(()) => {
                    self.enqueued += 1;
                    true
                }
                Err(QueueClosed(_)) => {
                    warn!(topic = %topic, "Work queue closed, dropping record");
                    self.record_error(&topic, error_type::WORK_QUEUE_CLOSED);
                    false
                }
            },

            _ = shutdown_requested(shutdown_rx) => {
                info!("Received shutdown signal while waiting for queue space");
                self.record_error(&topic, error_type::SHUTDOWN_ABANDONED);
                false
            }
        }
    }

    fn record_error(&self, topic: &str, kind: &'static str) {
        self.metrics.increment_counter(
            metrics::PROCESSING_ERRORS,
            &[(metrics::TOPIC, topic), (metrics::ERROR_TYPE, kind)],
        );
    }

    fn into_parts(self) -> WorkQueueParts {
        info!(
            enqueued = self.enqueued,
            skipped = self.tally.skipped,
            "Queued intake stopped"
        );
        WorkQueueParts {
            pool: self.pool,
            work_tx: self.work_tx,
            work_rx: self.work_rx,
        }
    }
}

fn discard_null(topic: &str, key: &str) -> RecordOutcome {
    let reason = "null record";
    debug!(topic = %topic, key = %key, reason, "Discarding record");
    RecordOutcome::Skipped { reason }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
