//! RecordPipeline processor.
//!
//! Runs the per-record steps shared by the inline path and the verification
//! workers:
//! - Restore the credential's `@context`
//! - Verify the credential when verification is enabled, holding a permit in
//!   pooled mode
//! - Extract the trade event id and credential subject
//! - Compute end-to-end latency and record the processing histograms
//! - Push a [`ProcessingSummary`] onto the log queue
//!
//! Failures come back as [`RecordOutcome::Failed`] after being recorded as a
//! processing error. They never propagate out of the processor.

use std::convert::Infallible;
use std::sync::Arc;

use kanau::processor::Processor;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::events::{
    InboundRecord, LogSender, Payload, ProcessingSummary, VerificationOutcome, WorkItem,
};
use crate::gateway::{GatewayError, VerificationGateway};
use crate::metrics::{self, SharedMetrics, error_type};
use crate::utils::latency::end_to_end_latency;
use crate::utils::payload::{denormalize, subject_id, trade_event_id};

/// A record to process and the instant its processing duration starts from.
#[derive(Debug)]
pub struct RecordJob {
    pub record: InboundRecord,
    pub started: Instant,
}

impl RecordJob {
    pub fn new(record: InboundRecord) -> Self {
        Self {
            record,
            started: Instant::now(),
        }
    }
}

impl From<WorkItem> for RecordJob {
    fn from(item: WorkItem) -> Self {
        Self {
            record: item.record,
            started: item.enqueued_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A summary was emitted.
    Processed,
    /// Nothing to process.
    Skipped { reason: &'static str },
    /// Recorded as a processing error of this `error_type`.
    Failed { kind: &'static str },
}

/// Running counts of [`RecordOutcome`]s, reported when a processing loop
/// stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeTally {
    pub fn add(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Processed => self.processed += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Verification(#[from] GatewayError),

    #[error("verification permit unavailable")]
    PermitUnavailable,

    #[error("log queue closed")]
    LogQueueClosed,
}

impl RecordError {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Verification(e) => e.kind(),
            RecordError::PermitUnavailable => error_type::PERMIT_UNAVAILABLE,
            RecordError::LogQueueClosed => error_type::LOG_QUEUE_CLOSED,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordPipeline
// ---------------------------------------------------------------------------

/// Shared per-record processor. One instance serves every worker.
pub struct RecordPipeline {
    /// `None` when verification is disabled.
    gateway: Option<Arc<dyn VerificationGateway>>,
    /// Only set in pooled mode.
    permits: Option<Arc<Semaphore>>,
    metrics: SharedMetrics,
    log_tx: LogSender,
}

impl RecordPipeline {
    pub fn new(
        gateway: Option<Arc<dyn VerificationGateway>>,
        metrics: SharedMetrics,
        log_tx: LogSender,
    ) -> Self {
        Self {
            gateway,
            permits: None,
            metrics,
            log_tx,
        }
    }

    /// Bound concurrent verification calls by `permits`.
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    pub fn verification_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    // -- Private helpers ----------------------------------------------------

    async fn run_steps(&self, job: RecordJob) -> Result<(), RecordError> {
        let RecordJob { record, started } = job;
        let InboundRecord {
            topic,
            key,
            payload,
            received_at,
        } = record;
        debug!(
            topic = %topic,
            key = %key,
            since_received = %(OffsetDateTime::now_utc() - received_at),
            "Processing record"
        );

        let payload = denormalize(payload);

        let verify_start = Instant::now();
        let outcome = match &self.gateway {
            Some(gateway) => self.verify(gateway.as_ref(), &payload).await?,
            None => VerificationOutcome::default(),
        };
        let verification_duration = verify_start.elapsed();

        let trade_event_id = trade_event_id(&payload);
        let subject_id = subject_id(&payload, self.verification_enabled());

        let end_to_end_latency = end_to_end_latency(&payload, OffsetDateTime::now_utc());
        match end_to_end_latency {
            Some(latency) => {
                self.metrics
                    .record_histogram(metrics::END_TO_END_LATENCY, &[], latency);
            }
            None => warn!(
                topic = %topic,
                trade_event_id = %trade_event_id,
                "No start_timestamp found, skipping end-to-end latency"
            ),
        }

        let processing_duration = started.elapsed();
        self.metrics.record_histogram(
            metrics::MESSAGE_PROCESSING_DURATION,
            &[(metrics::TOPIC, topic.as_str())],
            processing_duration.as_secs_f64(),
        );

        self.log_tx
            .send(ProcessingSummary {
                topic,
                key,
                trade_event_id,
                subject_id,
                outcome,
                processing_duration,
                verification_duration,
                end_to_end_latency,
            })
            .map_err(|_| RecordError::LogQueueClosed)
    }

    async fn verify(
        &self,
        gateway: &dyn VerificationGateway,
        payload: &Payload,
    ) -> Result<VerificationOutcome, RecordError> {
        // Held for the duration of the call only.
        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|_| RecordError::PermitUnavailable)?,
            ),
            None => None,
        };
        Ok(gateway.verify(payload).await?)
    }

    fn record_failure(&self, topic: &str, started: Instant, e: &RecordError) {
        self.metrics.record_histogram(
            metrics::MESSAGE_PROCESSING_DURATION,
            &[(metrics::TOPIC, topic)],
            started.elapsed().as_secs_f64(),
        );
        self.metrics.increment_counter(
            metrics::PROCESSING_ERRORS,
            &[(metrics::TOPIC, topic), (metrics::ERROR_TYPE, e.kind())],
        );
        error!(topic = %topic, error = %e, "Error processing message");
    }
}

// ---------------------------------------------------------------------------
// Processor trait implementation
// ---------------------------------------------------------------------------

impl Processor<RecordJob> for RecordPipeline {
    type Output = RecordOutcome;
    type Error = Infallible;

    async fn process(&self, job: RecordJob) -> Result<RecordOutcome, Infallible> {
        let topic = job.record.topic.clone();
        let started = job.started;
        match self.run_steps(job).await {
            Ok(()) => Ok(RecordOutcome::Processed),
            Err(e) => {
                self.record_failure(&topic, started, &e);
                Ok(RecordOutcome::Failed { kind: e.kind() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::log_queue;
    use crate::test_utils::{InMemoryMetrics, StubGateway, record};
    use serde_json::json;
    use std::time::Duration;

    fn pipeline(
        gateway: Option<Arc<dyn VerificationGateway>>,
    ) -> (RecordPipeline, crate::events::LogReceiver, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::default());
        let (log_tx, log_rx) = log_queue();
        (RecordPipeline::new(gateway, metrics.clone(), log_tx), log_rx, metrics)
    }

    #[tokio::test]
    async fn test_disabled_verification_emits_default_outcome() {
        let (pipeline, mut log_rx, metrics) = pipeline(None);
        let job = RecordJob::new(record(
            "trades",
            "k1",
            json!({
                "trade_event_id": "evt-1",
                "tradeCredential": {"credentialSubject": {"id": "did:key:z6Mk"}}
            }),
        ));

        let outcome = pipeline.process(job).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Processed);

        let summary = log_rx.recv().await.unwrap();
        let summary = summary.item();
        assert_eq!(summary.trade_event_id, "evt-1");
        assert_eq!(summary.subject_id, "None");
        assert!(!summary.outcome.verified);
        assert!(summary.end_to_end_latency.is_none());
        assert_eq!(
            metrics
                .histogram(metrics::MESSAGE_PROCESSING_DURATION)
                .len(),
            1
        );
        assert!(metrics.histogram(metrics::END_TO_END_LATENCY).is_empty());
    }

    #[tokio::test]
    async fn test_verification_sends_denormalized_credential() {
        let gateway = Arc::new(StubGateway::new());
        let (pipeline, mut log_rx, metrics) = pipeline(Some(gateway.clone()));
        let job = RecordJob::new(record(
            "trades",
            "k1",
            json!({
                "trade_event_id": "evt-2",
                "start_timestamp": "2020-01-01T00:00:00Z",
                "tradeCredential": {
                    "context": ["https://www.w3.org/2018/credentials/v1"],
                    "credentialSubject": {"id": "did:key:z6MkTrader"}
                }
            }),
        ));

        assert_eq!(pipeline.process(job).await.unwrap(), RecordOutcome::Processed);

        let seen = gateway.payloads();
        assert_eq!(seen.len(), 1);
        assert!(seen[0]["tradeCredential"].get("@context").is_some());

        let summary = log_rx.recv().await.unwrap();
        assert!(summary.item().outcome.verified);
        assert_eq!(summary.item().subject_id, "did:key:z6MkTrader");
        assert!(summary.item().end_to_end_latency.unwrap() > 0.0);
        assert_eq!(metrics.histogram(metrics::END_TO_END_LATENCY).len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_recorded() {
        let gateway = Arc::new(StubGateway::new().failing_with(503));
        let (pipeline, mut log_rx, metrics) = pipeline(Some(gateway));

        let outcome = pipeline
            .process(RecordJob::new(record("trades", "k1", json!({}))))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::Failed {
                kind: "verification_api_error"
            }
        );
        assert_eq!(
            metrics.counter(
                metrics::PROCESSING_ERRORS,
                &[("topic", "trades"), ("error_type", "verification_api_error")]
            ),
            1.0
        );
        assert_eq!(
            metrics
                .histogram(metrics::MESSAGE_PROCESSING_DURATION)
                .len(),
            1
        );
        drop(pipeline);
        assert!(log_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_semaphore_is_permit_unavailable() {
        let gateway = Arc::new(StubGateway::new());
        let permits = Arc::new(Semaphore::new(1));
        permits.close();
        let (pipeline, _log_rx, _) = pipeline(Some(gateway.clone()));
        let pipeline = pipeline.with_permits(permits);

        let outcome = pipeline
            .process(RecordJob::new(record("trades", "k1", json!({}))))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Failed {
                kind: "permit_unavailable"
            }
        );
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permits_bound_concurrent_calls() {
        let gateway = Arc::new(StubGateway::new().with_latency(Duration::from_millis(100)));
        let (pipeline, _log_rx, _) = pipeline(Some(gateway.clone()));
        let pipeline = Arc::new(pipeline.with_permits(Arc::new(Semaphore::new(2))));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..6 {
            let pipeline = pipeline.clone();
            tasks.spawn(async move {
                pipeline
                    .process(RecordJob::new(record("trades", &format!("k{i}"), json!({}))))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), RecordOutcome::Processed);
        }

        assert_eq!(gateway.calls(), 6);
        assert_eq!(gateway.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_closed_log_queue_is_a_failure() {
        let metrics = Arc::new(InMemoryMetrics::default());
        let (log_tx, log_rx) = log_queue();
        drop(log_rx);
        let pipeline = RecordPipeline::new(None, metrics.clone(), log_tx);

        let outcome = pipeline
            .process(RecordJob::new(record("trades", "k1", json!({}))))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Failed {
                kind: "log_queue_closed"
            }
        );
    }

    #[test]
    fn test_tally_counts_each_outcome() {
        let mut tally = OutcomeTally::default();
        tally.add(RecordOutcome::Processed);
        tally.add(RecordOutcome::Processed);
        tally.add(RecordOutcome::Skipped {
            reason: "null record",
        });
        tally.add(RecordOutcome::Failed {
            kind: "verification_api_error",
        });
        assert_eq!(
            tally,
            OutcomeTally {
                processed: 2,
                skipped: 1,
                failed: 1,
            }
        );
    }
}
