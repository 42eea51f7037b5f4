//! Consumer adapter.
//!
//! Wraps a [`BrokerSource`] and turns its poll events into a sequence of
//! [`Consumed`] values. Alongside it keeps the per-topic liveness table,
//! publishes consumer lag while idle and converts per-topic message counts
//! into a messages-per-second gauge every [`THROUGHPUT_WINDOW`].
//!
//! The broker connection is closed, and the active-consumer gauge
//! decremented, exactly once: on a fatal error, on [`ConsumerAdapter::close`]
//! or when the adapter is dropped.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::liveness::AssignmentHook;
use crate::events::{Consumed, InboundRecord, Payload};
use crate::metrics::{self, SharedMetrics, error_type};

/// How long one poll waits for a record.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Interval over which message counts are turned into a rate.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(10);

/// Topic label used when the broker does not say which topic failed.
const UNKNOWN_TOPIC: &str = "unknown";

/// A record as delivered by the broker, value already decoded.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub key: String,
    /// `None` when the record carried no value.
    pub payload: Option<Payload>,
    /// Size of the raw value in bytes.
    pub size_bytes: usize,
}

/// Outcome of one poll.
#[derive(Debug)]
pub enum PollEvent {
    Record(BrokerRecord),
    /// Nothing arrived within the timeout.
    Empty,
    EndOfPartition { topic: String, partition: i32 },
    /// A record arrived but its value could not be decoded. Not retried.
    DecodeFailed { topic: String, reason: String },
    /// A transient broker error. Polling continues.
    Recoverable {
        topic: Option<String>,
        error: BrokerError,
    },
    /// A broker error the consumer cannot recover from.
    Fatal {
        topic: Option<String>,
        error: BrokerError,
    },
}

/// Error reported by a [`BrokerSource`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("broker error: {0}")]
    Broker(String),
}

/// Broker contract the adapter polls.
#[async_trait]
pub trait BrokerSource: Send {
    /// Subscribe to `topics`. The source must call `hook.on_assign` on every
    /// partition assignment, before the assignment completes.
    fn subscribe(&mut self, topics: &[String], hook: AssignmentHook) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next event.
    async fn poll(&mut self, timeout: Duration) -> PollEvent;

    /// Leave the group and release the connection.
    fn close(&mut self);
}

/// Errors that stop the adapter.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("no topics to subscribe to")]
    NoTopics,

    #[error(transparent)]
    Subscribe(BrokerError),

    #[error("fatal broker error on topic {topic}: {error}")]
    Fatal { topic: String, error: BrokerError },
}

// ---------------------------------------------------------------------------
// ConsumerAdapter
// ---------------------------------------------------------------------------

/// Polls a [`BrokerSource`] and keeps the consumer-side metrics: message
/// counts and sizes, throughput, per-topic lag and the active-consumer gauge.
pub struct ConsumerAdapter<B: BrokerSource> {
    source: Option<B>,
    topics: Vec<String>,
    metrics: SharedMetrics,
    last_message: HashMap<String, Instant>,
    message_counts: HashMap<String, u64>,
    window_start: Instant,
}

impl<B: BrokerSource> ConsumerAdapter<B> {
    /// Subscribe `source` to `topics` and take ownership of it.
    pub fn subscribe(
        mut source: B,
        topics: Vec<String>,
        hook: AssignmentHook,
        metrics: SharedMetrics,
    ) -> Result<Self, ConsumerError> {
        if topics.is_empty() {
            return Err(ConsumerError::NoTopics);
        }

        info!(?topics, "Subscribing to topics");
        if let Err(e) = source.subscribe(&topics, hook) {
            source.close();
            return Err(ConsumerError::Subscribe(e));
        }
        metrics.increment_gauge(metrics::ACTIVE_CONSUMERS, &[], 1.0);

        let message_counts = topics.iter().map(|t| (t.clone(), 0)).collect();
        Ok(Self {
            source: Some(source),
            topics,
            metrics,
            last_message: HashMap::new(),
            message_counts,
            window_start: Instant::now(),
        })
    }

    /// Poll until the next record or null record.
    ///
    /// Returns `Ok(None)` once the adapter has been closed and `Err` on a
    /// fatal broker error, after closing.
    pub async fn next(&mut self) -> Result<Option<Consumed>, ConsumerError> {
        loop {
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };

            match source.poll(POLL_TIMEOUT).await {
                PollEvent::Record(record) => return Ok(Some(self.accept(record))),
                PollEvent::Empty => self.publish_lag(),
                PollEvent::EndOfPartition { topic, partition } => {
                    info!(topic = %topic, partition, "Reached end of partition");
                }
                PollEvent::DecodeFailed { topic, reason } => {
                    error!(topic = %topic, reason = %reason, "Failed to decode message");
                    self.metrics.increment_counter(
                        metrics::DESERIALIZATION_ERRORS,
                        &[(metrics::TOPIC, topic.as_str())],
                    );
                }
                PollEvent::Recoverable { topic, error } => {
                    let topic = topic.unwrap_or_else(|| UNKNOWN_TOPIC.to_string());
                    error!(topic = %topic, error = %error, "Error while polling");
                    self.record_error(&topic, error_type::POLLING_ERROR);
                }
                PollEvent::Fatal { topic, error } => {
                    let topic = topic.unwrap_or_else(|| UNKNOWN_TOPIC.to_string());
                    error!(topic = %topic, error = %error, "Fatal Kafka error");
                    self.record_error(&topic, error_type::KAFKA_ERROR);
                    self.close();
                    return Err(ConsumerError::Fatal { topic, error });
                }
            }
        }
    }

    /// Close the broker connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            info!("Closing Kafka consumer");
            source.close();
            self.metrics
                .decrement_gauge(metrics::ACTIVE_CONSUMERS, &[], 1.0);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// When the last record from `topic` arrived.
    pub fn last_message_at(&self, topic: &str) -> Option<Instant> {
        self.last_message.get(topic).copied()
    }

    // -- Private helpers ----------------------------------------------------

    fn accept(&mut self, record: BrokerRecord) -> Consumed {
        let now = Instant::now();
        let BrokerRecord {
            topic,
            partition,
            key,
            payload,
            size_bytes,
        } = record;

        self.last_message.insert(topic.clone(), now);
        *self.message_counts.entry(topic.clone()).or_default() += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed >= THROUGHPUT_WINDOW {
            self.publish_throughput(elapsed);
            self.window_start = now;
        }

        match payload {
            Some(payload) => {
                self.metrics.record_histogram(
                    metrics::MESSAGE_SIZE,
                    &[(metrics::TOPIC, topic.as_str())],
                    size_bytes as f64,
                );
                self.metrics.increment_counter(
                    metrics::MESSAGES_CONSUMED,
                    &[(metrics::TOPIC, topic.as_str()), (metrics::STATUS, "success")],
                );
                debug!(topic = %topic, partition, key = %key, "Received message");
                Consumed::Record(InboundRecord {
                    topic,
                    key,
                    payload,
                    received_at: OffsetDateTime::now_utc(),
                })
            }
            None => {
                self.metrics.increment_counter(
                    metrics::MESSAGES_CONSUMED,
                    &[(metrics::TOPIC, topic.as_str()), (metrics::STATUS, "null_record")],
                );
                debug!(topic = %topic, partition, key = %key, "Received null record");
                Consumed::NullRecord { topic, key }
            }
        }
    }

    fn publish_throughput(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        for (topic, count) in self.message_counts.iter_mut() {
            let rate = *count as f64 / secs;
            self.metrics
                .set_gauge(metrics::MESSAGES_PER_SECOND, &[(metrics::TOPIC, topic.as_str())], rate);
            *count = 0;
        }
    }

    fn publish_lag(&self) {
        let now = Instant::now();
        for topic in &self.topics {
            if let Some(last) = self.last_message.get(topic) {
                let lag = now.duration_since(*last).as_secs_f64();
                self.metrics
                    .set_gauge(metrics::CONSUMER_LAG, &[(metrics::TOPIC, topic.as_str())], lag);
            }
        }
    }

    fn record_error(&self, topic: &str, kind: &'static str) {
        self.metrics.increment_counter(
            metrics::PROCESSING_ERRORS,
            &[(metrics::TOPIC, topic), (metrics::ERROR_TYPE, kind)],
        );
    }
}

impl<B: BrokerSource> Drop for ConsumerAdapter<B> {
    fn drop(&mut self) {
        self.close();
    }
}
