//! Types flowing through the pipeline.
//!
//! A record enters as [`Consumed`], is processed either inline or as a
//! [`WorkItem`] on the work queue, and leaves as a [`ProcessingSummary`]
//! on the log queue.

use std::time::Duration;

use serde_json::{Map, Value};
use tcc_sdk::objects::VerificationResult;
use time::OffsetDateTime;
use tokio::time::Instant;

/// Decoded JSON payload of a record.
pub type Payload = Map<String, Value>;

/// A decoded record handed out by the consumer adapter.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub topic: String,
    /// Record key, empty when the record has none.
    pub key: String,
    pub payload: Payload,
    /// Wall-clock time the record was received.
    pub received_at: OffsetDateTime,
}

/// What one poll of the consumer produced.
#[derive(Debug, Clone)]
pub enum Consumed {
    Record(InboundRecord),
    /// The record carried no value.
    NullRecord { topic: String, key: String },
}

/// A record waiting on the work queue.
#[derive(Debug)]
pub struct WorkItem {
    pub record: InboundRecord,
    /// Processing duration is measured from this instant.
    pub enqueued_at: Instant,
}

impl WorkItem {
    pub fn new(record: InboundRecord) -> Self {
        Self {
            record,
            enqueued_at: Instant::now(),
        }
    }
}

/// Verdict of the verification agent, or the default (not verified) when
/// verification is disabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub raw: Payload,
}

impl From<VerificationResult> for VerificationOutcome {
    fn from(result: VerificationResult) -> Self {
        Self {
            verified: result.verified,
            raw: result.raw,
        }
    }
}

/// Result of processing one record, emitted to the telemetry sink.
#[derive(Debug, Clone)]
pub struct ProcessingSummary {
    pub topic: String,
    pub key: String,
    pub trade_event_id: String,
    pub subject_id: String,
    pub outcome: VerificationOutcome,
    pub processing_duration: Duration,
    pub verification_duration: Duration,
    /// Seconds from the producer's origination timestamp to now.
    pub end_to_end_latency: Option<f64>,
}
