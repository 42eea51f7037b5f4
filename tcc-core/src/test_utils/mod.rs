//! In-memory doubles for the pipeline's seams.
//!
//! Enabled for this crate's own tests and, through the `test-utils` feature,
//! for downstream crates.

mod broker;
mod gateway;
mod metrics;
mod writer;

pub use broker::{BrokerController, ChannelBroker};
pub use gateway::StubGateway;
pub use metrics::InMemoryMetrics;
pub use writer::CollectingWriter;

use serde_json::Value;
use time::OffsetDateTime;

use crate::events::{InboundRecord, Payload};

/// Build an inbound record. Non-object payloads become an empty object.
pub fn record(topic: &str, key: &str, payload: Value) -> InboundRecord {
    InboundRecord {
        topic: topic.to_string(),
        key: key.to_string(),
        payload: into_payload(payload).unwrap_or_default(),
        received_at: OffsetDateTime::now_utc(),
    }
}

fn into_payload(value: Value) -> Option<Payload> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
