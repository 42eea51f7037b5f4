use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{into_payload, lock};
use crate::processors::consumer::{BrokerError, BrokerRecord, BrokerSource, PollEvent};
use crate::processors::liveness::AssignmentHook;

/// Scripted [`BrokerSource`]. Events pushed through the paired
/// [`BrokerController`] are returned by `poll` in order; with nothing queued
/// a poll waits out its timeout and reports `Empty`. Every subscribed topic
/// is assigned partition 0 on subscribe.
pub struct ChannelBroker {
    events: mpsc::UnboundedReceiver<PollEvent>,
    closes: Arc<AtomicUsize>,
    subscribed: Arc<Mutex<Vec<String>>>,
}

pub struct BrokerController {
    tx: mpsc::UnboundedSender<PollEvent>,
    closes: Arc<AtomicUsize>,
    subscribed: Arc<Mutex<Vec<String>>>,
}

impl ChannelBroker {
    pub fn new() -> (Self, BrokerController) {
        let (tx, events) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        let subscribed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events,
                closes: closes.clone(),
                subscribed: subscribed.clone(),
            },
            BrokerController {
                tx,
                closes,
                subscribed,
            },
        )
    }
}

impl BrokerController {
    pub fn push(&self, event: PollEvent) {
        let _ = self.tx.send(event);
    }

    /// Queue a record. `null` becomes a null record; any other non-object
    /// value becomes a decode failure.
    pub fn push_record(&self, topic: &str, key: &str, value: Value) {
        let size_bytes = value.to_string().len();
        let payload = match value {
            Value::Null => None,
            other => match into_payload(other) {
                Some(payload) => Some(payload),
                None => {
                    self.push(PollEvent::DecodeFailed {
                        topic: topic.to_string(),
                        reason: "value is not a JSON object".to_string(),
                    });
                    return;
                }
            },
        };
        self.push(PollEvent::Record(BrokerRecord {
            topic: topic.to_string(),
            partition: 0,
            key: key.to_string(),
            payload,
            size_bytes,
        }));
    }

    pub fn push_null(&self, topic: &str, key: &str) {
        self.push_record(topic, key, Value::Null);
    }

    /// Number of times the broker was closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.subscribed).clone()
    }
}

#[async_trait]
impl BrokerSource for ChannelBroker {
    fn subscribe(&mut self, topics: &[String], hook: AssignmentHook) -> Result<(), BrokerError> {
        *lock(&self.subscribed) = topics.to_vec();
        let assignment: Vec<(String, i32)> = topics.iter().map(|t| (t.clone(), 0)).collect();
        hook.on_assign(&assignment);
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollEvent {
        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tokio::time::sleep(timeout).await;
                PollEvent::Empty
            }
            Err(_) => PollEvent::Empty,
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.close();
    }
}
