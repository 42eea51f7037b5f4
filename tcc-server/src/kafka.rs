//! Kafka-backed [`BrokerSource`].
//!
//! Record values are JSON objects and keys are UTF-8 strings. The consumer
//! starts from the latest offset and reports end-of-partition events so the
//! adapter can tell an idle partition from a stalled one.

use async_trait::async_trait;
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;
use serde_json::Value;
use std::time::Duration;
use tcc_core::processors::{AssignmentHook, BrokerError, BrokerRecord, BrokerSource, PollEvent};
use tracing::{info, warn};

use crate::config::KafkaSettings;

/// Forwards partition assignments to the liveness hook.
struct AssignmentContext {
    hook: AssignmentHook,
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let assigned: Vec<(String, i32)> = tpl
                    .elements()
                    .iter()
                    .map(|e| (e.topic().to_string(), e.partition()))
                    .collect();
                self.hook.on_assign(&assigned);
            }
            Rebalance::Revoke(tpl) => {
                info!(partitions_revoked = tpl.count(), "Partitions revoked");
            }
            Rebalance::Error(msg) => {
                warn!(error = %msg, "Rebalance error");
            }
        }
    }
}

pub struct RdKafkaSource {
    client_config: ClientConfig,
    consumer: Option<StreamConsumer<AssignmentContext>>,
    topics: Vec<String>,
}

impl RdKafkaSource {
    pub fn new(settings: &KafkaSettings) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "true");
        Self {
            client_config,
            consumer: None,
            topics: Vec::new(),
        }
    }

    /// Topic to blame for an event the broker did not attribute.
    fn sole_topic(&self) -> Option<String> {
        match self.topics.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl BrokerSource for RdKafkaSource {
    fn subscribe(&mut self, topics: &[String], hook: AssignmentHook) -> Result<(), BrokerError> {
        let consumer: StreamConsumer<AssignmentContext> = self
            .client_config
            .create_with_context(AssignmentContext { hook })
            .map_err(|e| BrokerError::Subscribe(format!("failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        self.topics = topics.to_vec();
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollEvent {
        let sole_topic = self.sole_topic();
        let Some(consumer) = &self.consumer else {
            return PollEvent::Fatal {
                topic: None,
                error: BrokerError::Broker("consumer is not subscribed".to_string()),
            };
        };

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => PollEvent::Empty,
            Ok(Ok(message)) => decode(
                message.topic(),
                message.partition(),
                message.key(),
                message.payload(),
            ),
            Ok(Err(error)) => classify(error, sole_topic),
        }
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!("Kafka consumer closed");
        }
    }
}

fn decode(topic: &str, partition: i32, key: Option<&[u8]>, value: Option<&[u8]>) -> PollEvent {
    let key = key
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();
    let size_bytes = value.map_or(0, <[u8]>::len);

    let payload = match value {
        None => None,
        Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Some(map),
            Ok(Value::Null) => None,
            Ok(_) => {
                return PollEvent::DecodeFailed {
                    topic: topic.to_string(),
                    reason: "value is not a JSON object".to_string(),
                };
            }
            Err(e) => {
                return PollEvent::DecodeFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                };
            }
        },
    };

    PollEvent::Record(BrokerRecord {
        topic: topic.to_string(),
        partition,
        key,
        payload,
        size_bytes,
    })
}

fn classify(error: KafkaError, topic: Option<String>) -> PollEvent {
    if let KafkaError::PartitionEOF(partition) = error {
        return PollEvent::EndOfPartition {
            topic: topic.unwrap_or_else(|| "unknown".to_string()),
            partition,
        };
    }

    let recoverable = matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
        )
    );
    let error = BrokerError::Broker(error.to_string());
    if recoverable {
        PollEvent::Recoverable { topic, error }
    } else {
        PollEvent::Fatal { topic, error }
    }
}
