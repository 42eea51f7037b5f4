//! TOML file configuration structures.
//!
//! Every section and field is optional; missing values take the same
//! defaults as the matching environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tcc_core::config::{
    DEFAULT_VERIFICATION_PERMITS, DEFAULT_VERIFICATION_WORKERS, DEFAULT_WORK_QUEUE_CAPACITY,
};
use url::Url;

pub const DEFAULT_GROUP_ID: &str = "malmike.kafka_consumer.avro.consumer.2";
pub const DEFAULT_DID_PROVIDER: &str = "did:key";
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub environment: Option<String>,
    pub kafka: KafkaConfig,
    pub verification: VerificationConfig,
    pub pipeline: PipelineSection,
    pub server: ServerConfig,
}

/// Broker connection and subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub bootstrap_servers: Option<String>,
    pub topics: Vec<String>,
    pub group_id: Option<String>,
}

/// Verification agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub api_url: Option<Url>,
    pub api_token: Option<String>,
    pub did_provider: String,
    pub cache_did: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: None,
            api_token: None,
            did_provider: DEFAULT_DID_PROVIDER.to_string(),
            cache_did: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// `sync` or `async`.
    pub processing_mode: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub permits: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            processing_mode: "sync".to_string(),
            workers: DEFAULT_VERIFICATION_WORKERS,
            queue_capacity: DEFAULT_WORK_QUEUE_CAPACITY,
            permits: DEFAULT_VERIFICATION_PERMITS,
        }
    }
}

/// Listener addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub metrics_listen: SocketAddr,
    pub health_listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_listen: SocketAddr::from(([0, 0, 0, 0], 9001)),
            health_listen: SocketAddr::from(([0, 0, 0, 0], 3338)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
environment = "staging"

[kafka]
bootstrap_servers = "broker:29092"
topics = ["finnhub_trade", "health_sensor"]
group_id = "trades"

[verification]
enabled = true
api_url = "http://veramo:3332"
api_token = "token"
did_provider = "did:ethr"

[pipeline]
processing_mode = "async"
workers = 4
queue_capacity = 8
permits = 2

[server]
metrics_listen = "127.0.0.1:9100"
health_listen = "127.0.0.1:3000"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert_eq!(config.kafka.topics.len(), 2);
        assert_eq!(config.verification.did_provider, "did:ethr");
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.server.health_listen.port(), 3000);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.verification.enabled);
        assert!(!config.verification.cache_did);
        assert_eq!(config.verification.did_provider, DEFAULT_DID_PROVIDER);
        assert_eq!(config.pipeline.processing_mode, "sync");
        assert_eq!(config.pipeline.workers, 12);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(config.pipeline.permits, 25);
        assert_eq!(config.server.metrics_listen.port(), 9001);
        assert_eq!(config.server.health_listen.port(), 3338);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: FileConfig = toml::from_str("[pipeline]\nworkers = 3\n").unwrap();
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.pipeline.permits, 25);
    }
}
