//! Configuration module for tcc-server.
//!
//! Handles loading configuration from an optional TOML file overlaid by
//! CLI arguments and environment variables. The result is resolved once at
//! startup and never changes afterwards.

pub mod file;

use crate::config::file::{DEFAULT_ENVIRONMENT, DEFAULT_GROUP_ID, FileConfig};
use clap::ArgAction;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tcc_core::config::{
    ApplicationInfo, ConcurrencyMode, DeploymentLabels, PipelineConfig, PipelineConfigError,
};
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid pipeline settings: {0}")]
    Pipeline(#[from] PipelineConfigError),

    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid boolean value: {0}")]
    InvalidFlag(String),
}

/// Settings that can be given on the command line or through the
/// environment. Each one overrides the matching config file value.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct Overrides {
    #[arg(long, env = "BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: Option<String>,

    /// Comma-separated topic list.
    #[arg(long = "topics", env = "KAFKA_TOPICS", value_delimiter = ',')]
    pub topics: Vec<String>,

    /// Single topic used when no topic list is configured.
    #[arg(long, env = "KAFKA_TOPIC_FINNHUB_TRADE")]
    pub finnhub_trade_topic: Option<String>,

    #[arg(long, env = "KAFKA_GROUP_ID")]
    pub group_id: Option<String>,

    #[arg(long, env = "VERAMO_API_URL")]
    pub veramo_api_url: Option<Url>,

    #[arg(long, env = "VERAMO_API_TOKEN", hide_env_values = true)]
    pub veramo_api_token: Option<String>,

    #[arg(long, env = "DID_PROVIDER")]
    pub did_provider: Option<String>,

    #[arg(long, env = "SSI_VALIDATION", action = ArgAction::Set, value_parser = parse_flag)]
    pub ssi_validation: Option<bool>,

    #[arg(long, env = "CACHE_DID", action = ArgAction::Set, value_parser = parse_flag)]
    pub cache_did: Option<bool>,

    /// `sync` or `async`.
    #[arg(long, env = "PROCESSING_MODE")]
    pub processing_mode: Option<String>,

    #[arg(long, env = "VERIFICATION_WORKERS")]
    pub verification_workers: Option<usize>,

    #[arg(long, env = "WORK_QUEUE_CAPACITY")]
    pub work_queue_capacity: Option<usize>,

    #[arg(long, env = "VERIFICATION_PERMITS")]
    pub verification_permits: Option<usize>,

    #[arg(long, env = "METRICS_LISTEN")]
    pub metrics_listen: Option<SocketAddr>,

    #[arg(long, env = "HEALTH_LISTEN")]
    pub health_listen: Option<SocketAddr>,

    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,
}

/// Parse a boolean the way the deployment environment writes them.
pub fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" => Ok(true),
        "0" | "f" | "false" | "no" | "n" => Ok(false),
        _ => Err(ConfigError::InvalidFlag(value.to_string())),
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub topics: Vec<String>,
    pub group_id: String,
}

/// Verification agent endpoint.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub url: Url,
    pub token: String,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub pipeline: PipelineConfig,
    pub labels: DeploymentLabels,
    pub info: ApplicationInfo,
    pub kafka: KafkaSettings,
    /// Present whenever an agent URL is configured.
    pub verifier: Option<VerifierSettings>,
    pub metrics_listen: SocketAddr,
    pub health_listen: SocketAddr,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    overrides: Overrides,
}

impl ConfigLoader {
    pub fn new(config_path: Option<impl AsRef<Path>>, overrides: Overrides) -> Self {
        Self {
            config_path: config_path.map(|p| p.as_ref().to_path_buf()),
            overrides,
        }
    }

    /// Read the TOML file if one was given, apply overrides and validate.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let file_config = match &self.config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => FileConfig::default(),
        };
        resolve(file_config, self.overrides.clone())
    }
}

fn resolve(file: FileConfig, overrides: Overrides) -> Result<LoadedConfig, ConfigError> {
    let FileConfig {
        environment,
        kafka,
        verification,
        pipeline,
        server,
    } = file;

    let topics = first_non_empty(vec![
        clean_topics(overrides.topics),
        clean_topics(kafka.topics),
        clean_topics(overrides.finnhub_trade_topic.into_iter().collect()),
    ]);
    let bootstrap_servers = overrides
        .bootstrap_servers
        .or(kafka.bootstrap_servers)
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::Missing("BOOTSTRAP_SERVERS"))?;
    let group_id = overrides
        .group_id
        .or(kafka.group_id)
        .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string());

    let verification_enabled = overrides.ssi_validation.unwrap_or(verification.enabled);
    let mode: ConcurrencyMode = overrides
        .processing_mode
        .unwrap_or(pipeline.processing_mode)
        .parse()?;

    let pipeline_config = PipelineConfig::new(verification_enabled, mode)
        .with_worker_count(overrides.verification_workers.unwrap_or(pipeline.workers))
        .with_queue_capacity(
            overrides
                .work_queue_capacity
                .unwrap_or(pipeline.queue_capacity),
        )
        .with_verification_permits(overrides.verification_permits.unwrap_or(pipeline.permits))
        .with_cache_did(overrides.cache_did.unwrap_or(verification.cache_did));
    pipeline_config.validate()?;

    if topics.is_empty() {
        return Err(ConfigError::Missing("KAFKA_TOPICS"));
    }

    let verifier = overrides
        .veramo_api_url
        .or(verification.api_url)
        .map(|url| VerifierSettings {
            url,
            token: overrides
                .veramo_api_token
                .or(verification.api_token)
                .unwrap_or_default(),
        });
    if verification_enabled && verifier.is_none() {
        return Err(ConfigError::Missing("VERAMO_API_URL"));
    }

    let did_provider = overrides.did_provider.unwrap_or(verification.did_provider);
    let labels = DeploymentLabels::resolve(did_provider, &pipeline_config);
    let info = ApplicationInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: overrides
            .environment
            .or(environment)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        consumer_group: group_id.clone(),
    };

    Ok(LoadedConfig {
        pipeline: pipeline_config,
        labels,
        info,
        kafka: KafkaSettings {
            bootstrap_servers,
            topics,
            group_id,
        },
        verifier,
        metrics_listen: overrides.metrics_listen.unwrap_or(server.metrics_listen),
        health_listen: overrides.health_listen.unwrap_or(server.health_listen),
    })
}

fn clean_topics(topics: Vec<String>) -> Vec<String> {
    topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn first_non_empty(candidates: Vec<Vec<String>>) -> Vec<String> {
    candidates
        .into_iter()
        .find(|topics| !topics.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcc_core::metrics::{APPLICATION_INFO, MetricsCollector};
    use tcc_core::test_utils::InMemoryMetrics;

    fn base() -> FileConfig {
        toml::from_str(
            r#"
[kafka]
bootstrap_servers = "broker:29092"
topics = ["finnhub_trade"]

[verification]
api_url = "http://veramo:3332"
api_token = "secret"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_flag() {
        for truthy in ["1", "t", "TRUE", "yes", "Y"] {
            assert!(parse_flag(truthy).unwrap(), "{truthy}");
        }
        for falsy in ["0", "f", "False", "no", "n"] {
            assert!(!parse_flag(falsy).unwrap(), "{falsy}");
        }
        assert!(matches!(parse_flag("maybe"), Err(ConfigError::InvalidFlag(_))));
    }

    #[test]
    fn test_defaults_from_file() {
        let loaded = resolve(base(), Overrides::default()).unwrap();
        assert!(loaded.pipeline.verification_enabled);
        assert_eq!(loaded.pipeline.effective_mode(), ConcurrencyMode::Serial);
        assert_eq!(loaded.kafka.group_id, DEFAULT_GROUP_ID);
        assert_eq!(loaded.labels.did_provider, "did:key");
        assert!(!loaded.labels.cache_did);
        assert_eq!(loaded.info.environment, "production");
        assert_eq!(loaded.verifier.unwrap().token, "secret");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = Overrides {
            topics: vec!["a".into(), " b ".into(), "".into()],
            processing_mode: Some("async".into()),
            verification_workers: Some(4),
            did_provider: Some("did:ethr:sepolia".into()),
            environment: Some("staging".into()),
            ..Overrides::default()
        };
        let loaded = resolve(base(), overrides).unwrap();
        assert_eq!(loaded.kafka.topics, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(loaded.pipeline.effective_mode(), ConcurrencyMode::Parallel);
        assert_eq!(loaded.pipeline.worker_count, 4);
        assert!(loaded.labels.cache_did);
        assert_eq!(loaded.info.environment, "staging");
    }

    #[test]
    fn test_falls_back_to_finnhub_topic() {
        let mut file = base();
        file.kafka.topics.clear();
        let overrides = Overrides {
            finnhub_trade_topic: Some("finnhub_trade".into()),
            ..Overrides::default()
        };
        let loaded = resolve(file, overrides).unwrap();
        assert_eq!(loaded.kafka.topics, vec!["finnhub_trade".to_string()]);
    }

    #[test]
    fn test_missing_topics_rejected() {
        let mut file = base();
        file.kafka.topics.clear();
        let err = resolve(file, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("KAFKA_TOPICS")));
    }

    #[test]
    fn test_validation_requires_agent_url() {
        let mut file = base();
        file.verification.api_url = None;
        let err = resolve(file.clone(), Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VERAMO_API_URL")));

        let overrides = Overrides {
            ssi_validation: Some(false),
            processing_mode: Some("async".into()),
            ..Overrides::default()
        };
        let loaded = resolve(file, overrides).unwrap();
        assert!(loaded.verifier.is_none());
        assert_eq!(loaded.pipeline.effective_mode(), ConcurrencyMode::Serial);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = Overrides {
            verification_workers: Some(0),
            ..Overrides::default()
        };
        let err = resolve(base(), overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Pipeline(_)));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let overrides = Overrides {
            processing_mode: Some("turbo".into()),
            ..Overrides::default()
        };
        let err = resolve(base(), overrides).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Pipeline(PipelineConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_application_info_is_recorded_as_labels() {
        let overrides = Overrides {
            environment: Some("staging".into()),
            group_id: Some("trades".into()),
            ..Overrides::default()
        };
        let loaded = resolve(base(), overrides).unwrap();

        let metrics = InMemoryMetrics::default();
        metrics.record_info(APPLICATION_INFO, &loaded.info.pairs());
        let info = metrics.info(APPLICATION_INFO).unwrap();
        assert!(info.contains(&("environment".to_string(), "staging".to_string())));
        assert!(info.contains(&("consumer_group".to_string(), "trades".to_string())));
        assert!(info.contains(&(
            "version".to_string(),
            env!("CARGO_PKG_VERSION").to_string()
        )));
    }
}
