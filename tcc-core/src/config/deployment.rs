//! Deployment-wide labels attached to every metric.

use super::{ConcurrencyMode, PipelineConfig};

const ETHR_DID_PREFIX: &str = "did:ethr";

/// Labels describing how this consumer is deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLabels {
    pub did_provider: String,
    pub ssi_validation: bool,
    /// True when DID caching is configured or implied by an `did:ethr` provider.
    pub cache_did: bool,
    pub processing_mode: ConcurrencyMode,
}

impl DeploymentLabels {
    pub fn resolve(did_provider: impl Into<String>, config: &PipelineConfig) -> Self {
        let did_provider = did_provider.into();
        let cache_did = config.cache_did || did_provider.starts_with(ETHR_DID_PREFIX);
        Self {
            did_provider,
            ssi_validation: config.verification_enabled,
            cache_did,
            processing_mode: config.effective_mode(),
        }
    }

    /// Label pairs in the order they are exported.
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            ("did_provider", self.did_provider.clone()),
            ("ssi_validation", self.ssi_validation.to_string()),
            ("cache_did", self.cache_did.to_string()),
            ("processing_mode", self.processing_mode.as_str().to_string()),
        ]
    }
}

/// Static build and environment information exported once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub version: String,
    pub environment: String,
    pub consumer_group: String,
}

impl ApplicationInfo {
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("version", self.version.as_str()),
            ("environment", self.environment.as_str()),
            ("consumer_group", self.consumer_group.as_str()),
        ]
    }
}
