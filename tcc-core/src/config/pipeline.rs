//! Pipeline configuration.

use std::fmt;
use std::str::FromStr;

/// Default number of verification workers in pooled mode.
pub const DEFAULT_VERIFICATION_WORKERS: usize = 12;
/// Default capacity of the bounded work queue.
pub const DEFAULT_WORK_QUEUE_CAPACITY: usize = 100;
/// Default number of concurrent calls allowed against the verification agent.
pub const DEFAULT_VERIFICATION_PERMITS: usize = 25;

/// How records are processed once verification is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcurrencyMode {
    /// Records are processed one at a time on the consuming task.
    Serial,
    /// Records are fanned out to a pool of verification workers.
    Parallel,
}

impl ConcurrencyMode {
    /// Label value used in metrics and the processing summary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Serial => "sync",
            ConcurrencyMode::Parallel => "async",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = PipelineConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "serial" => Ok(ConcurrencyMode::Serial),
            "async" | "parallel" => Ok(ConcurrencyMode::Parallel),
            other => Err(PipelineConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Processing path chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Each record is processed to completion before the next poll.
    Inline,
    /// Records go through the bounded work queue to the worker pool.
    Queued,
}

impl fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStrategy::Inline => f.write_str("inline processing"),
            ProcessingStrategy::Queued => f.write_str("queued processing"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineConfigError {
    #[error("unknown processing mode '{0}', expected 'sync' or 'async'")]
    UnknownMode(String),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Validated pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Whether each record's credential is sent to the verification agent.
    pub verification_enabled: bool,
    /// Requested concurrency mode. Only honoured when verification is enabled.
    pub concurrency_mode: ConcurrencyMode,
    /// Number of verification workers (W).
    pub worker_count: usize,
    /// Capacity of the work queue (C).
    pub queue_capacity: usize,
    /// Concurrent verification calls allowed (P).
    pub verification_permits: usize,
    /// Whether the agent is expected to cache resolved DIDs.
    pub cache_did: bool,
}

impl PipelineConfig {
    pub fn new(verification_enabled: bool, concurrency_mode: ConcurrencyMode) -> Self {
        Self {
            verification_enabled,
            concurrency_mode,
            worker_count: DEFAULT_VERIFICATION_WORKERS,
            queue_capacity: DEFAULT_WORK_QUEUE_CAPACITY,
            verification_permits: DEFAULT_VERIFICATION_PERMITS,
            cache_did: false,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_verification_permits(mut self, verification_permits: usize) -> Self {
        self.verification_permits = verification_permits;
        self
    }

    pub fn with_cache_did(mut self, cache_did: bool) -> Self {
        self.cache_did = cache_did;
        self
    }

    /// Reject sizes that would stall the pipeline.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.worker_count == 0 {
            return Err(PipelineConfigError::Zero("verification worker count"));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineConfigError::Zero("work queue capacity"));
        }
        if self.verification_permits == 0 {
            return Err(PipelineConfigError::Zero("verification permits"));
        }
        Ok(())
    }

    /// The mode actually in effect. Parallel processing without verification
    /// has nothing to parallelise, so it collapses to serial.
    pub fn effective_mode(&self) -> ConcurrencyMode {
        if self.verification_enabled {
            self.concurrency_mode
        } else {
            ConcurrencyMode::Serial
        }
    }

    pub fn strategy(&self) -> ProcessingStrategy {
        match self.effective_mode() {
            ConcurrencyMode::Parallel => ProcessingStrategy::Queued,
            ConcurrencyMode::Serial => ProcessingStrategy::Inline,
        }
    }
}
