//! Configuration types for the trade credential consumer.
//!
//! These types represent the validated runtime configuration handed to the
//! pipeline at startup. They are immutable once built. Loading and parsing
//! (TOML file, environment, command line) is handled by the server crate.

mod deployment;
mod pipeline;

pub use deployment::{ApplicationInfo, DeploymentLabels};
pub use pipeline::{
    ConcurrencyMode, DEFAULT_VERIFICATION_PERMITS, DEFAULT_VERIFICATION_WORKERS,
    DEFAULT_WORK_QUEUE_CAPACITY, PipelineConfig, PipelineConfigError, ProcessingStrategy,
};
