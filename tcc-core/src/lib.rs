#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod events;
pub mod gateway;
pub mod metrics;
pub mod processors;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
