//! SDK for the credential verification agent used by the trade credential consumer.
//!
//! `objects` holds the request/response bodies of the agent's HTTP API.
//! `client` (behind the `client` feature) is a typed `reqwest` client for it.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

#[cfg(feature = "client")]
pub mod client;
pub mod objects;
