use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::lock;
use crate::events::{Payload, VerificationOutcome};
use crate::gateway::{GatewayError, VerificationGateway};

/// [`VerificationGateway`] with configurable latency and failure that tracks
/// how many calls overlap.
#[derive(Debug, Default)]
pub struct StubGateway {
    latency: Duration,
    failure: Option<u16>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    payloads: Mutex<Vec<Payload>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer every call with an application error carrying `status`.
    pub fn failing_with(mut self, status: u16) -> Self {
        self.failure = Some(status);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Payloads received, in call order.
    pub fn payloads(&self) -> Vec<Payload> {
        lock(&self.payloads).clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VerificationGateway for StubGateway {
    async fn verify(&self, payload: &Payload) -> Result<VerificationOutcome, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.payloads).push(payload.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(status) = self.failure {
            return Err(GatewayError::Application {
                status,
                body: "stub failure".to_string(),
            });
        }

        let mut raw = Map::new();
        raw.insert("verified".to_string(), Value::Bool(true));
        Ok(VerificationOutcome {
            verified: true,
            raw,
        })
    }
}
