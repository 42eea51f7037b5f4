//! Verification gateway.
//!
//! The pipeline talks to the verification agent through
//! [`VerificationGateway`]. [`InstrumentedVerifier`] is the production
//! implementation: it wraps the SDK's [`VerifierClient`] and records request
//! and verification metrics around every call.

use async_trait::async_trait;
use tcc_sdk::client::{ClientError, VERIFY_CREDENTIAL_ENDPOINT, VerifierClient};
use tcc_sdk::objects::VerifyCredentialRequest;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{Payload, VerificationOutcome};
use crate::metrics::{self, SharedMetrics, error_type};

/// Status-code label used when the agent never answered.
const NO_RESPONSE_STATUS: &str = "client_error";
/// Status-code label used when a 2xx body could not be decoded.
const UNREADABLE_BODY_STATUS: &str = "invalid_body";

/// Errors returned by a verification gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The agent could not be reached or the call timed out.
    #[error("verification transport error: {0}")]
    Transport(String),

    /// The agent answered with a non-success status.
    #[error("verification agent returned {status}: {body}")]
    Application { status: u16, body: String },

    /// The agent answered but the body was not a JSON object.
    #[error("malformed verification response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Value recorded as `error_type` on the processing error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => error_type::VERIFICATION_TRANSPORT,
            GatewayError::Application { .. } => error_type::VERIFICATION_API,
            GatewayError::Decode(_) => error_type::VERIFICATION_DECODE,
        }
    }
}

impl From<ClientError> for GatewayError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Api { status, body } => GatewayError::Application {
                status: status.as_u16(),
                body,
            },
            ClientError::Json(e) => GatewayError::Decode(e.to_string()),
            other => GatewayError::Transport(other.to_string()),
        }
    }
}

/// Verifies the credential embedded in a record payload.
#[async_trait]
pub trait VerificationGateway: Send + Sync {
    async fn verify(&self, payload: &Payload) -> Result<VerificationOutcome, GatewayError>;
}

/// [`VerificationGateway`] backed by the verification agent's HTTP API.
pub struct InstrumentedVerifier {
    client: VerifierClient,
    metrics: SharedMetrics,
}

impl InstrumentedVerifier {
    pub fn new(client: VerifierClient, metrics: SharedMetrics) -> Self {
        Self { client, metrics }
    }

    fn record_request(&self, status_code: &str, elapsed: f64) {
        self.metrics.increment_counter(
            metrics::VERAMO_REQUESTS,
            &[
                (metrics::ENDPOINT, VERIFY_CREDENTIAL_ENDPOINT),
                (metrics::STATUS_CODE, status_code),
            ],
        );
        self.metrics.record_histogram(
            metrics::VERAMO_REQUEST_DURATION,
            &[(metrics::ENDPOINT, VERIFY_CREDENTIAL_ENDPOINT)],
            elapsed,
        );
    }

    fn record_verification(&self, result: &str, elapsed: f64) {
        self.metrics
            .record_histogram(metrics::CREDENTIAL_VERIFICATION_DURATION, &[], elapsed);
        self.metrics.increment_counter(
            metrics::CREDENTIAL_VERIFICATION_RESULTS,
            &[(metrics::RESULT, result)],
        );
    }
}

#[async_trait]
impl VerificationGateway for InstrumentedVerifier {
    async fn verify(&self, payload: &Payload) -> Result<VerificationOutcome, GatewayError> {
        let request = VerifyCredentialRequest::from_payload(payload);
        let start = Instant::now();
        let response = self.client.verify_credential(&request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match response {
            Ok(response) => {
                self.record_request(&response.status.to_string(), elapsed);
                let result = if response.result.verified {
                    "verified"
                } else {
                    "failed"
                };
                self.record_verification(result, elapsed);
                debug!(verified = response.result.verified, elapsed, "Credential verified");
                Ok(response.result.into())
            }
            Err(e) => {
                let status_code = match (&e, e.status()) {
                    (_, Some(status)) => status.as_u16().to_string(),
                    (ClientError::Json(_), None) => UNREADABLE_BODY_STATUS.to_string(),
                    _ => NO_RESPONSE_STATUS.to_string(),
                };
                self.record_request(&status_code, elapsed);
                self.record_verification("error", elapsed);
                warn!(error = %e, status_code = %status_code, "Credential verification request failed");
                Err(e.into())
            }
        }
    }
}
