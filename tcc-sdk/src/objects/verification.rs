//! Request and response bodies of `POST /agent/verifyCredential`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the payload member that carries the verifiable credential.
pub const CREDENTIAL_FIELD: &str = "tradeCredential";

/// Body sent to the verification agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyCredentialRequest {
    pub credential: Value,
}

impl VerifyCredentialRequest {
    /// Build a request from a record payload by forwarding its
    /// [`CREDENTIAL_FIELD`] member. A payload without one sends `{}`.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let credential = payload
            .get(CREDENTIAL_FIELD)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Self { credential }
    }
}

/// Verification verdict returned by the agent.
///
/// Only `verified` is interpreted. The full response object is kept in `raw`
/// so callers can log or inspect whatever else the agent reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationResult {
    pub verified: bool,
    pub raw: Map<String, Value>,
}

impl VerificationResult {
    /// Interpret a decoded response body. A missing or non-boolean
    /// `verified` member counts as not verified.
    pub fn from_body(raw: Map<String, Value>) -> Self {
        let verified = raw
            .get("verified")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self { verified, raw }
    }
}
