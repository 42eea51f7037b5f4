//! Verification agent client.
//!
//! Requests carry a bearer token and are sent over a pooled, keep-alive
//! `reqwest::Client`, so concurrent workers reuse connections to the agent.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};
use url::Url;

use super::ClientError;
use crate::objects::{VerificationResult, VerifyCredentialRequest};

/// Path of the credential verification endpoint, relative to the agent base URL.
pub const VERIFY_CREDENTIAL_ENDPOINT: &str = "/agent/verifyCredential";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_MAX_IDLE_PER_HOST: usize = 25;

/// A successful verification call together with the HTTP status it returned.
#[derive(Debug, Clone)]
pub struct VerifyCredentialResponse {
    pub status: u16,
    pub result: VerificationResult,
}

/// Typed HTTP client for the verification agent.
#[derive(Debug, Clone)]
pub struct VerifierClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl VerifierClient {
    /// Create a new `VerifierClient`.
    ///
    /// * `base_url` – root URL of the agent (e.g. `http://veramo:3332`).
    /// * `token` – API token sent as `Authorization: Bearer …`.
    pub fn new(base_url: Url, token: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    /// The agent base URL this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /agent/verifyCredential` – ask the agent to verify a credential.
    pub async fn verify_credential(
        &self,
        request: &VerifyCredentialRequest,
    ) -> Result<VerifyCredentialResponse, ClientError> {
        let url = endpoint_url(&self.base_url, VERIFY_CREDENTIAL_ENDPOINT)?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json; charset=utf-8")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }

        let bytes = resp.bytes().await?;
        let body: Map<String, Value> = serde_json::from_slice(&bytes)?;
        Ok(VerifyCredentialResponse {
            status: status.as_u16(),
            result: VerificationResult::from_body(body),
        })
    }
}

/// Append `endpoint` to the base URL path instead of replacing it, so agents
/// mounted under a prefix (`http://host/veramo`) keep their prefix.
fn endpoint_url(base_url: &Url, endpoint: &str) -> Result<Url, url::ParseError> {
    let base = base_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{endpoint}"))
}
