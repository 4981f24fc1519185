//! Client for the external identity service consulted on join.
//!
//! The relay never validates credentials itself: a joining peer
//! presents a userid/token pair, and this client POSTs it to the
//! configured identity-service base URL, trusting its boolean verdict.
//!
//! Grounded on the `reqwest::Client::builder().timeout(..).build()` /
//! `.send().await` / `.json::<T>().await` pattern used for outbound
//! HTTP calls elsewhere in the corpus.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request body posted to the identity service's join-verification
/// endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JoinRequest {
    pub userid: String,
    pub token: String,
}

/// Response body the identity service returns.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinResponse {
    pub valid: bool,
}

/// Errors from the identity-service round trip.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("identity service returned non-success status {0}")]
    Status(reqwest::StatusCode),
}

/// A thin wrapper around a `reqwest::Client` pointed at the identity
/// service's base URL.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    /// Builds a client with the given base URL and per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Posts a join request to `<base_url>/auth/join-token` and returns
    /// whether the identity service accepted it.
    pub async fn verify_join(&self, request: &JoinRequest) -> Result<bool, IdentityError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/auth/join-token");
        let response = self.http.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(IdentityError::Status(response.status()));
        }
        let body: JoinResponse = response.json().await?;
        Ok(body.valid)
    }
}
