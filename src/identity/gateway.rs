use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};

use super::Principal;
use crate::error::AppError;

/// Shape of a well-formed token: three base64url segments, each at least two
/// characters. Checked before any network call so obvious garbage is
/// rejected without a round trip.
static TOKEN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,}(\.[A-Za-z0-9_-]{2,}){2}$").unwrap());

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resource-service side of the trust handshake.
///
/// The gateway sends the caller's token to the identity service for
/// signature verification, then decodes the claims of the same token
/// locally. The split is deliberate: the payload is plaintext, so decoding
/// it here avoids a second round trip, and it is safe only because the
/// remote call has already proved the signature authentic.
#[derive(Clone)]
pub struct AuthGateway {
    client: reqwest::Client,
    verify_url: Url,
}

impl AuthGateway {
    pub fn new(identity_base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(identity_base).context("invalid identity service URL")?;
        let verify_url = base.join("/users/login")?;
        let client = reqwest::Client::builder().timeout(VERIFY_TIMEOUT).build()?;
        Ok(Self { client, verify_url })
    }

    /// Resolve the caller's identity from an Authorization header value.
    ///
    /// Every failure is an authorization failure: missing or malformed
    /// tokens, a rejecting identity service, and an unreachable identity
    /// service all deny. An unreachable verifier is never treated as
    /// anonymous access, and the call is not retried: a rejection will not
    /// change, and an outage must surface as an outage.
    pub async fn resolve(&self, bearer: Option<&str>) -> Result<Principal, AppError> {
        let raw = bearer.ok_or_else(|| AppError::auth("missing_token", "missing or bad access token"))?;
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if !TOKEN_SHAPE.is_match(token) {
            return Err(AppError::auth("malformed_token", "missing or bad access token"));
        }

        let resp = self
            .client
            .post(self.verify_url.clone())
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                warn!("identity service verify call failed: {e}");
                AppError::unavailable("auth_unavailable", "authentication could not be completed")
            })?;

        if resp.status() != reqwest::StatusCode::OK {
            debug!(status = %resp.status(), "token rejected by identity service");
            return Err(AppError::auth("token_rejected", "access token verification failed"));
        }

        // Decode the claims of the token we sent, never a payload echoed by
        // the remote side.
        crate::token::decode_claims::<Principal>(token)
            .map_err(|_| AppError::auth("malformed_token", "access token verification failed"))
    }
}
