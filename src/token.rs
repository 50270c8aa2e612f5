//!
//! slink token codec
//! -----------------
//! Builds and verifies the compact three-segment signed credential exchanged
//! between the services: `base64url(header).base64url(claims).base64url(mac)`
//! with no `=` padding. The header is fixed to `{"alg":"HS256","typ":"JWT"}`
//! and the MAC is HMAC-SHA256 over `header_segment "." claims_segment` under
//! a process-wide secret injected at construction.
//!
//! The payload is signed, not encrypted: anyone may decode the claims, only
//! the key holder can produce a signature that verifies.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use anyhow::{bail, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token must have exactly three segments")]
    SegmentCount,
    #[error("token segment is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Signs and verifies bearer tokens under one secret.
///
/// The secret is fixed for the lifetime of the codec; tests construct one
/// codec per key. Cloning shares no mutable state.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenCodec {
    // Never expose key material, not even in debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec over the given signing secret.
    /// An empty secret is a configuration error and is rejected here so that
    /// services fail at startup rather than signing unverifiable tokens.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            bail!("signing secret must not be empty");
        }
        Ok(Self { secret: secret.to_vec() })
    }

    fn mac_over(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts keys of any length");
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }

    /// Serialize the claims and produce a signed token.
    /// Deterministic for a given claims value: the header is a fixed literal
    /// and serde_json orders object keys stably.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        let header = serde_json::to_vec(&serde_json::json!({"alg": "HS256", "typ": "JWT"}))?;
        let payload = serde_json::to_vec(claims)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mac = self.mac_over(signing_input.as_bytes());
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(mac)))
    }

    /// Check a presented token's signature.
    ///
    /// Returns false for anything that is not exactly three base64url
    /// segments, for undecodable segments, and for MAC mismatches. Never
    /// panics on malformed input. The final comparison is constant-time.
    pub fn verify(&self, token: &str) -> bool {
        let parts: Vec<&str> = token.split('.').collect();
        let &[header, payload, signature] = parts.as_slice() else {
            return false;
        };
        // Both content segments must decode; a token whose header or payload
        // is not base64url is malformed regardless of its MAC.
        if URL_SAFE_NO_PAD.decode(header).is_err() || URL_SAFE_NO_PAD.decode(payload).is_err() {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        // Recompute over the original segments as transmitted, not over a
        // re-serialization of the decoded JSON.
        let expected = self.mac_over(format!("{}.{}", header, payload).as_bytes());
        expected.as_slice().ct_eq(presented.as_slice()).into()
    }
}

/// Decode a token's claims segment without checking the signature.
///
/// Verification is the identity service's job; the resource service calls
/// this only after that service has accepted the same token string.
pub fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::SegmentCount);
    }
    let bytes = URL_SAFE_NO_PAD.decode(parts[1])?;
    Ok(serde_json::from_slice(&bytes)?)
}
