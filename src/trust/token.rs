//! Signed trust tokens.
//!
//! Format: `v1.<nonce>.<issued_ms>.<mac>`. The MAC is HMAC-SHA256 over the first
//! three fields plus the subject, so a token only vouches for the account it was
//! issued to.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac, digest::KeyInit};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

use super::trust_duration;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const NONCE_LEN: usize = 32;
pub const MIN_SECRET_LEN: usize = 32;
const MAX_CLOCK_SKEW: TimeDelta = TimeDelta::minutes(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("trust secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,
    #[error("failed to generate trust token nonce")]
    Randomness,
    #[error("malformed trust token")]
    Malformed,
    #[error("trust token signature mismatch")]
    BadSignature,
    #[error("trust token expired")]
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustClaims {
    pub issued_at: DateTime<Utc>,
}

/// Server-side key that signs and verifies trust tokens.
#[derive(Clone)]
pub struct TrustKey {
    mac: HmacSha256,
}

impl fmt::Debug for TrustKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustKey").field("mac", &"***").finish()
    }
}

impl TrustKey {
    /// # Errors
    /// Returns [`TokenError::WeakSecret`] when the secret is shorter than 32 bytes.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }
        let mac =
            <HmacSha256 as KeyInit>::new_from_slice(bytes).map_err(|_| TokenError::WeakSecret)?;
        Ok(Self { mac })
    }

    /// Issue a token for `subject` granted at `issued_at`.
    ///
    /// # Errors
    /// Returns [`TokenError::Randomness`] if the OS RNG fails.
    pub fn issue(&self, subject: &str, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| TokenError::Randomness)?;
        let payload = format!(
            "{TOKEN_VERSION}.{}.{}",
            URL_SAFE_NO_PAD.encode(nonce),
            issued_at.timestamp_millis()
        );
        let mac = self.sign(&payload, subject).finalize().into_bytes();
        let signature = URL_SAFE_NO_PAD.encode(mac);
        Ok(format!("{payload}.{signature}"))
    }

    /// Check the signature, subject binding, and validity window of `token`.
    ///
    /// # Errors
    /// Returns a [`TokenError`] describing why the token cannot be trusted.
    pub fn verify(
        &self,
        token: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<TrustClaims, TokenError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let mut fields = payload.split('.');
        let (Some(version), Some(nonce), Some(issued_ms), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(TokenError::Malformed);
        };
        if version != TOKEN_VERSION || nonce.is_empty() {
            return Err(TokenError::Malformed);
        }
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        self.sign(payload, subject)
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let issued_at = issued_ms
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(TokenError::Malformed)?;
        if issued_at > now + MAX_CLOCK_SKEW {
            return Err(TokenError::Malformed);
        }
        if now - issued_at > trust_duration() {
            return Err(TokenError::Expired);
        }
        Ok(TrustClaims { issued_at })
    }

    fn sign(&self, payload: &str, subject: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.update(b".");
        mac.update(subject.as_bytes());
        mac
    }
}
