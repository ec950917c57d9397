use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// OAuth state parameters older than this are rejected on callback.
pub const STATE_MAX_AGE_SECS: i64 = 600;

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, AppError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {e}")))
}

/// HMAC signing for the OAuth `state` parameter.
pub struct StateSigner {
    hmac_key: Vec<u8>,
}

impl StateSigner {
    /// Create a signer from a base64-encoded 32-byte key.
    pub fn new(secret_b64: &str) -> Result<Self, AppError> {
        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| AppError::Internal(format!("Invalid STATE_SECRET base64: {e}")))?;

        if hmac_key.len() != 32 {
            return Err(AppError::Internal(format!(
                "STATE_SECRET must be 32 bytes, got {}",
                hmac_key.len()
            )));
        }

        Ok(Self { hmac_key })
    }

    /// Sign a state parameter with HMAC-SHA256. Returns base64(hmac || payload).
    pub fn sign_state(&self, payload: &str) -> Result<String, AppError> {
        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify and extract a signed state parameter.
    pub fn verify_state(&self, signed: &str) -> Result<String, AppError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| AppError::InvalidState)?;

        if combined.len() < 32 {
            return Err(AppError::InvalidState);
        }

        let (signature, payload_bytes) = combined.split_at(32);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature)
            .map_err(|_| AppError::InvalidState)?;

        String::from_utf8(payload_bytes.to_vec()).map_err(|_| AppError::InvalidState)
    }

    /// Issue a state parameter stamped with `now`.
    pub fn issue(&self, now: DateTime<Utc>) -> Result<String, AppError> {
        self.sign_state(&format!("slack:{}", now.timestamp()))
    }

    /// Check a state parameter from the OAuth callback: valid signature, and
    /// issued no more than [`STATE_MAX_AGE_SECS`] before `now`.
    pub fn check(&self, signed: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let payload = self.verify_state(signed)?;
        let issued_at: i64 = payload
            .strip_prefix("slack:")
            .and_then(|ts| ts.parse().ok())
            .ok_or(AppError::InvalidState)?;

        let age = now.timestamp() - issued_at;
        if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
            return Err(AppError::BadRequest("OAuth session expired".into()));
        }

        Ok(())
    }
}
