//! Stream capability tokens.
//!
//! A token grants access to one run's frame stream until it expires:
//! `<expiry unix secs>.<hex HMAC-SHA256(secret, "<run_id>|<expiry>")>`.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use super::StreamError;

type HmacSha256 = Hmac<Sha256>;

/// A minted token.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamToken {
    pub run_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies run-scoped stream tokens.
#[derive(Clone)]
pub struct StreamTokenIssuer {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl std::fmt::Debug for StreamTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTokenIssuer")
            .field("secret", &"[redacted]")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl StreamTokenIssuer {
    /// Empty secret means a random secret for this process only.
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let secret = if secret.is_empty() {
            debug!("No stream token secret configured, using an ephemeral one");
            format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4()).into_bytes()
        } else {
            secret.as_bytes().to_vec()
        };
        Self {
            secret,
            ttl_secs: ttl_secs.max(1),
        }
    }

    pub fn issue(&self, run_id: &str) -> Result<StreamToken, StreamError> {
        self.issue_at(run_id, Utc::now().timestamp())
    }

    pub fn issue_at(&self, run_id: &str, now: i64) -> Result<StreamToken, StreamError> {
        let expiry = now + self.ttl_secs as i64;
        let signature = hex::encode(self.mac(run_id, expiry)?.finalize().into_bytes());

        Ok(StreamToken {
            run_id: run_id.to_string(),
            token: format!("{}.{}", expiry, signature),
            expires_at: Utc
                .timestamp_opt(expiry, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    pub fn verify(&self, run_id: &str, token: &str) -> Result<(), StreamError> {
        self.verify_at(run_id, token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, run_id: &str, token: &str, now: i64) -> Result<(), StreamError> {
        let forbidden = |reason: &str| StreamError::Forbidden(reason.to_string());

        let (expiry, signature) = token
            .split_once('.')
            .ok_or_else(|| forbidden("malformed token"))?;
        let expiry: i64 = expiry.parse().map_err(|_| forbidden("malformed token"))?;
        if expiry <= now {
            return Err(forbidden("token expired"));
        }

        let signature = hex::decode(signature).map_err(|_| forbidden("malformed token"))?;
        self.mac(run_id, expiry)?
            .verify_slice(&signature)
            .map_err(|_| forbidden("token does not match run"))
    }

    fn mac(&self, run_id: &str, expiry: i64) -> Result<HmacSha256, StreamError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StreamError::Forbidden(format!("invalid token secret: {}", e)))?;
        mac.update(run_id.as_bytes());
        mac.update(b"|");
        mac.update(expiry.to_string().as_bytes());
        Ok(mac)
    }
}
