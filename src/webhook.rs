//! Webhook trigger adapter
//!
//! Verifies push-event signatures and extracts the deploy target from the
//! payload. Verification happens before anything reaches the orchestrator;
//! a bad signature never gets further than this module.
//!
//! Signatures are HMAC hex digests over the raw request body, carried as
//! `sha256=<hex>` (preferred) or `sha1=<hex>` (accepted for older senders).
//! Comparison is constant-time via the `hmac` verifier.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{QuayError, QuayResult};

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Verify a signature header against the raw payload.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> QuayResult<()> {
    if secret.is_empty() {
        return Err(QuayError::InvalidSignature(
            "no webhook secret configured".to_string(),
        ));
    }

    let (scheme, hex_digest) = signature
        .split_once('=')
        .ok_or_else(|| QuayError::InvalidSignature("malformed signature header".to_string()))?;
    let digest = hex::decode(hex_digest)
        .map_err(|_| QuayError::InvalidSignature("signature is not hex".to_string()))?;

    let verified = match scheme {
        "sha256" => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(payload);
            mac.verify_slice(&digest).is_ok()
        }
        "sha1" => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(payload);
            mac.verify_slice(&digest).is_ok()
        }
        other => {
            return Err(QuayError::InvalidSignature(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };

    if verified {
        Ok(())
    } else {
        Err(QuayError::InvalidSignature("digest mismatch".to_string()))
    }
}

/// Compute the `sha256=<hex>` signature for a payload.
///
/// Counterpart of [`verify_signature`]; used by tests and by operators
/// wiring up senders that need a known-good reference value.
pub fn sign_sha256(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// The slice of a push event quay cares about
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Fully qualified ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Head commit sha after the push
    #[serde(default)]
    pub after: String,
}

impl PushEvent {
    /// Parse a verified payload.
    pub fn parse(payload: &[u8]) -> QuayResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| QuayError::Remote(format!("unparseable webhook payload: {}", e)))
    }

    /// Branch name, when the ref is a branch ref.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Whether this push targets the configured deploy branch.
    pub fn matches_branch(&self, branch: &str) -> bool {
        self.branch() == Some(branch)
    }
}
