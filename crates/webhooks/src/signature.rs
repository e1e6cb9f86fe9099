//! Inbound webhook signature verification.
//!
//! The verification provider signs each callback with
//! `hex(sha256(body || secret))` and sends it in the `x-vai-signature`
//! header. This is the provider's documented scheme — a plain digest over
//! the concatenation, not an HMAC.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{WebhookError, WebhookResult};

/// Outcome of a signature check that allows processing to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Secret configured, signature present and matching.
    Verified,
    /// Secret configured but no signature header was sent. Processing
    /// proceeds; this soft-fail is part of the provider contract and is
    /// logged as a warning.
    MissingSignature,
    /// No secret configured; nothing was verified.
    Unverified,
}

/// Verifies inbound webhook signatures against the shared secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        if secret.is_none() {
            tracing::warn!(
                "VERIFICATION_WEBHOOK_SECRET not configured - inbound webhooks will not be verified"
            );
        }
        Self { secret }
    }

    /// Check a presented signature against the raw request body.
    ///
    /// Returns `Err(WebhookError::InvalidSignature)` only for a configured
    /// secret with a present-but-mismatched signature. The two soft paths
    /// (missing signature, no secret) return `Ok` and log a warning.
    pub fn verify(&self, body: &[u8], presented: Option<&str>) -> WebhookResult<SignatureCheck> {
        let secret = match &self.secret {
            Some(s) => s,
            None => {
                tracing::warn!("Accepting unverified webhook (no secret configured)");
                return Ok(SignatureCheck::Unverified);
            }
        };

        let presented = match presented {
            Some(sig) if !sig.is_empty() => sig,
            _ => {
                tracing::warn!(
                    "Webhook received without signature header - processing anyway (unsafe)"
                );
                return Ok(SignatureCheck::MissingSignature);
            }
        };

        let expected = compute_signature(body, secret);

        // Constant-time comparison over the hex strings
        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(SignatureCheck::Verified)
        } else {
            tracing::error!(
                body_len = body.len(),
                presented_len = presented.len(),
                "Webhook signature mismatch"
            );
            Err(WebhookError::InvalidSignature)
        }
    }
}

/// `hex(sha256(body || secret))` — the provider's signing scheme.
pub fn compute_signature(body: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn valid_signature_accepted() {
        let verifier = SignatureVerifier::new(Some(SECRET.to_string()));
        let body = br#"{"event_type":"user.vai_revoked"}"#;
        let sig = compute_signature(body, SECRET);

        let check = verifier.verify(body, Some(&sig)).unwrap();
        assert_eq!(check, SignatureCheck::Verified);
    }

    #[test]
    fn mismatched_signature_rejected() {
        let verifier = SignatureVerifier::new(Some(SECRET.to_string()));
        let body = b"payload";
        let mut sig = compute_signature(body, SECRET);

        // Flip the last hex digit
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });

        assert!(matches!(
            verifier.verify(body, Some(&sig)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn signature_over_wrong_body_rejected() {
        let verifier = SignatureVerifier::new(Some(SECRET.to_string()));
        let sig = compute_signature(b"original body", SECRET);

        assert!(matches!(
            verifier.verify(b"tampered body", Some(&sig)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn missing_signature_soft_fails_when_secret_configured() {
        let verifier = SignatureVerifier::new(Some(SECRET.to_string()));

        let check = verifier.verify(b"payload", None).unwrap();
        assert_eq!(check, SignatureCheck::MissingSignature);

        let check = verifier.verify(b"payload", Some("")).unwrap();
        assert_eq!(check, SignatureCheck::MissingSignature);
    }

    #[test]
    fn no_secret_accepts_anything() {
        let verifier = SignatureVerifier::new(None);

        let check = verifier.verify(b"payload", Some("garbage")).unwrap();
        assert_eq!(check, SignatureCheck::Unverified);
    }

    #[test]
    fn empty_secret_treated_as_unconfigured() {
        let verifier = SignatureVerifier::new(Some(String::new()));

        let check = verifier.verify(b"payload", Some("garbage")).unwrap();
        assert_eq!(check, SignatureCheck::Unverified);
    }

    #[test]
    fn signature_is_hex_sha256_of_body_and_secret() {
        // sha256("bodysecret") — digest over the concatenation, no separator
        let sig = compute_signature(b"body", "secret");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, compute_signature(b"bodysecret", ""));
    }
}
