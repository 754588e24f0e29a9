//! Stripe webhook signature verification.
//!
//! Stripe signs `"<timestamp>.<raw body>"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<timestamp>,v1=<hex digest>[,v1=...]`. The raw bytes
//! are verified before any JSON parsing happens.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::stripe_events::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("missing Stripe-Signature header")]
    MissingSignature,
    #[error("malformed Stripe-Signature header: {0}")]
    MalformedHeader(String),
    #[error("timestamp {timestamp} outside the {tolerance_secs}s tolerance window")]
    TimestampOutOfTolerance { timestamp: i64, tolerance_secs: i64 },
    #[error("no signature matched the expected signature")]
    SignatureMismatch,
    #[error("payload is not a valid event: {0}")]
    MalformedPayload(String),
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify the signature and parse the body into a typed event
    pub fn construct_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, VerificationError> {
        self.verify(payload, signature, chrono::Utc::now().timestamp())?;
        WebhookEvent::from_slice(payload)
            .map_err(|e| VerificationError::MalformedPayload(e.to_string()))
    }

    /// Verify `payload` against the header as of `now` (unix seconds)
    pub fn verify(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<(), VerificationError> {
        if self.secret.is_empty() {
            return Err(VerificationError::MissingSecret);
        }
        let header = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(VerificationError::MissingSignature)?;

        let (timestamp, signatures) = parse_header(header)?;

        let tolerance = u64::try_from(self.tolerance_secs).unwrap_or(0);
        if now.abs_diff(timestamp) > tolerance {
            return Err(VerificationError::TimestampOutOfTolerance {
                timestamp,
                tolerance_secs: self.tolerance_secs,
            });
        }

        for candidate in signatures {
            // Undecodable entries can't match; keep looking.
            let Ok(candidate) = hex::decode(candidate) else {
                continue;
            };
            if self.mac(timestamp, payload).verify_slice(&candidate).is_ok() {
                return Ok(());
            }
        }

        Err(VerificationError::SignatureMismatch)
    }

    /// Produce a header value for `payload` signed at `timestamp`
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let digest = self.mac(timestamp, payload).finalize().into_bytes();
        format!("t={},v1={}", timestamp, hex::encode(digest))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), VerificationError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    VerificationError::MalformedHeader(format!("invalid timestamp '{value}'"))
                })?);
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| VerificationError::MalformedHeader("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(VerificationError::MalformedHeader(
            "no v1 signatures".to_string(),
        ));
    }
    Ok((timestamp, signatures))
}
