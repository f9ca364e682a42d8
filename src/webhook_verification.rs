//! # Webhook Signature Verification
//!
//! Calendly signs every delivery with `Calendly-Webhook-Signature: t=<unix>,v1=<hex>`,
//! where `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the subscription's
//! signing key. Verification compares in constant time and rejects timestamps outside the
//! tolerance window to stop replays.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const CALENDLY_SIGNATURE_HEADER: &str = "calendly-webhook-signature";

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Timestamp too old: {seconds}s old, max allowed: {max_seconds}s")]
    TimestampTooOld { seconds: u64, max_seconds: u64 },

    #[error("Timestamp too far in future: {seconds}s in future, max allowed: {max_seconds}s")]
    TimestampTooFuture { seconds: u64, max_seconds: u64 },
}

impl VerificationError {
    /// A missing header is a malformed request; everything else is a forged or stale one.
    pub fn is_missing_signature(&self) -> bool {
        matches!(self, VerificationError::MissingSignature { .. })
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Parsed `t=...,v1=...` header. Unknown keys are ignored; several `v1` entries are allowed
/// while a signing key is rotated.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: u64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> VerificationResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<u64>().map_err(|_| {
                    VerificationError::InvalidSignatureFormat {
                        reason: "t must be a unix timestamp".to_string(),
                    }
                })?)
            }
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| VerificationError::InvalidSignatureFormat {
        reason: "missing t".to_string(),
    })?;
    if signatures.is_empty() {
        return Err(VerificationError::InvalidSignatureFormat {
            reason: "missing v1".to_string(),
        });
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_signature(signing_key: &str, timestamp: u64, body: &[u8]) -> Vec<u8> {
    // HMAC accepts any key length; an empty MAC never matches.
    let mut mac = match HmacSha256::new_from_slice(signing_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Produces a header value in Calendly's format. Used to sign test deliveries.
pub fn sign_calendly_payload(signing_key: &str, timestamp: u64, body: &[u8]) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(compute_signature(signing_key, timestamp, body))
    )
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Verifies a Calendly delivery against the raw body it arrived with.
pub fn verify_calendly_signature(
    body: &[u8],
    signature_header: Option<&str>,
    signing_key: &str,
    tolerance_seconds: u64,
) -> VerificationResult<()> {
    verify_calendly_signature_at(body, signature_header, signing_key, tolerance_seconds, unix_now())
}

fn verify_calendly_signature_at(
    body: &[u8],
    signature_header: Option<&str>,
    signing_key: &str,
    tolerance_seconds: u64,
    now: u64,
) -> VerificationResult<()> {
    debug!(
        body_size = body.len(),
        tolerance_seconds, "Starting Calendly signature verification"
    );

    let header = signature_header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| VerificationError::MissingSignature {
            header: "Calendly-Webhook-Signature".to_string(),
        })?;

    let parsed = parse_signature_header(header)?;

    let time_diff = now.abs_diff(parsed.timestamp);
    if time_diff > tolerance_seconds {
        return Err(if now > parsed.timestamp {
            VerificationError::TimestampTooOld {
                seconds: time_diff,
                max_seconds: tolerance_seconds,
            }
        } else {
            VerificationError::TimestampTooFuture {
                seconds: time_diff,
                max_seconds: tolerance_seconds,
            }
        });
    }

    let expected = compute_signature(signing_key, parsed.timestamp, body);
    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|provided| {
                bool::from(subtle::ConstantTimeEq::ct_eq(expected.as_slice(), provided.as_slice()))
            })
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "whsec_test_key";
    const NOW: u64 = 1_760_000_000;

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"event":"invitee.created"}"#;
        let header = sign_calendly_payload(KEY, NOW, body);

        assert!(verify_calendly_signature_at(body, Some(&header), KEY, 180, NOW + 10).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_calendly_payload(KEY, NOW, b"original");

        let result = verify_calendly_signature_at(b"tampered", Some(&header), KEY, 180, NOW);
        assert!(matches!(result, Err(VerificationError::VerificationFailed)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let header = sign_calendly_payload("other", NOW, b"body");

        let result = verify_calendly_signature_at(b"body", Some(&header), KEY, 180, NOW);
        assert!(matches!(result, Err(VerificationError::VerificationFailed)));
    }

    #[test]
    fn test_missing_header_is_distinguished() {
        let err = verify_calendly_signature_at(b"body", None, KEY, 180, NOW).unwrap_err();
        assert!(err.is_missing_signature());

        let err = verify_calendly_signature_at(b"body", Some("  "), KEY, 180, NOW).unwrap_err();
        assert!(err.is_missing_signature());
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let header = sign_calendly_payload(KEY, NOW, b"body");

        assert!(matches!(
            verify_calendly_signature_at(b"body", Some(&header), KEY, 180, NOW + 181),
            Err(VerificationError::TimestampTooOld { seconds: 181, .. })
        ));
        assert!(matches!(
            verify_calendly_signature_at(b"body", Some(&header), KEY, 180, NOW - 500),
            Err(VerificationError::TimestampTooFuture { .. })
        ));
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["v1=abcd", "t=notanumber,v1=abcd", "t=1760000000"] {
            let result = verify_calendly_signature_at(b"body", Some(header), KEY, 180, NOW);
            assert!(
                matches!(result, Err(VerificationError::InvalidSignatureFormat { .. })),
                "header {header} should be malformed"
            );
        }

        let result =
            verify_calendly_signature_at(b"body", Some("t=1760000000,v1=zz"), KEY, 180, NOW);
        assert!(matches!(result, Err(VerificationError::VerificationFailed)));
    }

    #[test]
    fn test_rotated_signatures_any_match() {
        let valid = sign_calendly_payload(KEY, NOW, b"body");
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1=deadbeef,v1={v1}");

        assert!(verify_calendly_signature_at(b"body", Some(&header), KEY, 180, NOW).is_ok());
    }
}
