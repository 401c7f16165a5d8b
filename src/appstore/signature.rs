//! ECDSA P-256 verification of App Store notification signatures.
//!
//! The signature header carries a base64 JSON structure with an X.509 chain
//! (`x5c`), a Unix timestamp, and raw signature bytes. The chain is checked
//! leaf to root (validity window, parent-signed, Apple root subject), then
//! the ECDSA signature over `"{timestamp}.{body}"` is verified against the
//! leaf certificate's public key.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;
use x509_parser::prelude::*;

/// Allowed clock difference between the signature timestamp and now.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Decoded certificates are kept for 24 hours.
const CERT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const APPLE_ROOT_SUBJECTS: &[&str] = &["Apple Root CA", "Apple Inc.", "Apple Computer, Inc."];

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("certificate chain invalid")]
    CertChainInvalid,
    #[error("certificate expired or not yet valid")]
    CertExpired,
    #[error("root certificate is not an Apple root")]
    NotAppleRoot,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("timestamp outside tolerance")]
    TimestampSkew,
}

#[derive(Debug, Deserialize)]
struct SignatureInfo {
    x5c: Vec<String>,
    timestamp: i64,
    signature: String,
}

struct CachedCert {
    der: Vec<u8>,
    cached_at: Instant,
}

/// Verifier for the `X-Apple-Notification-Signature` header.
///
/// Certificate decoding is cached by the base64 form of the certificate;
/// lookups are read-mostly so the cache uses a shared-read /
/// exclusive-write lock.
pub struct SignatureVerifier {
    cert_cache: RwLock<HashMap<String, CachedCert>>,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier {
    pub fn new() -> Self {
        Self {
            cert_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Verify a store notification body against its signature header.
    pub fn verify_notification(
        &self,
        body: &[u8],
        signature_header: &str,
    ) -> Result<(), SignatureError> {
        if signature_header.is_empty() {
            return Err(SignatureError::MalformedHeader);
        }

        let info = extract_signature(signature_header)?;
        if info.x5c.is_empty() {
            return Err(SignatureError::CertChainInvalid);
        }

        let chain_der = self.certificate_chain(&info.x5c)?;
        let chain: Vec<X509Certificate> = chain_der
            .iter()
            .map(|der| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert)
                    .map_err(|_| SignatureError::CertChainInvalid)
            })
            .collect::<Result<_, _>>()?;

        verify_certificate_chain(&chain)?;
        verify_signature(body, &info, &chain[0])?;
        verify_timestamp(info.timestamp)?;

        Ok(())
    }

    /// Decode each chain entry, consulting the cache first.
    fn certificate_chain(&self, x5c: &[String]) -> Result<Vec<Vec<u8>>, SignatureError> {
        let mut ders = Vec::with_capacity(x5c.len());

        for entry in x5c {
            {
                let cache = self.cert_cache.read().unwrap();
                if let Some(cached) = cache.get(entry) {
                    if cached.cached_at.elapsed() < CERT_CACHE_TTL {
                        ders.push(cached.der.clone());
                        continue;
                    }
                }
            }

            let der = decode_certificate(entry)?;
            // Reject anything that does not parse before caching it.
            X509Certificate::from_der(&der).map_err(|_| SignatureError::CertChainInvalid)?;

            let mut cache = self.cert_cache.write().unwrap();
            cache.insert(
                entry.clone(),
                CachedCert {
                    der: der.clone(),
                    cached_at: Instant::now(),
                },
            );
            ders.push(der);
        }

        Ok(ders)
    }

    pub fn clear_cache(&self) {
        self.cert_cache.write().unwrap().clear();
    }
}

fn extract_signature(header: &str) -> Result<SignatureInfo, SignatureError> {
    let decoded = BASE64
        .decode(header.trim())
        .map_err(|_| SignatureError::MalformedHeader)?;
    serde_json::from_slice(&decoded).map_err(|_| SignatureError::MalformedHeader)
}

/// x5c entries are base64 DER; tolerate PEM-armored entries too.
fn decode_certificate(entry: &str) -> Result<Vec<u8>, SignatureError> {
    let body: String = entry
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    BASE64
        .decode(body.trim())
        .map_err(|_| SignatureError::CertChainInvalid)
}

/// Chain is ordered leaf first. Every certificate must be inside its
/// validity window, every non-root certificate must be signed by its
/// parent, and the root subject must name Apple.
fn verify_certificate_chain(chain: &[X509Certificate]) -> Result<(), SignatureError> {
    if chain.is_empty() {
        return Err(SignatureError::CertChainInvalid);
    }

    for (i, cert) in chain.iter().enumerate() {
        if !cert.validity().is_valid() {
            return Err(SignatureError::CertExpired);
        }

        if i + 1 < chain.len() {
            let parent = &chain[i + 1];
            cert.verify_signature(Some(parent.public_key()))
                .map_err(|_| SignatureError::CertChainInvalid)?;
        }
    }

    let root = chain.last().unwrap();
    let subject = root.subject().to_string();
    if !APPLE_ROOT_SUBJECTS.iter().any(|s| subject.contains(s)) {
        return Err(SignatureError::NotAppleRoot);
    }

    Ok(())
}

/// Signing input is `"{timestamp}.{body}"`; the signature is raw 64-byte
/// r||s over its SHA-256 digest.
fn verify_signature(
    body: &[u8],
    info: &SignatureInfo,
    leaf: &X509Certificate,
) -> Result<(), SignatureError> {
    let signature_bytes = BASE64
        .decode(&info.signature)
        .map_err(|_| SignatureError::SignatureMismatch)?;
    if signature_bytes.len() != 64 {
        return Err(SignatureError::SignatureMismatch);
    }

    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| SignatureError::SignatureMismatch)?;

    let key_bytes = &leaf.public_key().subject_public_key.data;
    let verifying_key =
        VerifyingKey::from_sec1_bytes(key_bytes).map_err(|_| SignatureError::SignatureMismatch)?;

    let mut signing_input = info.timestamp.to_string().into_bytes();
    signing_input.push(b'.');
    signing_input.extend_from_slice(body);

    verifying_key
        .verify(&signing_input, &signature)
        .map_err(|_| SignatureError::SignatureMismatch)
}

fn verify_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let diff = Utc::now().timestamp() - timestamp;
    if !(-TIMESTAMP_TOLERANCE_SECS..=TIMESTAMP_TOLERANCE_SECS).contains(&diff) {
        return Err(SignatureError::TimestampSkew);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_is_malformed() {
        let verifier = SignatureVerifier::new();
        assert!(matches!(
            verifier.verify_notification(b"body", ""),
            Err(SignatureError::MalformedHeader)
        ));
    }

    #[test]
    fn non_base64_header_is_malformed() {
        let verifier = SignatureVerifier::new();
        assert!(matches!(
            verifier.verify_notification(b"body", "!!not base64!!"),
            Err(SignatureError::MalformedHeader)
        ));
    }

    #[test]
    fn header_without_chain_is_invalid() {
        let verifier = SignatureVerifier::new();
        let header = BASE64.encode(r#"{"x5c":[],"timestamp":0,"signature":""}"#);
        assert!(matches!(
            verifier.verify_notification(b"body", &header),
            Err(SignatureError::CertChainInvalid)
        ));
    }

    #[test]
    fn garbage_certificate_is_invalid() {
        let verifier = SignatureVerifier::new();
        let cert = BASE64.encode(b"definitely not DER");
        let header = BASE64.encode(format!(
            r#"{{"x5c":["{}"],"timestamp":0,"signature":""}}"#,
            cert
        ));
        assert!(matches!(
            verifier.verify_notification(b"body", &header),
            Err(SignatureError::CertChainInvalid)
        ));
    }

    #[test]
    fn timestamp_tolerance_bounds() {
        let now = Utc::now().timestamp();
        assert!(verify_timestamp(now).is_ok());
        assert!(verify_timestamp(now - 200).is_ok());
        assert!(matches!(
            verify_timestamp(now - 301),
            Err(SignatureError::TimestampSkew)
        ));
        assert!(matches!(
            verify_timestamp(now + 301),
            Err(SignatureError::TimestampSkew)
        ));
    }
}
