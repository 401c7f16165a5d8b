//! Claim extraction from JWS compact serializations.
//!
//! ASSN delivers an outer JWS whose payload contains `signedTransactionInfo`,
//! another JWS. The outer envelope is authenticated by the signature
//! verifier, so claims are read straight from the payload segment here
//! without re-verifying. For client-supplied signed transactions the caller
//! must treat the parsed claims as hints only - Apple's authoritative record
//! is fetched from the App Store Server API.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::error::{AppError, Result};

/// Claims extracted from a signed transaction. Numeric fields tolerate both
/// integer and float JSON encodings, which Apple has been observed to mix.
#[derive(Debug, Clone, Default)]
pub struct TransactionClaims {
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    pub bundle_id: String,
    pub purchase_date_ms: i64,
    pub expires_date_ms: i64,
    pub auto_renew_status: i64,
    pub environment: String,
    pub app_account_token: String,
    pub is_in_billing_retry: bool,
    pub is_in_grace_period: bool,
}

impl TransactionClaims {
    /// A transaction without an expiry is a one-time purchase.
    pub fn is_subscription(&self) -> bool {
        self.expires_date_ms > 0
    }
}

/// Decode the payload (second) segment of a compact JWS.
pub fn decode_payload_segment(jws: &str) -> Result<Vec<u8>> {
    let parts: Vec<&str> = jws.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::BadRequest(format!(
            "invalid JWS format: expected 3 parts, got {}",
            parts.len()
        )));
    }
    URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AppError::BadRequest(format!("failed to decode JWS payload: {}", e)))
}

/// Decode the payload segment into a JSON value.
pub fn decode_claims(jws: &str) -> Result<Value> {
    let payload = decode_payload_segment(jws)?;
    serde_json::from_slice(&payload)
        .map_err(|e| AppError::BadRequest(format!("failed to parse JWS payload: {}", e)))
}

/// Parse a signed transaction's claims. `transactionId` and
/// `originalTransactionId` are required; everything else is best-effort.
pub fn parse_transaction_claims(signed_transaction_info: &str) -> Result<TransactionClaims> {
    if signed_transaction_info.is_empty() {
        return Err(AppError::BadRequest(
            "signed_transaction_info is empty".to_string(),
        ));
    }

    let claims = decode_claims(signed_transaction_info)?;

    let info = TransactionClaims {
        transaction_id: str_claim(&claims, "transactionId"),
        original_transaction_id: str_claim(&claims, "originalTransactionId"),
        product_id: str_claim(&claims, "productId"),
        bundle_id: str_claim(&claims, "bundleId"),
        purchase_date_ms: num_claim(&claims, "purchaseDate"),
        expires_date_ms: num_claim(&claims, "expiresDate"),
        auto_renew_status: num_claim(&claims, "autoRenewStatus"),
        environment: str_claim(&claims, "environment"),
        app_account_token: app_account_token(&claims),
        is_in_billing_retry: bool_claim(&claims, "isInBillingRetry"),
        is_in_grace_period: bool_claim(&claims, "isInGracePeriod"),
    };

    if info.transaction_id.is_empty() {
        return Err(AppError::BadRequest(
            "transaction_id is missing in JWS claims".to_string(),
        ));
    }
    if info.original_transaction_id.is_empty() {
        return Err(AppError::BadRequest(
            "original_transaction_id is missing in JWS claims".to_string(),
        ));
    }

    Ok(info)
}

/// Pull `bundleId` from a signed transaction without requiring the other
/// claims to be present.
pub fn extract_bundle_id(signed_transaction: &str) -> Option<String> {
    let claims = decode_claims(signed_transaction).ok()?;
    let bundle_id = str_claim(&claims, "bundleId");
    if bundle_id.is_empty() {
        None
    } else {
        Some(bundle_id)
    }
}

fn str_claim(claims: &Value, key: &str) -> String {
    claims
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn num_claim(claims: &Value, key: &str) -> i64 {
    claims
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn bool_claim(claims: &Value, key: &str) -> bool {
    claims.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Clients set the account UUID through different StoreKit APIs, so it
/// arrives under several names.
fn app_account_token(claims: &Value) -> String {
    for key in [
        "appAccountToken",
        "applicationUsername",
        "app_account_token",
        "application_username",
    ] {
        let v = str_claim(claims, key);
        if !v.is_empty() {
            return v;
        }
    }
    String::new()
}
