//! Google Play integration: RTDN envelope decoding, notification-code
//! mapping, and the store-side verification seam.
//!
//! Real-Time Developer Notifications are processed purely from the
//! notification payload plus stored rows. Store-side purchase lookup (the
//! Android Publisher API) sits behind the `GooglePlayVerifier` trait until a
//! real implementation lands; the shipped implementation reports itself as
//! unconfigured.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{AppError, Result};
use crate::models::{
    NormalizedTransaction, RtdnEnvelope, RtdnNotification, RtdnSubscriptionNotification,
    SubscriptionStatus,
};

/// Store-side purchase verification for Android.
#[async_trait]
pub trait GooglePlayVerifier: Send + Sync {
    /// Verify a purchase token against the store and return the normalized
    /// transaction it proves.
    async fn verify_purchase(
        &self,
        package_name: &str,
        purchase_token: &str,
        product_id: &str,
    ) -> Result<NormalizedTransaction>;
}

/// Placeholder until Android Publisher API credentials are wired up.
pub struct UnconfiguredGooglePlay;

#[async_trait]
impl GooglePlayVerifier for UnconfiguredGooglePlay {
    async fn verify_purchase(
        &self,
        _package_name: &str,
        _purchase_token: &str,
        _product_id: &str,
    ) -> Result<NormalizedTransaction> {
        Err(AppError::Upstream(
            "Google Play verification not configured".to_string(),
        ))
    }
}

/// A decoded RTDN event ready for dispatch.
#[derive(Debug)]
pub struct RtdnEvent {
    pub package_name: String,
    pub notification: RtdnSubscriptionNotification,
}

/// Decode an RTDN request body. Pub/Sub pushes wrap the developer
/// notification in base64 under `message.data`; some test setups post the
/// `subscriptionNotification` inline.
pub fn decode_rtdn(body: &[u8]) -> Result<RtdnEvent> {
    let envelope: RtdnEnvelope = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid notification format: {}", e)))?;

    if let Some(message) = envelope.message {
        if !message.data.is_empty() {
            let decoded = BASE64
                .decode(message.data.trim())
                .map_err(|e| AppError::BadRequest(format!("invalid message data: {}", e)))?;
            let notification: RtdnNotification = serde_json::from_slice(&decoded)
                .map_err(|e| AppError::BadRequest(format!("invalid developer notification: {}", e)))?;

            let sub = notification.subscription_notification.ok_or_else(|| {
                AppError::BadRequest("notification carries no subscriptionNotification".to_string())
            })?;
            return Ok(RtdnEvent {
                package_name: notification.package_name,
                notification: sub,
            });
        }
    }

    let sub = envelope.subscription_notification.ok_or_else(|| {
        AppError::BadRequest("notification carries no subscriptionNotification".to_string())
    })?;
    Ok(RtdnEvent {
        package_name: String::new(),
        notification: sub,
    })
}

/// Map an RTDN notification code onto the target subscription status.
/// `None` means the code does not change status (price-change confirmed,
/// pause schedule changed).
pub fn rtdn_target_status(notification_type: i32) -> Option<SubscriptionStatus> {
    match notification_type {
        // RECOVERED, RENEWED, PURCHASED, RESTARTED
        1 | 2 | 4 | 7 => Some(SubscriptionStatus::Active),
        // CANCELED
        3 => Some(SubscriptionStatus::Cancelled),
        // ON_HOLD
        5 => Some(SubscriptionStatus::OnHold),
        // IN_GRACE_PERIOD
        6 => Some(SubscriptionStatus::GracePeriod),
        // DEFERRED
        9 => Some(SubscriptionStatus::Deferred),
        // PAUSED
        10 => Some(SubscriptionStatus::Paused),
        // REVOKED
        12 => Some(SubscriptionStatus::Revoked),
        // EXPIRED
        13 => Some(SubscriptionStatus::Expired),
        // PRICE_CHANGE_CONFIRMED, PAUSE_SCHEDULE_CHANGED and anything unknown
        _ => None,
    }
}

/// Statuses that also turn off auto-renew on the stored row.
pub fn rtdn_clears_auto_renew(status: SubscriptionStatus) -> bool {
    matches!(
        status,
        SubscriptionStatus::Cancelled | SubscriptionStatus::Revoked | SubscriptionStatus::Expired
    )
}
