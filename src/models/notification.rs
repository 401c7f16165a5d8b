use serde::Deserialize;

/// Outer wrapper of an App Store Server Notification V2 request body.
#[derive(Debug, Deserialize)]
pub struct AppStoreNotificationWrapper {
    #[serde(rename = "signedPayload", default)]
    pub signed_payload: String,
}

/// Decoded payload of the outer ASSN JWS. Apple uses camelCase keys.
#[derive(Debug, Deserialize)]
pub struct AppStoreNotification {
    #[serde(rename = "notificationType", default)]
    pub notification_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(rename = "notificationUUID", default)]
    pub notification_uuid: String,
    #[serde(rename = "signedDate", default)]
    pub signed_date: i64,
    #[serde(default)]
    pub data: NotificationData,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "bundleId", default)]
    pub bundle_id: String,
    #[serde(rename = "bundleVersion", default)]
    pub bundle_version: String,
    #[serde(default)]
    pub environment: String,
    #[serde(rename = "signedTransactionInfo", default)]
    pub signed_transaction_info: String,
}

/// Google Play Real-Time Developer Notification envelope.
///
/// Arrives either as a Pub/Sub push (`message.data` holding the base64
/// notification) or, in test setups, with the notification inlined.
#[derive(Debug, Default, Deserialize)]
pub struct RtdnEnvelope {
    #[serde(default)]
    pub message: Option<PubSubMessage>,
    #[serde(rename = "subscriptionNotification", default)]
    pub subscription_notification: Option<RtdnSubscriptionNotification>,
}

#[derive(Debug, Deserialize)]
pub struct PubSubMessage {
    #[serde(default)]
    pub data: String,
}

/// The decoded developer notification.
#[derive(Debug, Default, Deserialize)]
pub struct RtdnNotification {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "packageName", default)]
    pub package_name: String,
    #[serde(rename = "eventTimeMillis", default)]
    pub event_time_millis: Option<serde_json::Value>,
    #[serde(rename = "subscriptionNotification", default)]
    pub subscription_notification: Option<RtdnSubscriptionNotification>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RtdnSubscriptionNotification {
    #[serde(rename = "notificationType", default)]
    pub notification_type: i32,
    #[serde(rename = "purchaseToken", default)]
    pub purchase_token: String,
    #[serde(rename = "subscriptionId", default)]
    pub subscription_id: String,
}
