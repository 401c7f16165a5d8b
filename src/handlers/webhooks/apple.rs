//! App Store Server Notifications V2 ingestion.
//!
//! Pipeline: raw body -> optional signature verification -> envelope JWS
//! decode -> heartbeat short-circuit -> replay guard -> project lookup by
//! bundle id -> transaction claims -> status machine -> upsert -> outbound
//! notification. 2xx tells Apple the notification is delivered; any other
//! status makes them retry.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};

use crate::appstore::jws;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{
    AppStoreNotification, AppStoreNotificationWrapper, StoreEnvironment, TransactionKind,
};
use crate::replay::ReplayCheck;
use crate::status;
use crate::verify;

pub const SIGNATURE_HEADER: &str = "X-Apple-Notification-Signature";

/// Deadline for the optional tenant token-resolution lookup.
const TOKEN_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            status: None,
            message: Some(message.to_string()),
        })
    }

    fn heartbeat() -> Json<Self> {
        Json(Self {
            success: true,
            status: Some("heartbeat_ok"),
            message: None,
        })
    }
}

pub async fn appstore_production_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    process_appstore_notification(&state, StoreEnvironment::Production, &headers, &body).await
}

pub async fn appstore_sandbox_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    process_appstore_notification(&state, StoreEnvironment::Sandbox, &headers, &body).await
}

async fn process_appstore_notification(
    state: &AppState,
    path_environment: StoreEnvironment,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookResponse>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("empty request body".to_string()));
    }

    // The header is optional (Apple does not sign every delivery) but when
    // present it must verify.
    if let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        if !signature.is_empty() {
            state
                .signature_verifier
                .verify_notification(body, signature)?;
        }
    }

    let wrapper: AppStoreNotificationWrapper = serde_json::from_slice(body).map_err(|e| {
        tracing::error!(
            "Failed to parse notification wrapper: {}, body length: {}",
            e,
            body.len()
        );
        AppError::BadRequest("invalid notification format".to_string())
    })?;

    if wrapper.signed_payload.is_empty() {
        return Err(AppError::BadRequest("signedPayload is missing".to_string()));
    }

    let payload = jws::decode_payload_segment(&wrapper.signed_payload)?;
    let notification: AppStoreNotification = serde_json::from_slice(&payload).map_err(|e| {
        let preview: String = String::from_utf8_lossy(&payload).chars().take(500).collect();
        tracing::error!(
            "Failed to parse notification from JWS payload: {}, payload preview: {}",
            e,
            preview
        );
        AppError::BadRequest("failed to parse notification from JWS".to_string())
    })?;

    tracing::info!(
        "Parsed notification - type: {}, bundle_id: {}, environment: {}",
        notification.notification_type,
        notification.data.bundle_id,
        notification.data.environment
    );

    if notification.notification_type.is_empty() {
        tracing::info!("App Store heartbeat - environment: {}", path_environment);
        return Ok(WebhookResponse::heartbeat());
    }

    if state
        .replay_guard
        .check(&notification.notification_uuid, notification.signed_date)
        == ReplayCheck::Replay
    {
        return Err(AppError::BadRequest("duplicate notification".to_string()));
    }

    let project = {
        let conn = state.db.get()?;
        queries::get_project_by_bundle_id(&conn, &notification.data.bundle_id)?.ok_or_else(
            || {
                AppError::BadRequest(format!(
                    "Project not found for bundle_id: {}",
                    notification.data.bundle_id
                ))
            },
        )?
    };

    let claims = jws::parse_transaction_claims(&notification.data.signed_transaction_info)?;

    tracing::info!(
        "Parsed transaction info - transaction_id: {}, original_transaction_id: {}, product_id: {}",
        claims.transaction_id,
        claims.original_transaction_id,
        claims.product_id
    );

    let Some(transition) = status::apple_transition(&notification.notification_type) else {
        tracing::info!(
            "Unknown notification type: {}",
            notification.notification_type
        );
        return Ok(WebhookResponse::ok("Notification ignored"));
    };

    // Non-create events refer to a row the store already told us about.
    // Respond 5xx so Apple keeps retrying; an out-of-order renewal lands
    // once its create notification has arrived.
    if !transition.creates() {
        let conn = state.db.get()?;
        if queries::get_subscription_by_original(
            &conn,
            &project.project_id,
            &claims.original_transaction_id,
        )?
        .is_none()
        {
            tracing::error!(
                "Notification {} references unknown subscription - project: {}, original_transaction_id: {}",
                notification.notification_type,
                project.project_id,
                claims.original_transaction_id
            );
            return Err(AppError::Internal(format!(
                "subscription not found for original_transaction_id: {}",
                claims.original_transaction_id
            )));
        }
    }

    let mut app_account_token = claims.app_account_token.clone();
    if !app_account_token.is_empty() {
        if let Some(base_url) = project.tenant_base_url.as_deref().filter(|s| !s.is_empty()) {
            if let Some(device_id) =
                resolve_device_id(&state.http, base_url, &app_account_token).await
            {
                tracing::info!(
                    "Resolved app_account_token to tenant id - token: {}, id: {}",
                    app_account_token,
                    device_id
                );
                app_account_token = device_id;
            }
        }
    }

    let environment = if notification.data.environment.is_empty() {
        path_environment
    } else {
        StoreEnvironment::parse_lenient(&notification.data.environment)
    };

    let normalized = status::normalize_apple_event(
        transition,
        &claims,
        project.plan_for_product(&claims.product_id),
        app_account_token,
        environment,
    );

    let kind = if claims.is_subscription() {
        TransactionKind::Subscription
    } else {
        TransactionKind::NonConsumable
    };

    let subscription = verify::persist_and_notify(state, &project, normalized, kind).await?;

    tracing::info!(
        "App Store notification processed - type: {}, transaction: {}, status: {}",
        notification.notification_type,
        subscription.transaction_id,
        subscription.status
    );

    Ok(WebhookResponse::ok("Notification processed successfully"))
}

#[derive(Debug, Deserialize)]
struct DeviceIdResponse {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    user_id: String,
}

/// Ask the tenant backend to map an app account token to its own user id.
/// Best-effort with a hard deadline; any failure keeps the UUID.
async fn resolve_device_id(
    http: &reqwest::Client,
    base_url: &str,
    app_account_token: &str,
) -> Option<String> {
    let url = format!(
        "{}/api/app-account-token/device-id",
        base_url.trim_end_matches('/')
    );

    let response = http
        .get(&url)
        .query(&[("app_account_token", app_account_token)])
        .timeout(TOKEN_RESOLUTION_TIMEOUT)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let parsed: DeviceIdResponse = response.json().await.ok()?;
    if !parsed.device_id.is_empty() {
        Some(parsed.device_id)
    } else if !parsed.user_id.is_empty() {
        Some(parsed.user_id)
    } else {
        None
    }
}
