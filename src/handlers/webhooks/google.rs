//! Google Play Real-Time Developer Notification ingestion.
//!
//! RTDN events carry no dates, so processing works from the notification
//! code plus the stored row located by purchase token. Store-side
//! verification only runs for a purchase event whose row is missing, through
//! the `GooglePlayVerifier` seam.

use axum::{body::Bytes, extract::State};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::googleplay::{self, RtdnEvent};
use crate::models::TransactionKind;
use crate::verify;

/// SUBSCRIPTION_PURCHASED, the only create-capable RTDN code.
const RTDN_PURCHASED: i32 = 4;

#[derive(Debug, Serialize)]
pub struct GoogleWebhookResponse {
    pub success: bool,
    pub message: String,
}

fn ok(message: &str) -> Json<GoogleWebhookResponse> {
    Json(GoogleWebhookResponse {
        success: true,
        message: message.to_string(),
    })
}

pub async fn google_play_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<GoogleWebhookResponse>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("empty request body".to_string()));
    }

    let event = googleplay::decode_rtdn(&body)?;
    let notification = &event.notification;

    if notification.purchase_token.is_empty() || notification.subscription_id.is_empty() {
        return Err(AppError::BadRequest(
            "missing required fields: purchase_token or subscription_id".to_string(),
        ));
    }

    tracing::info!(
        "Google Play notification - type: {}, subscription: {}, package: {}",
        notification.notification_type,
        notification.subscription_id,
        event.package_name
    );

    let Some(target_status) = googleplay::rtdn_target_status(notification.notification_type)
    else {
        tracing::info!(
            "Google Play notification type {} carries no status change",
            notification.notification_type
        );
        return Ok(ok("Notification ignored"));
    };

    let conn = state.db.get()?;
    let existing = queries::find_subscription_by_purchase_token(&conn, &notification.purchase_token)?;

    let Some(existing) = existing else {
        drop(conn);
        return handle_missing_row(&state, &event).await;
    };

    let auto_renew = if googleplay::rtdn_clears_auto_renew(target_status) {
        Some(false)
    } else {
        None
    };

    let updated = queries::update_subscription_status(&conn, &existing.id, target_status, auto_renew)?
        .ok_or_else(|| AppError::Internal("subscription vanished during update".to_string()))?;

    let project = queries::get_project_by_project_id(&conn, &updated.project_id)?;
    if let Some(project) = project {
        if let Some(callback_url) = project.callback_url.as_deref() {
            state.notifier.notify(
                callback_url,
                project.signing_secret.as_deref().unwrap_or(""),
                &updated,
            );
        }
    }

    tracing::info!(
        "Google Play notification processed - type: {}, subscription: {}, status: {}",
        notification.notification_type,
        notification.subscription_id,
        updated.status
    );

    Ok(ok("Notification processed successfully"))
}

/// A notification for a row we do not have. A purchase event may create it
/// through store-side verification; everything else is surfaced so the
/// retry lands after the purchase does.
async fn handle_missing_row(
    state: &AppState,
    event: &RtdnEvent,
) -> Result<Json<GoogleWebhookResponse>> {
    let notification = &event.notification;

    if notification.notification_type != RTDN_PURCHASED {
        tracing::error!(
            "Google Play notification {} references unknown subscription - purchase_token: {}",
            notification.notification_type,
            notification.purchase_token
        );
        // 5xx keeps Google retrying until the purchase lands.
        return Err(AppError::Internal(format!(
            "subscription not found for purchase token (type {})",
            notification.notification_type
        )));
    }

    if event.package_name.is_empty() {
        return Err(AppError::BadRequest(
            "cannot resolve project: notification carries no packageName".to_string(),
        ));
    }

    let project = {
        let conn = state.db.get()?;
        queries::get_project_by_package_name(&conn, &event.package_name)?.ok_or_else(|| {
            AppError::BadRequest(format!(
                "Project not found for package_name: {}",
                event.package_name
            ))
        })?
    };

    match state
        .google_play
        .verify_purchase(
            &event.package_name,
            &notification.purchase_token,
            &notification.subscription_id,
        )
        .await
    {
        Ok(mut normalized) => {
            normalized.plan = project.plan_for_product(&normalized.product_id);
            if normalized.latest_receipt.is_empty() {
                normalized.latest_receipt = notification.purchase_token.clone();
            }
            verify::persist_and_notify(state, &project, normalized, TransactionKind::Subscription)
                .await?;
            Ok(ok("Notification processed successfully"))
        }
        Err(e) => {
            // Without store-side verification there is nothing to persist;
            // acknowledge so the client verify can create the row instead.
            tracing::warn!(
                "Google Play purchase verification unavailable - token: {}, error: {}",
                notification.purchase_token,
                e
            );
            Ok(ok("Notification received, verification deferred"))
        }
    }
}
