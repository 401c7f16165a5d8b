//! Verification orchestrator.
//!
//! Coordinates a client-side verification request: authenticate the tenant,
//! resolve the project, verify the evidence with the store, upsert the
//! subscription projection, and queue the outbound notification. iOS and
//! Android diverge in transport and identity but converge on the
//! `NormalizedTransaction` shape applied by the store.

use rusqlite::Connection;

use crate::appstore::jws;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    NormalizedTransaction, Platform, Project, StoreEnvironment, Subscription, TransactionKind,
};
use crate::status;

/// Resolve the project a verification request belongs to.
///
/// Order: an explicit `app_id` (bundle id on iOS, package name on Android),
/// then the `bundleId` claim of a supplied signed transaction. Anything else
/// is unresolvable.
pub fn resolve_project(
    conn: &Connection,
    platform: Platform,
    app_id: Option<&str>,
    signed_transaction: Option<&str>,
) -> Result<Project> {
    if let Some(app_id) = app_id.filter(|s| !s.is_empty()) {
        let project = match platform {
            Platform::Ios => queries::get_project_by_bundle_id(conn, app_id)?,
            Platform::Android => queries::get_project_by_package_name(conn, app_id)?,
        };
        return project
            .ok_or_else(|| AppError::BadRequest(format!("App not found: {}", app_id)));
    }

    if platform == Platform::Ios {
        if let Some(jws_token) = signed_transaction.filter(|s| !s.is_empty()) {
            if let Some(bundle_id) = jws::extract_bundle_id(jws_token) {
                return queries::get_project_by_bundle_id(conn, &bundle_id)?.ok_or_else(|| {
                    AppError::BadRequest(format!("App not found for bundle_id: {}", bundle_id))
                });
            }
        }
    }

    Err(AppError::BadRequest(
        "project unresolved: app_id is required (or provide signed_transaction for iOS)"
            .to_string(),
    ))
}

/// Verify an iOS transaction through the App Store Server API and persist
/// the result.
///
/// The claims of a client-supplied `signed_transaction` are only hints used
/// to locate the transaction id; the authoritative record is the one the
/// API returns. An `appAccountToken` in the API response takes precedence
/// over the caller-supplied hint.
pub async fn verify_apple_transaction(
    state: &AppState,
    project: &Project,
    signed_transaction: Option<&str>,
    transaction_id: Option<&str>,
    token_hint: &str,
) -> Result<Subscription> {
    let mut lookup_id = String::new();

    if let Some(jws_token) = signed_transaction.filter(|s| !s.is_empty()) {
        if let Ok(claims) = jws::parse_transaction_claims(jws_token) {
            lookup_id = claims.transaction_id;
        }
    }
    if lookup_id.is_empty() {
        lookup_id = transaction_id.unwrap_or_default().to_string();
    }
    if lookup_id.is_empty() {
        return Err(AppError::BadRequest("transaction_id is required".to_string()));
    }

    let signed_info = state
        .appstore
        .fetch_signed_transaction(&lookup_id, project.bundle_id.as_deref())
        .await?;

    let claims = jws::parse_transaction_claims(&signed_info)
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let app_account_token = if !claims.app_account_token.is_empty() {
        tracing::info!(
            "Using appAccountToken from App Store Server API: {}",
            claims.app_account_token
        );
        claims.app_account_token.clone()
    } else {
        token_hint.to_string()
    };

    let normalized = NormalizedTransaction {
        app_account_token,
        platform: Platform::Ios,
        plan: project.plan_for_product(&claims.product_id),
        status: status::derive_verified_status(&claims),
        start_date: claims.purchase_date_ms / 1000,
        end_date: claims.expires_date_ms / 1000,
        product_id: claims.product_id.clone(),
        transaction_id: claims.transaction_id.clone(),
        original_transaction_id: claims.original_transaction_id.clone(),
        environment: StoreEnvironment::parse_lenient(&claims.environment),
        purchase_date: claims.purchase_date_ms / 1000,
        expires_date: claims.expires_date_ms / 1000,
        auto_renew: true, // refreshed by the next store notification
        latest_receipt: signed_transaction.unwrap_or(&signed_info).to_string(),
        latest_receipt_info: signed_info.clone(),
    };

    let kind = if claims.is_subscription() {
        TransactionKind::Subscription
    } else {
        TransactionKind::NonConsumable
    };

    persist_and_notify(state, project, normalized, kind).await
}

/// Legacy iOS path: opaque base64 receipt through verifyReceipt.
pub async fn verify_apple_receipt(
    state: &AppState,
    project: &Project,
    receipt_data: &str,
    token_hint: &str,
) -> Result<Subscription> {
    let verification = state.appstore.verify_receipt(receipt_data).await?;

    let entry = verification
        .response
        .latest_entry()
        .cloned()
        .ok_or_else(|| AppError::Upstream("no subscription found in receipt".to_string()))?;

    let purchase_date = parse_ms_string(&entry.purchase_date_ms)?;
    let expires_date = parse_ms_string(&entry.expires_date_ms)?;

    let status = if expires_date > chrono::Utc::now().timestamp() {
        crate::models::SubscriptionStatus::Active
    } else {
        crate::models::SubscriptionStatus::Expired
    };

    let normalized = NormalizedTransaction {
        app_account_token: token_hint.to_string(),
        platform: Platform::Ios,
        plan: project.plan_for_product(&entry.product_id),
        status,
        start_date: purchase_date,
        end_date: expires_date,
        product_id: entry.product_id.clone(),
        transaction_id: entry.transaction_id.clone(),
        original_transaction_id: entry.original_transaction_id.clone(),
        environment: verification.environment,
        purchase_date,
        expires_date,
        auto_renew: true, // refreshed by the next store notification
        latest_receipt: verification.response.latest_receipt.clone(),
        latest_receipt_info: verification.raw_body.clone(),
    };

    persist_and_notify(state, project, normalized, TransactionKind::Subscription).await
}

/// Android path: purchase token through the Google Play verifier seam.
pub async fn verify_google_purchase(
    state: &AppState,
    project: &Project,
    purchase_token: &str,
    product_id: &str,
    token_hint: &str,
) -> Result<Subscription> {
    let package_name = project.package_name.clone().unwrap_or_default();

    let mut normalized = state
        .google_play
        .verify_purchase(&package_name, purchase_token, product_id)
        .await?;

    if normalized.app_account_token.is_empty() {
        normalized.app_account_token = token_hint.to_string();
    }
    normalized.platform = Platform::Android;
    normalized.plan = project.plan_for_product(&normalized.product_id);
    if normalized.latest_receipt.is_empty() {
        normalized.latest_receipt = purchase_token.to_string();
    }

    persist_and_notify(state, project, normalized, TransactionKind::Subscription).await
}

/// Upsert the projection, append the audit row, and queue the tenant
/// notification. The notification outcome never reaches the caller.
pub async fn persist_and_notify(
    state: &AppState,
    project: &Project,
    normalized: NormalizedTransaction,
    kind: TransactionKind,
) -> Result<Subscription> {
    let mut conn = state.db.get()?;

    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &normalized)?;

    queries::record_transaction(
        &conn,
        &project.project_id,
        &outcome.subscription.app_account_token,
        &normalized.transaction_id,
        &normalized.original_transaction_id,
        &normalized.product_id,
        kind,
        normalized.environment,
        normalized.purchase_date,
    )?;

    if let Some(callback_url) = project.callback_url.as_deref() {
        state.notifier.notify(
            callback_url,
            project.signing_secret.as_deref().unwrap_or(""),
            &outcome.subscription,
        );
    }

    Ok(outcome.subscription)
}

fn parse_ms_string(value: &str) -> Result<i64> {
    if value.is_empty() {
        return Err(AppError::Upstream("empty timestamp in receipt".to_string()));
    }
    let ms: i64 = value
        .parse()
        .map_err(|_| AppError::Upstream(format!("invalid timestamp in receipt: {}", value)))?;
    Ok(ms / 1000)
}
