//! Client-facing subscription API: verify, status, restore, bind, history.

use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::{extract::State, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::models::{Platform, Subscription};
use crate::notifier::rfc3339;
use crate::verify;

pub fn router() -> Router<AppState> {
    // Public endpoints are called from mobile apps and tenant backends.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-project-id"),
            HeaderName::from_static("x-api-key"),
        ]);

    Router::new()
        .route("/api/subscription/verify", post(verify_subscription))
        .route("/api/subscription/status", get(subscription_status))
        .route("/api/subscription/restore", post(restore_subscription))
        .route("/api/subscription/bind_account", post(bind_account))
        .route("/api/subscription/history", get(subscription_history))
        .layer(cors)
}

// ============ POST /api/subscription/verify ============

#[derive(Debug, Deserialize)]
pub struct VerifySubscriptionRequest {
    pub platform: Platform,
    pub user_id: String,
    #[serde(default)]
    pub product_id: String,

    // iOS
    #[serde(default)]
    pub signed_transaction: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,

    // Android
    #[serde(default)]
    pub purchase_token: Option<String>,

    // Legacy
    #[serde(default)]
    pub receipt_data: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifySubscriptionResponse {
    pub success: bool,
    pub message: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_renew: Option<bool>,
    /// Deprecated alias of `expires_date`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

fn has_value(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

pub async fn verify_subscription(
    State(state): State<AppState>,
    Json(req): Json<VerifySubscriptionRequest>,
) -> Result<Json<VerifySubscriptionResponse>> {
    if req.user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    match req.platform {
        Platform::Ios => {
            if !has_value(&req.signed_transaction)
                && !has_value(&req.transaction_id)
                && !has_value(&req.receipt_data)
            {
                return Err(AppError::BadRequest(
                    "iOS requires signed_transaction or transaction_id".to_string(),
                ));
            }
        }
        Platform::Android => {
            if !has_value(&req.purchase_token) && !has_value(&req.receipt_data) {
                return Err(AppError::BadRequest(
                    "Android requires purchase_token".to_string(),
                ));
            }
        }
    }

    let project = {
        let conn = state.db.get()?;
        verify::resolve_project(
            &conn,
            req.platform,
            req.app_id.as_deref(),
            req.signed_transaction.as_deref(),
        )?
    };

    tracing::info!(
        "Verify subscription - project: {}, user: {}, platform: {}, product: {}",
        project.project_id,
        req.user_id,
        req.platform,
        req.product_id
    );

    let subscription = match req.platform {
        Platform::Ios => {
            if has_value(&req.signed_transaction) || has_value(&req.transaction_id) {
                verify::verify_apple_transaction(
                    &state,
                    &project,
                    req.signed_transaction.as_deref(),
                    req.transaction_id.as_deref(),
                    &req.user_id,
                )
                .await?
            } else {
                verify::verify_apple_receipt(
                    &state,
                    &project,
                    req.receipt_data.as_deref().unwrap_or(""),
                    &req.user_id,
                )
                .await?
            }
        }
        Platform::Android => {
            let purchase_token = req
                .purchase_token
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(req.receipt_data.as_deref())
                .unwrap_or("");
            verify::verify_google_purchase(
                &state,
                &project,
                purchase_token,
                &req.product_id,
                &req.user_id,
            )
            .await?
        }
    };

    let now = chrono::Utc::now().timestamp();
    let expires = rfc3339(subscription.expires_date);

    Ok(Json(VerifySubscriptionResponse {
        success: true,
        message: "Subscription verified successfully".to_string(),
        is_active: subscription.is_live(now),
        platform: Some(subscription.platform.to_string()),
        expires_date: Some(expires.clone()),
        product_id: Some(subscription.product_id.clone()),
        auto_renew: Some(subscription.auto_renew),
        expires_at: Some(expires),
    }))
}

// ============ GET /api/subscription/status ============

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_platform")]
    pub platform: Platform,
}

fn default_platform() -> Platform {
    Platform::Ios
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_renew: Option<bool>,
    /// Deprecated alias of `expires_date`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

pub async fn subscription_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>> {
    if query.user_id.is_empty() || query.app_id.is_empty() {
        return Err(AppError::BadRequest(
            "user_id and app_id are required".to_string(),
        ));
    }

    let conn = state.db.get()?;
    let project = lookup_project_by_app_id(&conn, query.platform, &query.app_id)?;

    let subscription =
        queries::find_active_subscription(&conn, &project.project_id, &query.user_id)?;

    let Some(subscription) = subscription else {
        return Ok(Json(StatusResponse {
            success: true,
            message: None,
            is_active: false,
            platform: None,
            status: Some("inactive".to_string()),
            plan: None,
            expires_date: None,
            product_id: None,
            auto_renew: None,
            expires_at: None,
        }));
    };

    let now = chrono::Utc::now().timestamp();
    let expires = rfc3339(subscription.expires_date);

    Ok(Json(StatusResponse {
        success: true,
        message: None,
        is_active: subscription.is_live(now),
        platform: Some(subscription.platform.to_string()),
        status: Some(subscription.status.to_string()),
        plan: Some(subscription.plan.clone()),
        expires_date: Some(expires.clone()),
        product_id: Some(subscription.product_id.clone()),
        auto_renew: Some(subscription.auto_renew),
        expires_at: Some(expires),
    }))
}

// ============ POST /api/subscription/restore ============

#[derive(Debug, Deserialize)]
pub struct RestoreTransaction {
    #[serde(default)]
    pub signed_transaction: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
}

/// Active restore verifies each supplied transaction; passive restore looks
/// the user up in the store.
#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub user_id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    pub platform: Platform,
    #[serde(default)]
    pub transactions: Vec<RestoreTransaction>,
}

#[derive(Debug, Serialize)]
pub struct RestoredSubscription {
    pub is_active: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub auto_renew: bool,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub success: bool,
    pub message: String,
    pub subscriptions: Vec<RestoredSubscription>,
    // Legacy top-level mirror of the most recent active subscription.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

fn restored(subscription: &Subscription, now: i64) -> RestoredSubscription {
    RestoredSubscription {
        is_active: subscription.is_live(now),
        status: subscription.status.to_string(),
        expires_date: Some(rfc3339(subscription.expires_date)),
        product_id: Some(subscription.product_id.clone()),
        auto_renew: subscription.auto_renew,
    }
}

pub async fn restore_subscription(
    State(state): State<AppState>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>> {
    if req.user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    let project = {
        let conn = state.db.get()?;
        let first_signed = req
            .transactions
            .first()
            .and_then(|t| t.signed_transaction.as_deref());
        verify::resolve_project(&conn, req.platform, req.app_id.as_deref(), first_signed)?
    };

    let now = chrono::Utc::now().timestamp();
    let mut subscriptions = Vec::new();

    if !req.transactions.is_empty() {
        if req.platform != Platform::Ios {
            return Err(AppError::BadRequest(
                "Android restore with a transaction list is not supported".to_string(),
            ));
        }

        tracing::info!(
            "Active restore: verifying {} transactions for user {}",
            req.transactions.len(),
            req.user_id
        );

        for tx in &req.transactions {
            match verify::verify_apple_transaction(
                &state,
                &project,
                tx.signed_transaction.as_deref(),
                tx.transaction_id.as_deref(),
                &req.user_id,
            )
            .await
            {
                Ok(subscription) => subscriptions.push(restored(&subscription, now)),
                Err(e) => {
                    tracing::warn!(
                        "Failed to verify transaction {:?}: {}",
                        tx.transaction_id,
                        e
                    );
                }
            }
        }
    } else {
        tracing::info!("Passive restore: looking up subscriptions for user {}", req.user_id);

        let conn = state.db.get()?;
        let rows = queries::list_subscriptions_by_user(&conn, &project.project_id, &req.user_id)?;
        subscriptions = rows.iter().map(|s| restored(s, now)).collect();
    }

    if subscriptions.is_empty() {
        return Ok(Json(RestoreResponse {
            success: true,
            message: "No active subscriptions found".to_string(),
            subscriptions: Vec::new(),
            is_active: false,
            expires_at: None,
            product_id: None,
        }));
    }

    let latest_active = subscriptions.iter().find(|s| s.is_active);

    Ok(Json(RestoreResponse {
        success: true,
        message: "Subscription restored successfully".to_string(),
        is_active: latest_active.is_some(),
        expires_at: latest_active.and_then(|s| s.expires_date.clone()),
        product_id: latest_active.and_then(|s| s.product_id.clone()),
        subscriptions,
    }))
}

// ============ POST /api/subscription/bind_account ============

#[derive(Debug, Deserialize)]
pub struct BindAccountRequest {
    pub user_id: String,
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    #[serde(default)]
    pub purchase_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BindAccountResponse {
    pub success: bool,
    pub message: String,
}

/// Attach a user id to an unbound subscription, typically after the webhook
/// created the row before the client could verify.
pub async fn bind_account(
    State(state): State<AppState>,
    Json(req): Json<BindAccountRequest>,
) -> Result<Json<BindAccountResponse>> {
    if req.user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }
    if !has_value(&req.original_transaction_id) && !has_value(&req.purchase_token) {
        return Err(AppError::BadRequest(
            "Either original_transaction_id (iOS) or purchase_token (Android) is required"
                .to_string(),
        ));
    }

    let mut conn = state.db.get()?;

    let subscription = if let Some(original) = req
        .original_transaction_id
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        queries::find_subscription_by_original(&conn, original)?
    } else {
        queries::find_subscription_by_purchase_token(
            &conn,
            req.purchase_token.as_deref().unwrap_or(""),
        )?
    };

    let subscription =
        subscription.ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

    match queries::bind_token(&mut conn, &subscription.id, &req.user_id)? {
        queries::BindOutcome::Bound | queries::BindOutcome::AlreadyBound => {
            Ok(Json(BindAccountResponse {
                success: true,
                message: "Account bound successfully".to_string(),
            }))
        }
        queries::BindOutcome::Mismatch => Err(AppError::Conflict(
            "subscription is already bound to a different account".to_string(),
        )),
    }
}

// ============ GET /api/subscription/history ============

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_platform")]
    pub platform: Platform,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub id: String,
    pub app_account_token: String,
    pub platform: String,
    pub plan: String,
    pub status: String,
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub purchase_date: String,
    pub expires_date: String,
    pub auto_renew: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub subscriptions: Vec<HistoryItem>,
}

pub async fn subscription_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    if query.user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }

    let conn = state.db.get()?;

    let rows = if query.app_id.is_empty() {
        queries::list_all_subscriptions_by_user(&conn, &query.user_id)?
    } else {
        let project = lookup_project_by_app_id(&conn, query.platform, &query.app_id)?;
        queries::list_subscriptions_by_user(&conn, &project.project_id, &query.user_id)?
    };

    let subscriptions = rows
        .into_iter()
        .map(|s| HistoryItem {
            id: s.id.clone(),
            app_account_token: s.app_account_token.clone(),
            platform: s.platform.to_string(),
            plan: s.plan.clone(),
            status: s.status.to_string(),
            product_id: s.product_id.clone(),
            transaction_id: s.transaction_id.clone(),
            original_transaction_id: s.original_transaction_id.clone(),
            purchase_date: rfc3339(s.purchase_date),
            expires_date: rfc3339(s.expires_date),
            auto_renew: s.auto_renew,
            created_at: rfc3339(s.created_at),
            updated_at: rfc3339(s.updated_at),
        })
        .collect();

    Ok(Json(HistoryResponse {
        success: true,
        subscriptions,
    }))
}

fn lookup_project_by_app_id(
    conn: &rusqlite::Connection,
    platform: Platform,
    app_id: &str,
) -> Result<crate::models::Project> {
    let project = match platform {
        Platform::Ios => queries::get_project_by_bundle_id(conn, app_id)?,
        Platform::Android => queries::get_project_by_package_name(conn, app_id)?,
    };
    project.ok_or_else(|| AppError::BadRequest(format!("App not found: {}", app_id)))
}
