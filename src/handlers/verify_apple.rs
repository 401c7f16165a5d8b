//! Server-to-server verification for tenant backends.
//!
//! The tenant authenticates with its project credentials, supplies a
//! transaction id, and gets back business-usable entitlements: subscription
//! liveness plus whether the user holds a lifetime purchase.

use axum::routing::post;
use axum::{
    extract::{Extension, State},
    middleware::from_fn_with_state,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::{project_auth, ProjectContext};
use crate::notifier::rfc3339;
use crate::verify;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/verify/apple", post(verify_apple))
        .layer(from_fn_with_state(state, project_auth))
}

#[derive(Debug, Deserialize)]
pub struct VerifyAppleRequest {
    pub transaction_id: String,
    /// Optional override of the authenticated project.
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEntitlement {
    pub active: bool,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct LifetimeEntitlement {
    pub has_purchase: bool,
}

#[derive(Debug, Serialize)]
pub struct Entitlements {
    pub subscription: SubscriptionEntitlement,
    pub lifetime: LifetimeEntitlement,
}

#[derive(Debug, Serialize)]
pub struct VerifyAppleResponse {
    pub success: bool,
    pub user_id: String,
    pub entitlements: Entitlements,
}

pub async fn verify_apple(
    State(state): State<AppState>,
    Extension(ctx): Extension<ProjectContext>,
    Json(req): Json<VerifyAppleRequest>,
) -> Result<Json<VerifyAppleResponse>> {
    if req.transaction_id.is_empty() {
        return Err(AppError::BadRequest("transaction_id is required".to_string()));
    }

    let project = match req.project_id.as_deref().filter(|p| !p.is_empty()) {
        Some(override_id) if override_id != ctx.project.project_id => {
            let conn = state.db.get()?;
            queries::get_project_by_project_id(&conn, override_id)?
                .ok_or_else(|| AppError::BadRequest(format!("project not found: {}", override_id)))?
        }
        _ => ctx.project.clone(),
    };

    tracing::info!(
        "Server-to-server verify - project: {}, transaction: {}",
        project.project_id,
        req.transaction_id
    );

    let subscription =
        verify::verify_apple_transaction(&state, &project, None, Some(&req.transaction_id), "")
            .await?;

    // Without a bound token there is no user to report entitlements for;
    // the tenant binds one via /api/subscription/bind_account first.
    if subscription.app_account_token.is_empty() {
        return Err(AppError::BadRequest(
            "unable to determine user: subscription has no bound app_account_token".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let is_active = subscription.is_live(now);
    let expires_at = if subscription.expires_date > now {
        rfc3339(subscription.expires_date)
    } else {
        String::new()
    };

    let has_lifetime = {
        let conn = state.db.get()?;
        queries::has_lifetime_purchase(
            &conn,
            &project.project_id,
            &subscription.app_account_token,
        )?
    };

    Ok(Json(VerifyAppleResponse {
        success: true,
        user_id: subscription.app_account_token.clone(),
        entitlements: Entitlements {
            subscription: SubscriptionEntitlement {
                active: is_active,
                expires_at,
            },
            lifetime: LifetimeEntitlement {
                has_purchase: has_lifetime,
            },
        },
    }))
}
