use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection, TransactionBehavior};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, PROJECT_COLS, SUBSCRIPTION_COLS, TRANSACTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Projects ============

pub fn create_project(conn: &Connection, input: &CreateProject) -> Result<Project> {
    let id = gen_id();
    let now = now();
    let plan_map = serde_json::to_string(&input.plan_map)?;

    conn.execute(
        "INSERT INTO project (id, project_id, project_name, api_key, bundle_id, package_name,
                              callback_url, signing_secret, tenant_base_url, plan_map,
                              is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
        params![
            &id,
            &input.project_id,
            &input.project_name,
            &input.api_key,
            &input.bundle_id,
            &input.package_name,
            &input.callback_url,
            &input.signing_secret,
            &input.tenant_base_url,
            &plan_map,
            now,
        ],
    )?;

    Ok(Project {
        id,
        project_id: input.project_id.clone(),
        project_name: input.project_name.clone(),
        api_key: input.api_key.clone(),
        bundle_id: input.bundle_id.clone(),
        package_name: input.package_name.clone(),
        callback_url: input.callback_url.clone(),
        signing_secret: input.signing_secret.clone(),
        tenant_base_url: input.tenant_base_url.clone(),
        plan_map: input.plan_map.clone(),
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_project_by_project_id(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM project WHERE project_id = ?1 AND is_active = 1",
            PROJECT_COLS
        ),
        &[&project_id],
    )
}

pub fn get_project_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM project WHERE api_key = ?1 AND is_active = 1",
            PROJECT_COLS
        ),
        &[&api_key],
    )
}

pub fn get_project_by_bundle_id(conn: &Connection, bundle_id: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM project WHERE bundle_id = ?1 AND is_active = 1",
            PROJECT_COLS
        ),
        &[&bundle_id],
    )
}

pub fn get_project_by_package_name(
    conn: &Connection,
    package_name: &str,
) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM project WHERE package_name = ?1 AND is_active = 1",
            PROJECT_COLS
        ),
        &[&package_name],
    )
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM project WHERE is_active = 1 ORDER BY created_at DESC",
            PROJECT_COLS
        ),
        &[],
    )
}

/// Partial update of a project's mutable fields. Identity keys never
/// change after issuance. Returns whether a row was touched.
pub fn update_project(
    conn: &Connection,
    project_id: &str,
    input: &UpdateProject,
) -> Result<bool> {
    let mut fields: Vec<(&'static str, Value)> = Vec::new();

    if let Some(name) = &input.project_name {
        fields.push(("project_name", name.clone().into()));
    }
    if let Some(url) = &input.callback_url {
        fields.push(("callback_url", url.clone().into()));
    }
    if let Some(secret) = &input.signing_secret {
        fields.push(("signing_secret", secret.clone().into()));
    }
    if let Some(base_url) = &input.tenant_base_url {
        fields.push(("tenant_base_url", base_url.clone().into()));
    }
    if let Some(plan_map) = &input.plan_map {
        fields.push(("plan_map", serde_json::to_string(plan_map)?.into()));
    }
    if let Some(is_active) = input.is_active {
        fields.push(("is_active", (is_active as i32).into()));
    }

    if fields.is_empty() {
        return Ok(false);
    }
    fields.push(("updated_at", now().into()));

    let sets: Vec<String> = fields
        .iter()
        .map(|(col, _)| format!("{} = ?", col))
        .collect();
    let mut values: Vec<Value> = fields.into_iter().map(|(_, v)| v).collect();
    values.push(project_id.to_string().into());

    let sql = format!(
        "UPDATE project SET {} WHERE project_id = ?",
        sets.join(", ")
    );
    let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(affected > 0)
}

/// Soft delete: the row is retained, `is_active = 0` disables every route
/// and hides the project from all lookups.
pub fn deactivate_project(conn: &Connection, project_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE project SET is_active = 0, updated_at = ?1
         WHERE project_id = ?2 AND is_active = 1",
        params![now(), project_id],
    )?;
    Ok(affected > 0)
}

pub fn count_projects(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM project", [], |row| row.get(0))?;
    Ok(count)
}

// ============ Subscription store ============

/// Outcome of applying one store event to the projection.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub subscription: Subscription,
    pub created: bool,
    /// An incoming non-empty token differed from the stored non-empty token.
    /// The stored value was kept.
    pub token_mismatch: bool,
}

/// Transactional create-or-update keyed on
/// `(project_id, original_transaction_id)`.
///
/// Runs inside an IMMEDIATE transaction so concurrent events for the same
/// purchase identity serialize: exactly one INSERT ever happens, later
/// events become UPDATEs regardless of arrival order. The webhook-first /
/// client-verify-second race converges here.
///
/// Token binding: empty stored + non-empty incoming binds; differing
/// non-empty values keep the stored token and flag a mismatch; an empty
/// incoming receipt leaves the stored receipt untouched.
pub fn upsert_by_original(
    conn: &mut Connection,
    project_id: &str,
    tx_in: &NormalizedTransaction,
) -> Result<UpsertOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = now();

    let existing: Option<Subscription> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM subscription
             WHERE project_id = ?1 AND original_transaction_id = ?2",
            SUBSCRIPTION_COLS
        ),
        &[&project_id, &tx_in.original_transaction_id],
    )?;

    let outcome = match existing {
        None => {
            let id = gen_id();
            tx.execute(
                "INSERT INTO subscription (id, project_id, app_account_token, platform, plan,
                                           status, start_date, end_date, product_id,
                                           transaction_id, original_transaction_id, environment,
                                           purchase_date, expires_date, auto_renew,
                                           latest_receipt, latest_receipt_info,
                                           created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?18)",
                params![
                    &id,
                    project_id,
                    &tx_in.app_account_token,
                    tx_in.platform.as_str(),
                    &tx_in.plan,
                    tx_in.status.as_str(),
                    tx_in.start_date,
                    tx_in.end_date,
                    &tx_in.product_id,
                    &tx_in.transaction_id,
                    &tx_in.original_transaction_id,
                    tx_in.environment.as_str(),
                    tx_in.purchase_date,
                    tx_in.expires_date,
                    tx_in.auto_renew as i32,
                    &tx_in.latest_receipt,
                    &tx_in.latest_receipt_info,
                    now,
                ],
            )?;

            UpsertOutcome {
                subscription: Subscription {
                    id,
                    project_id: project_id.to_string(),
                    app_account_token: tx_in.app_account_token.clone(),
                    platform: tx_in.platform,
                    plan: tx_in.plan.clone(),
                    status: tx_in.status,
                    start_date: tx_in.start_date,
                    end_date: tx_in.end_date,
                    product_id: tx_in.product_id.clone(),
                    transaction_id: tx_in.transaction_id.clone(),
                    original_transaction_id: tx_in.original_transaction_id.clone(),
                    environment: tx_in.environment,
                    purchase_date: tx_in.purchase_date,
                    expires_date: tx_in.expires_date,
                    auto_renew: tx_in.auto_renew,
                    latest_receipt: tx_in.latest_receipt.clone(),
                    latest_receipt_info: tx_in.latest_receipt_info.clone(),
                    created_at: now,
                    updated_at: now,
                },
                created: true,
                token_mismatch: false,
            }
        }
        Some(mut existing) => {
            let mut token_mismatch = false;

            if existing.app_account_token.is_empty() {
                if !tx_in.app_account_token.is_empty() {
                    tracing::info!(
                        "Binding app_account_token to subscription - original_transaction_id: {}, app_account_token: {}",
                        tx_in.original_transaction_id,
                        tx_in.app_account_token
                    );
                    existing.app_account_token = tx_in.app_account_token.clone();
                }
            } else if !tx_in.app_account_token.is_empty()
                && existing.app_account_token != tx_in.app_account_token
            {
                // The stored token wins; a differing value here means either
                // data inconsistency or a concurrent conflict.
                tracing::error!(
                    "app_account_token mismatch - original_transaction_id: {}, stored: {}, incoming: {}. Keeping stored token.",
                    tx_in.original_transaction_id,
                    existing.app_account_token,
                    tx_in.app_account_token
                );
                token_mismatch = true;
            }

            existing.platform = tx_in.platform;
            existing.plan = tx_in.plan.clone();
            existing.status = tx_in.status;
            existing.start_date = tx_in.start_date;
            existing.end_date = tx_in.end_date;
            existing.product_id = tx_in.product_id.clone();
            existing.transaction_id = tx_in.transaction_id.clone();
            existing.environment = tx_in.environment;
            existing.purchase_date = tx_in.purchase_date;
            existing.expires_date = tx_in.expires_date;
            existing.auto_renew = tx_in.auto_renew;
            if !tx_in.latest_receipt.is_empty() {
                existing.latest_receipt = tx_in.latest_receipt.clone();
            }
            if !tx_in.latest_receipt_info.is_empty() {
                existing.latest_receipt_info = tx_in.latest_receipt_info.clone();
            }
            existing.updated_at = now;

            tx.execute(
                "UPDATE subscription
                 SET app_account_token = ?1, platform = ?2, plan = ?3, status = ?4,
                     start_date = ?5, end_date = ?6, product_id = ?7, transaction_id = ?8,
                     environment = ?9, purchase_date = ?10, expires_date = ?11,
                     auto_renew = ?12, latest_receipt = ?13, latest_receipt_info = ?14,
                     updated_at = ?15
                 WHERE id = ?16",
                params![
                    &existing.app_account_token,
                    existing.platform.as_str(),
                    &existing.plan,
                    existing.status.as_str(),
                    existing.start_date,
                    existing.end_date,
                    &existing.product_id,
                    &existing.transaction_id,
                    existing.environment.as_str(),
                    existing.purchase_date,
                    existing.expires_date,
                    existing.auto_renew as i32,
                    &existing.latest_receipt,
                    &existing.latest_receipt_info,
                    now,
                    &existing.id,
                ],
            )?;

            UpsertOutcome {
                subscription: existing,
                created: false,
                token_mismatch,
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

pub fn get_subscription_by_original(
    conn: &Connection,
    project_id: &str,
    original_transaction_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription
             WHERE project_id = ?1 AND original_transaction_id = ?2",
            SUBSCRIPTION_COLS
        ),
        &[&project_id, &original_transaction_id],
    )
}

/// The row backing "is this user live right now": active and unexpired.
pub fn find_active_subscription(
    conn: &Connection,
    project_id: &str,
    app_account_token: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription
             WHERE project_id = ?1 AND app_account_token = ?2
               AND status = 'active' AND expires_date > ?3
             ORDER BY expires_date DESC LIMIT 1",
            SUBSCRIPTION_COLS
        ),
        &[&project_id, &app_account_token, &now()],
    )
}

pub fn list_subscriptions_by_user(
    conn: &Connection,
    project_id: &str,
    app_account_token: &str,
) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription
             WHERE project_id = ?1 AND app_account_token = ?2
             ORDER BY created_at DESC",
            SUBSCRIPTION_COLS
        ),
        &[&project_id, &app_account_token],
    )
}

/// All subscriptions for a user across projects (history without app_id).
pub fn list_all_subscriptions_by_user(
    conn: &Connection,
    app_account_token: &str,
) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription WHERE app_account_token = ?1
             ORDER BY created_at DESC",
            SUBSCRIPTION_COLS
        ),
        &[&app_account_token],
    )
}

/// Global lookup by original transaction id (used by bind_account, where the
/// caller has no project context).
pub fn find_subscription_by_original(
    conn: &Connection,
    original_transaction_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription WHERE original_transaction_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&original_transaction_id],
    )
}

/// Android rows carry the purchase token in `latest_receipt`.
pub fn find_subscription_by_purchase_token(
    conn: &Connection,
    purchase_token: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription
             WHERE platform = 'android' AND latest_receipt = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&purchase_token],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    AlreadyBound,
    /// A different non-empty token is already stored; nothing was changed.
    Mismatch,
}

/// Set `app_account_token` on a located row when the stored value is empty.
/// A stored token is immutable: a differing incoming value is logged and
/// left untouched.
pub fn bind_token(
    conn: &mut Connection,
    subscription_id: &str,
    app_account_token: &str,
) -> Result<BindOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let stored: String = tx.query_row(
        "SELECT app_account_token FROM subscription WHERE id = ?1",
        [subscription_id],
        |row| row.get(0),
    )?;

    let outcome = if stored.is_empty() {
        tx.execute(
            "UPDATE subscription SET app_account_token = ?1, updated_at = ?2 WHERE id = ?3",
            params![app_account_token, now(), subscription_id],
        )?;
        BindOutcome::Bound
    } else if stored == app_account_token {
        BindOutcome::AlreadyBound
    } else {
        tracing::error!(
            "app_account_token mismatch on bind - subscription: {}, stored: {}, incoming: {}. Keeping stored token.",
            subscription_id,
            stored,
            app_account_token
        );
        BindOutcome::Mismatch
    };

    tx.commit()?;
    Ok(outcome)
}

/// Status-only update used by RTDN events, which carry no date information.
pub fn update_subscription_status(
    conn: &Connection,
    subscription_id: &str,
    status: SubscriptionStatus,
    auto_renew: Option<bool>,
) -> Result<Option<Subscription>> {
    match auto_renew {
        Some(ar) => {
            conn.execute(
                "UPDATE subscription SET status = ?1, auto_renew = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), ar as i32, now(), subscription_id],
            )?;
        }
        None => {
            conn.execute(
                "UPDATE subscription SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), subscription_id],
            )?;
        }
    }
    query_one(
        conn,
        &format!("SELECT {} FROM subscription WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&subscription_id],
    )
}

// ============ Transaction audit ============

/// Append a processed store event. Idempotent on `transaction_id` so a
/// replayed or re-verified transaction leaves a single audit row.
pub fn record_transaction(
    conn: &Connection,
    project_id: &str,
    app_account_token: &str,
    transaction_id: &str,
    original_transaction_id: &str,
    product_id: &str,
    kind: TransactionKind,
    environment: StoreEnvironment,
    purchased_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO transactions
             (id, project_id, app_account_token, transaction_id, original_transaction_id,
              product_id, kind, environment, purchased_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            gen_id(),
            project_id,
            app_account_token,
            transaction_id,
            original_transaction_id,
            product_id,
            kind.as_str(),
            environment.as_str(),
            purchased_at,
            now(),
        ],
    )?;
    Ok(())
}

/// Does the user hold a one-time (lifetime) purchase in this project?
pub fn has_lifetime_purchase(
    conn: &Connection,
    project_id: &str,
    app_account_token: &str,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions
         WHERE project_id = ?1 AND app_account_token = ?2 AND kind = 'non_consumable'",
        params![project_id, app_account_token],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_transactions_by_user(
    conn: &Connection,
    project_id: &str,
    app_account_token: &str,
) -> Result<Vec<StoreTransaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions
             WHERE project_id = ?1 AND app_account_token = ?2
             ORDER BY created_at DESC",
            TRANSACTION_COLS
        ),
        &[&project_id, &app_account_token],
    )
}
