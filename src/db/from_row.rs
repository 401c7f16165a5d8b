//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROJECT_COLS: &str =
    "id, project_id, project_name, api_key, bundle_id, package_name, callback_url, \
     signing_secret, tenant_base_url, plan_map, is_active, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str =
    "id, project_id, app_account_token, platform, plan, status, start_date, end_date, \
     product_id, transaction_id, original_transaction_id, environment, purchase_date, \
     expires_date, auto_renew, latest_receipt, latest_receipt_info, created_at, updated_at";

pub const TRANSACTION_COLS: &str =
    "id, project_id, app_account_token, transaction_id, original_transaction_id, \
     product_id, kind, environment, purchased_at, created_at";

// ============ FromRow Implementations ============

impl FromRow for Project {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let plan_map_str: String = row.get(9)?;
        Ok(Project {
            id: row.get(0)?,
            project_id: row.get(1)?,
            project_name: row.get(2)?,
            api_key: row.get(3)?,
            bundle_id: row.get(4)?,
            package_name: row.get(5)?,
            callback_url: row.get(6)?,
            signing_secret: row.get(7)?,
            tenant_base_url: row.get(8)?,
            plan_map: serde_json::from_str(&plan_map_str).unwrap_or_default(),
            is_active: row.get::<_, i32>(10)? != 0,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            project_id: row.get(1)?,
            app_account_token: row.get(2)?,
            platform: row.get::<_, String>(3)?.parse::<Platform>().unwrap(),
            plan: row.get(4)?,
            status: row
                .get::<_, String>(5)?
                .parse::<SubscriptionStatus>()
                .unwrap(),
            start_date: row.get(6)?,
            end_date: row.get(7)?,
            product_id: row.get(8)?,
            transaction_id: row.get(9)?,
            original_transaction_id: row.get(10)?,
            environment: row
                .get::<_, String>(11)?
                .parse::<StoreEnvironment>()
                .unwrap(),
            purchase_date: row.get(12)?,
            expires_date: row.get(13)?,
            auto_renew: row.get::<_, i32>(14)? != 0,
            latest_receipt: row.get(15)?,
            latest_receipt_info: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

impl FromRow for StoreTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(StoreTransaction {
            id: row.get(0)?,
            project_id: row.get(1)?,
            app_account_token: row.get(2)?,
            transaction_id: row.get(3)?,
            original_transaction_id: row.get(4)?,
            product_id: row.get(5)?,
            kind: row.get::<_, String>(6)?.parse::<TransactionKind>().unwrap(),
            environment: row
                .get::<_, String>(7)?
                .parse::<StoreEnvironment>()
                .unwrap(),
            purchased_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}
