use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Tenants (registered application scopes)
        CREATE TABLE IF NOT EXISTS project (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL UNIQUE,
            project_name TEXT NOT NULL,
            api_key TEXT NOT NULL UNIQUE,
            bundle_id TEXT,                       -- iOS identity
            package_name TEXT,                    -- Android identity
            callback_url TEXT,                    -- tenant webhook endpoint
            signing_secret TEXT,                  -- HMAC secret for outbound webhooks
            tenant_base_url TEXT,                 -- app-account-token resolution endpoint
            plan_map TEXT NOT NULL DEFAULT '{}',  -- product_id -> plan, JSON
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_project_bundle ON project(bundle_id)
            WHERE bundle_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_project_package ON project(package_name)
            WHERE package_name IS NOT NULL;

        -- Subscription projection, one row per purchase identity
        CREATE TABLE IF NOT EXISTS subscription (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            app_account_token TEXT NOT NULL DEFAULT '',
            platform TEXT NOT NULL DEFAULT 'ios' CHECK (platform IN ('ios', 'android')),
            plan TEXT NOT NULL DEFAULT 'basic',
            status TEXT NOT NULL,
            start_date INTEGER NOT NULL DEFAULT 0,
            end_date INTEGER NOT NULL DEFAULT 0,
            product_id TEXT NOT NULL DEFAULT '',
            transaction_id TEXT NOT NULL,
            original_transaction_id TEXT NOT NULL,
            environment TEXT NOT NULL DEFAULT 'production'
                CHECK (environment IN ('sandbox', 'production')),
            purchase_date INTEGER NOT NULL DEFAULT 0,
            expires_date INTEGER NOT NULL DEFAULT 0,
            auto_renew INTEGER NOT NULL DEFAULT 0,
            latest_receipt TEXT NOT NULL DEFAULT '',
            latest_receipt_info TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(project_id, original_transaction_id)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscription_transaction
            ON subscription(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_subscription_token
            ON subscription(project_id, app_account_token);
        CREATE INDEX IF NOT EXISTS idx_subscription_expires
            ON subscription(expires_date);

        -- Append-only audit of processed store events
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            app_account_token TEXT NOT NULL DEFAULT '',
            transaction_id TEXT NOT NULL UNIQUE,
            original_transaction_id TEXT NOT NULL DEFAULT '',
            product_id TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL CHECK (kind IN ('subscription', 'non_consumable')),
            environment TEXT NOT NULL DEFAULT 'production',
            purchased_at INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_token
            ON transactions(project_id, app_account_token, kind);
        "#,
    )
}
