//! Test utilities and fixtures for UnionHub integration tests

#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusqlite::Connection;

pub use unionhub::appstore::jws;
use unionhub::appstore::{AppStoreClient, SignatureVerifier};
use unionhub::config::AppStoreConfig;
pub use unionhub::db::{create_pool, init_db, queries, AppState, DbPool};
use unionhub::googleplay::UnconfiguredGooglePlay;
pub use unionhub::models::*;
use unionhub::notifier::OutboundNotifier;
use unionhub::replay::ReplayGuard;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create a file-backed pool for tests that need shared connections
/// (concurrency tests). The caller removes the file via `drop_file_db`.
pub fn setup_file_db() -> (DbPool, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("unionhub-test-{}.db", uuid::Uuid::new_v4()));
    let pool = create_pool(path.to_str().unwrap()).expect("Failed to create pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    (pool, path)
}

pub fn drop_file_db(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
}

/// Assemble an application state over a file-backed pool. The App Store
/// client is unconfigured, so paths that reach out to Apple fail fast.
pub fn make_app_state(pool: DbPool) -> AppState {
    let http = reqwest::Client::new();
    AppState {
        db: pool,
        http: http.clone(),
        appstore: Arc::new(AppStoreClient::new(AppStoreConfig::default(), http)),
        signature_verifier: Arc::new(SignatureVerifier::new()),
        replay_guard: Arc::new(ReplayGuard::new()),
        notifier: Arc::new(OutboundNotifier::new()),
        google_play: Arc::new(UnconfiguredGooglePlay),
    }
}

/// Create a test project with an iOS bundle id
pub fn create_test_project(conn: &Connection, project_id: &str, bundle_id: &str) -> Project {
    let input = CreateProject {
        project_id: project_id.to_string(),
        project_name: format!("Test Project {}", project_id),
        api_key: format!("key-{}", project_id),
        bundle_id: Some(bundle_id.to_string()),
        package_name: Some(format!("android.{}", bundle_id)),
        callback_url: None,
        signing_secret: Some("test-secret".to_string()),
        tenant_base_url: None,
        plan_map: Default::default(),
    };
    queries::create_project(conn, &input).expect("Failed to create test project")
}

/// Build an unsigned JWS carrying the given claims (the decoder only reads
/// the payload segment)
pub fn make_jws(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.signature", header, payload)
}

/// A normalized transaction resembling scenario-1's initial purchase
pub fn sample_transaction(original_transaction_id: &str, token: &str) -> NormalizedTransaction {
    NormalizedTransaction {
        app_account_token: token.to_string(),
        platform: Platform::Ios,
        plan: "monthly".to_string(),
        status: SubscriptionStatus::Active,
        start_date: 1_700_000_000,
        end_date: 1_702_592_000,
        product_id: "com.example.monthly".to_string(),
        transaction_id: original_transaction_id.to_string(),
        original_transaction_id: original_transaction_id.to_string(),
        environment: StoreEnvironment::Production,
        purchase_date: 1_700_000_000,
        expires_date: 1_702_592_000,
        auto_renew: true,
        latest_receipt: String::new(),
        latest_receipt_info: String::new(),
    }
}
