//! Subscription store invariants: single row per purchase identity, token
//! immutability, and webhook/client-verify convergence.

mod common;

use common::*;

fn count_rows(conn: &rusqlite::Connection, project_id: &str, original: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM subscription
         WHERE project_id = ?1 AND original_transaction_id = ?2",
        rusqlite::params![project_id, original],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn upsert_creates_then_updates_a_single_row() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let tx = sample_transaction("1000000000000001", "");
    let first = queries::upsert_by_original(&mut conn, &project.project_id, &tx).unwrap();
    assert!(first.created);

    let mut renewal = sample_transaction("1000000000000001", "");
    renewal.transaction_id = "1000000000000002".to_string();
    renewal.expires_date = 1_705_184_000;
    let second = queries::upsert_by_original(&mut conn, &project.project_id, &renewal).unwrap();
    assert!(!second.created);
    assert_eq!(second.subscription.id, first.subscription.id);
    assert_eq!(second.subscription.expires_date, 1_705_184_000);
    assert_eq!(second.subscription.transaction_id, "1000000000000002");

    assert_eq!(count_rows(&conn, "p1", "1000000000000001"), 1);
}

#[test]
fn empty_token_binds_on_later_event() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    // Webhook arrives first with no token.
    let webhook = sample_transaction("2000", "");
    let first = queries::upsert_by_original(&mut conn, &project.project_id, &webhook).unwrap();
    assert!(first.subscription.app_account_token.is_empty());

    // Client verify carries the user's UUID.
    let verify = sample_transaction("2000", "USR-42");
    let second = queries::upsert_by_original(&mut conn, &project.project_id, &verify).unwrap();
    assert!(!second.created);
    assert_eq!(second.subscription.app_account_token, "USR-42");
    assert!(!second.token_mismatch);
}

#[test]
fn bound_token_is_immutable() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let verify = sample_transaction("3000", "USR-42");
    queries::upsert_by_original(&mut conn, &project.project_id, &verify).unwrap();

    // A later event with a different non-empty token must not overwrite.
    let conflicting = sample_transaction("3000", "USR-99");
    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &conflicting).unwrap();
    assert!(outcome.token_mismatch);
    assert_eq!(outcome.subscription.app_account_token, "USR-42");

    // Same token is not a mismatch.
    let same = sample_transaction("3000", "USR-42");
    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &same).unwrap();
    assert!(!outcome.token_mismatch);
}

#[test]
fn empty_incoming_receipt_preserves_stored_receipt() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let mut verify = sample_transaction("4000", "USR-1");
    verify.latest_receipt = "receipt-blob".to_string();
    verify.latest_receipt_info = "{\"raw\":true}".to_string();
    queries::upsert_by_original(&mut conn, &project.project_id, &verify).unwrap();

    // Webhook events carry no receipt.
    let webhook = sample_transaction("4000", "");
    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &webhook).unwrap();
    assert_eq!(outcome.subscription.latest_receipt, "receipt-blob");
    assert_eq!(outcome.subscription.latest_receipt_info, "{\"raw\":true}");
}

#[test]
fn find_active_requires_live_expiry() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let now = chrono::Utc::now().timestamp();

    let mut live = sample_transaction("5000", "USR-1");
    live.expires_date = now + 86_400;
    queries::upsert_by_original(&mut conn, &project.project_id, &live).unwrap();

    let found = queries::find_active_subscription(&conn, "p1", "USR-1").unwrap();
    assert!(found.is_some());

    let mut stale = sample_transaction("6000", "USR-2");
    stale.expires_date = now - 86_400;
    queries::upsert_by_original(&mut conn, &project.project_id, &stale).unwrap();

    let found = queries::find_active_subscription(&conn, "p1", "USR-2").unwrap();
    assert!(found.is_none(), "active status with past expiry is not live");
}

#[test]
fn bind_token_only_fills_empty_rows() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let webhook = sample_transaction("7000", "");
    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &webhook).unwrap();
    let id = outcome.subscription.id.clone();

    assert_eq!(
        queries::bind_token(&mut conn, &id, "USR-42").unwrap(),
        queries::BindOutcome::Bound
    );
    assert_eq!(
        queries::bind_token(&mut conn, &id, "USR-42").unwrap(),
        queries::BindOutcome::AlreadyBound
    );
    assert_eq!(
        queries::bind_token(&mut conn, &id, "USR-99").unwrap(),
        queries::BindOutcome::Mismatch
    );

    let row = queries::get_subscription_by_original(&conn, "p1", "7000")
        .unwrap()
        .unwrap();
    assert_eq!(row.app_account_token, "USR-42");
}

#[test]
fn concurrent_upserts_converge_to_one_row() {
    let (pool, path) = setup_file_db();
    {
        let conn = pool.get().unwrap();
        create_test_project(&conn, "p1", "com.example.app");
    }

    // Webhook-shaped event (no token) and client-verify-shaped event
    // (token USR-42) race on the same purchase identity.
    let mut handles = Vec::new();
    for token in ["", "USR-42"] {
        let pool = pool.clone();
        let token = token.to_string();
        handles.push(std::thread::spawn(move || {
            let mut conn = pool.get().unwrap();
            let tx = sample_transaction("8000", &token);
            queries::upsert_by_original(&mut conn, "p1", &tx).unwrap()
        }));
    }

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Exactly one INSERT and one UPDATE, in either order.
    assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.created).count(), 1);

    let conn = pool.get().unwrap();
    assert_eq!(count_rows(&conn, "p1", "8000"), 1);

    let row = queries::get_subscription_by_original(&conn, "p1", "8000")
        .unwrap()
        .unwrap();
    assert_eq!(row.app_account_token, "USR-42");
    assert_eq!(row.status, SubscriptionStatus::Active);

    drop(conn);
    drop(pool);
    drop_file_db(&path);
}

#[test]
fn android_rows_are_found_by_purchase_token() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let mut tx = sample_transaction("9000", "USR-1");
    tx.platform = Platform::Android;
    tx.latest_receipt = "gp-token-1".to_string();
    queries::upsert_by_original(&mut conn, &project.project_id, &tx).unwrap();

    let found = queries::find_subscription_by_purchase_token(&conn, "gp-token-1")
        .unwrap()
        .unwrap();
    assert_eq!(found.original_transaction_id, "9000");

    assert!(queries::find_subscription_by_purchase_token(&conn, "unknown")
        .unwrap()
        .is_none());
}

#[test]
fn lifetime_purchase_is_visible_through_audit_trail() {
    let conn = setup_test_db();
    create_test_project(&conn, "p1", "com.example.app");

    assert!(!queries::has_lifetime_purchase(&conn, "p1", "USR-1").unwrap());

    queries::record_transaction(
        &conn,
        "p1",
        "USR-1",
        "tx-life-1",
        "tx-life-1",
        "com.example.lifetime",
        TransactionKind::NonConsumable,
        StoreEnvironment::Production,
        1_700_000_000,
    )
    .unwrap();

    assert!(queries::has_lifetime_purchase(&conn, "p1", "USR-1").unwrap());

    // Replayed event leaves a single audit row.
    queries::record_transaction(
        &conn,
        "p1",
        "USR-1",
        "tx-life-1",
        "tx-life-1",
        "com.example.lifetime",
        TransactionKind::NonConsumable,
        StoreEnvironment::Production,
        1_700_000_000,
    )
    .unwrap();

    let rows = queries::list_transactions_by_user(&conn, "p1", "USR-1").unwrap();
    assert_eq!(rows.len(), 1);
}
