//! Status machine sequences applied through the store: the event stream a
//! real subscription produces must leave the projection in the right state.

mod common;

use common::*;
use unionhub::status::{self, AppleTransition};

fn claims_for(
    transaction_id: &str,
    original: &str,
    expires_ms: i64,
    auto_renew: i64,
    token: &str,
) -> unionhub::appstore::TransactionClaims {
    let jws_token = make_jws(&serde_json::json!({
        "transactionId": transaction_id,
        "originalTransactionId": original,
        "productId": "com.example.monthly",
        "bundleId": "com.example.app",
        "purchaseDate": 1700000000000i64,
        "expiresDate": expires_ms,
        "autoRenewStatus": auto_renew,
        "environment": "Production",
        "appAccountToken": token,
    }));
    jws::parse_transaction_claims(&jws_token).unwrap()
}

fn apply(
    conn: &mut rusqlite::Connection,
    project: &Project,
    notification_type: &str,
    claims: &unionhub::appstore::TransactionClaims,
) -> Subscription {
    let transition = status::apple_transition(notification_type).unwrap();
    let normalized = status::normalize_apple_event(
        transition,
        claims,
        project.plan_for_product(&claims.product_id),
        claims.app_account_token.clone(),
        StoreEnvironment::Production,
    );
    queries::upsert_by_original(conn, &project.project_id, &normalized)
        .unwrap()
        .subscription
}

#[test]
fn initial_purchase_creates_active_row() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let claims = claims_for(
        "1000000000000001",
        "1000000000000001",
        1_702_592_000_000,
        1,
        "11111111-1111-1111-1111-111111111111",
    );
    let sub = apply(&mut conn, &project, "SUBSCRIBED", &claims);

    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.platform, Platform::Ios);
    assert_eq!(sub.environment, StoreEnvironment::Production);
    assert_eq!(
        sub.app_account_token,
        "11111111-1111-1111-1111-111111111111"
    );
    assert_eq!(sub.expires_date, 1_702_592_000);
    assert!(sub.auto_renew);
    assert_eq!(
        unionhub::notifier::rfc3339(sub.expires_date),
        "2023-12-14T22:13:20Z"
    );
}

#[test]
fn renewal_then_refund_sequence() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");
    let original = "1000000000000001";
    let token = "11111111-1111-1111-1111-111111111111";

    // SUBSCRIBED -> active
    let sub = apply(
        &mut conn,
        &project,
        "SUBSCRIBED",
        &claims_for(original, original, 1_702_592_000_000, 1, token),
    );
    assert_eq!(sub.status, SubscriptionStatus::Active);

    // DID_RENEW -> active with pushed-out expiry
    let sub = apply(
        &mut conn,
        &project,
        "DID_RENEW",
        &claims_for("1000000000000002", original, 1_705_184_000_000, 1, token),
    );
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.expires_date, 1_705_184_000);
    assert!(sub.auto_renew);

    // DID_REFUND -> refunded, auto-renew off
    let sub = apply(
        &mut conn,
        &project,
        "DID_REFUND",
        &claims_for("1000000000000002", original, 1_705_184_000_000, 1, token),
    );
    assert_eq!(sub.status, SubscriptionStatus::Refunded);
    assert!(!sub.auto_renew);
    assert_eq!(sub.expires_date, 1_705_184_000);

    // Still a single row after the whole sequence.
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subscription WHERE original_transaction_id = ?1",
            [original],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn cancel_and_expiry_transitions() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    let sub = apply(
        &mut conn,
        &project,
        "SUBSCRIBED",
        &claims_for("t1", "t1", 1_702_592_000_000, 1, "USR-1"),
    );
    assert!(sub.auto_renew);

    let sub = apply(
        &mut conn,
        &project,
        "DID_CANCEL",
        &claims_for("t1", "t1", 1_702_592_000_000, 1, "USR-1"),
    );
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    assert!(!sub.auto_renew);

    let sub = apply(
        &mut conn,
        &project,
        "EXPIRED",
        &claims_for("t1", "t1", 1_702_592_000_000, 0, "USR-1"),
    );
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    assert!(!sub.auto_renew);
}

#[test]
fn failed_renewal_marks_row_failed() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    apply(
        &mut conn,
        &project,
        "SUBSCRIBED",
        &claims_for("t2", "t2", 1_702_592_000_000, 1, "USR-1"),
    );
    let sub = apply(
        &mut conn,
        &project,
        "DID_FAIL_TO_RENEW",
        &claims_for("t2", "t2", 1_702_592_000_000, 1, "USR-1"),
    );
    assert_eq!(sub.status, SubscriptionStatus::Failed);
    assert!(!sub.auto_renew);
}

#[test]
fn webhook_events_commute_with_client_verify_on_token() {
    let mut conn = setup_test_db();
    let project = create_test_project(&conn, "p1", "com.example.app");

    // Webhook first, empty token.
    apply(
        &mut conn,
        &project,
        "SUBSCRIBED",
        &claims_for("t3", "t3", 1_702_592_000_000, 1, ""),
    );

    // Client verify binds USR-42 (simulated as the verify-path upsert).
    let mut verify_tx = sample_transaction("t3", "USR-42");
    verify_tx.transaction_id = "t3".to_string();
    let outcome = queries::upsert_by_original(&mut conn, &project.project_id, &verify_tx).unwrap();
    assert_eq!(outcome.subscription.app_account_token, "USR-42");

    // Later webhook with a different token cannot steal the row.
    let sub = apply(
        &mut conn,
        &project,
        "DID_RENEW",
        &claims_for("t4", "t3", 1_705_184_000_000, 1, "SOMEONE-ELSE"),
    );
    assert_eq!(sub.app_account_token, "USR-42");
}

#[test]
fn transition_table_is_exhaustive_for_known_types() {
    for ty in [
        "INITIAL_BUY",
        "SUBSCRIBED",
        "DID_RENEW",
        "RENEWAL_EXTENDED",
        "DID_FAIL_TO_RENEW",
        "DID_CANCEL",
        "DID_REFUND",
        "REVOKE",
        "EXPIRED",
        "GRACE_PERIOD_EXPIRED",
    ] {
        assert!(status::apple_transition(ty).is_some(), "type: {}", ty);
    }
    assert_eq!(status::apple_transition("PRICE_INCREASE"), None);
    assert!(status::apple_transition("SUBSCRIBED")
        .unwrap()
        .creates());
    assert!(!matches!(
        status::apple_transition("DID_RENEW").unwrap(),
        AppleTransition::Subscribe
    ));
}
