//! Outbound webhook payload and signature laws.

mod common;

use common::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use unionhub::notifier::{compute_signature, WebhookPayload, SIGNATURE_HEADER, USER_AGENT};

fn sample_subscription() -> Subscription {
    Subscription {
        id: "sub-1".to_string(),
        project_id: "p1".to_string(),
        app_account_token: "11111111-1111-1111-1111-111111111111".to_string(),
        platform: Platform::Ios,
        plan: "monthly".to_string(),
        status: SubscriptionStatus::Active,
        start_date: 1_700_000_000,
        end_date: 1_702_592_000,
        product_id: "com.example.monthly".to_string(),
        transaction_id: "1000000000000001".to_string(),
        original_transaction_id: "1000000000000001".to_string(),
        environment: StoreEnvironment::Production,
        purchase_date: 1_700_000_000,
        expires_date: 1_702_592_000,
        auto_renew: true,
        latest_receipt: String::new(),
        latest_receipt_info: String::new(),
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

#[test]
fn payload_carries_the_contract_fields() {
    let payload = WebhookPayload::subscription_updated(&sample_subscription());
    let value: serde_json::Value = serde_json::to_value(&payload).unwrap();

    assert_eq!(value["event"], "subscription.updated");
    assert_eq!(value["transaction_id"], "1000000000000001");
    assert_eq!(value["original_transaction_id"], "1000000000000001");
    assert_eq!(
        value["app_account_token"],
        "11111111-1111-1111-1111-111111111111"
    );
    assert_eq!(value["status"], "active");
    assert_eq!(value["product_id"], "com.example.monthly");
    assert_eq!(value["expires_date"], "2023-12-14T22:13:20Z");
    assert_eq!(value["platform"], "ios");
    // Timestamp must parse as RFC 3339.
    let ts = value["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
}

#[test]
fn signature_round_trip_matches_independent_hmac() {
    let payload = WebhookPayload::subscription_updated(&sample_subscription());
    let body = serde_json::to_vec(&payload).unwrap();

    let header_value = compute_signature("whsec_tenant", &body);

    // Recompute with a separately-constructed HMAC, bit for bit.
    let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_tenant").unwrap();
    mac.update(&body);
    let expected = hex::encode(mac.finalize().into_bytes());

    assert_eq!(header_value, expected);
}

#[test]
fn signature_depends_on_body_and_secret() {
    let a = compute_signature("secret", b"{\"event\":\"subscription.updated\"}");
    let b = compute_signature("secret", b"{\"event\":\"subscription.deleted\"}");
    let c = compute_signature("other", b"{\"event\":\"subscription.updated\"}");
    assert_ne!(a, b);
    assert_ne!(a, c);
}

#[test]
fn wire_constants_match_the_contract() {
    assert_eq!(SIGNATURE_HEADER, "X-UnionHub-Signature");
    assert_eq!(USER_AGENT, "UnionHub-Webhook/1.0");
}
