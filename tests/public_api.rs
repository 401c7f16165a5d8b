//! Public API surface: status, bind, history, health, and tenant auth.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use tower::util::ServiceExt;

fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .merge(unionhub::handlers::health_router())
        .merge(unionhub::handlers::subscription::router())
        .merge(unionhub::handlers::verify_apple::router(state.clone()))
        .with_state(state)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn seeded_state() -> (AppState, DbPool, std::path::PathBuf) {
    let (pool, path) = setup_file_db();
    {
        let conn = pool.get().unwrap();
        create_test_project(&conn, "p1", "com.example.app");
    }
    (make_app_state(pool.clone()), pool, path)
}

#[tokio::test]
async fn health_reports_ok() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "unionhub");

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn status_reports_inactive_without_subscription() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let (status, body) = send(
        &app,
        get("/api/subscription/status?user_id=USR-1&app_id=com.example.app&platform=ios"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["is_active"], false);
    assert_eq!(body["status"], "inactive");

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn status_reports_live_subscription() {
    let (state, pool, path) = seeded_state();
    {
        let mut conn = pool.get().unwrap();
        let mut tx = sample_transaction("st-1", "USR-1");
        tx.expires_date = chrono::Utc::now().timestamp() + 86_400;
        queries::upsert_by_original(&mut conn, "p1", &tx).unwrap();
    }
    let app = app(state);

    let (status, body) = send(
        &app,
        get("/api/subscription/status?user_id=USR-1&app_id=com.example.app&platform=ios"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["status"], "active");
    assert_eq!(body["product_id"], "com.example.monthly");

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn status_requires_user_and_app() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let (status, _) = send(&app, get("/api/subscription/status?user_id=USR-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn bind_account_attaches_user_to_webhook_created_row() {
    let (state, pool, path) = seeded_state();
    {
        let mut conn = pool.get().unwrap();
        let tx = sample_transaction("bind-1", "");
        queries::upsert_by_original(&mut conn, "p1", &tx).unwrap();
    }
    let app = app(state);

    let (status, body) = send(
        &app,
        post_json(
            "/api/subscription/bind_account",
            serde_json::json!({
                "user_id": "USR-42",
                "original_transaction_id": "bind-1"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let conn = pool.get().unwrap();
    let row = queries::get_subscription_by_original(&conn, "p1", "bind-1")
        .unwrap()
        .unwrap();
    assert_eq!(row.app_account_token, "USR-42");

    drop(conn);
    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn bind_account_conflicts_on_foreign_token() {
    let (state, pool, path) = seeded_state();
    {
        let mut conn = pool.get().unwrap();
        let tx = sample_transaction("bind-2", "USR-1");
        queries::upsert_by_original(&mut conn, "p1", &tx).unwrap();
    }
    let app = app(state);

    let (status, _) = send(
        &app,
        post_json(
            "/api/subscription/bind_account",
            serde_json::json!({
                "user_id": "USR-99",
                "original_transaction_id": "bind-2"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn bind_account_404s_on_unknown_subscription() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let (status, _) = send(
        &app,
        post_json(
            "/api/subscription/bind_account",
            serde_json::json!({
                "user_id": "USR-1",
                "original_transaction_id": "missing"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn history_lists_rows_newest_first() {
    let (state, pool, path) = seeded_state();
    {
        let mut conn = pool.get().unwrap();
        for original in ["h-1", "h-2"] {
            let tx = sample_transaction(original, "USR-1");
            queries::upsert_by_original(&mut conn, "p1", &tx).unwrap();
        }
    }
    let app = app(state);

    let (status, body) = send(
        &app,
        get("/api/subscription/history?user_id=USR-1&app_id=com.example.app"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["subscriptions"].as_array().unwrap().len(), 2);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn passive_restore_returns_stored_subscriptions() {
    let (state, pool, path) = seeded_state();
    {
        let mut conn = pool.get().unwrap();
        let mut tx = sample_transaction("r-1", "USR-1");
        tx.expires_date = chrono::Utc::now().timestamp() + 86_400;
        queries::upsert_by_original(&mut conn, "p1", &tx).unwrap();
    }
    let app = app(state);

    let (status, body) = send(
        &app,
        post_json(
            "/api/subscription/restore",
            serde_json::json!({
                "user_id": "USR-1",
                "app_id": "com.example.app",
                "platform": "ios"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["subscriptions"].as_array().unwrap().len(), 1);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn verify_requires_platform_evidence() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    // iOS with no signed transaction, transaction id, or receipt.
    let (status, _) = send(
        &app,
        post_json(
            "/api/subscription/verify",
            serde_json::json!({
                "platform": "ios",
                "user_id": "USR-1",
                "product_id": "com.example.monthly"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Android without a purchase token.
    let (status, _) = send(
        &app,
        post_json(
            "/api/subscription/verify",
            serde_json::json!({
                "platform": "android",
                "user_id": "USR-1",
                "product_id": "com.example.monthly"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn verify_resolves_project_from_signed_transaction_claims() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    // Unknown bundle id inside the signed transaction: resolution fails
    // before any store call.
    let jws_token = make_jws(&serde_json::json!({
        "transactionId": "t-1",
        "originalTransactionId": "t-1",
        "bundleId": "com.unknown.app",
    }));
    let (status, body) = send(
        &app,
        post_json(
            "/api/subscription/verify",
            serde_json::json!({
                "platform": "ios",
                "user_id": "USR-1",
                "product_id": "com.example.monthly",
                "signed_transaction": jws_token
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"]
        .as_str()
        .unwrap_or_default()
        .contains("com.unknown.app"));

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn server_verify_requires_credentials() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let (status, _) = send(
        &app,
        post_json(
            "/api/verify/apple",
            serde_json::json!({ "transaction_id": "t-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Wrong key is rejected.
    let request = Request::builder()
        .method("POST")
        .uri("/api/verify/apple")
        .header("Content-Type", "application/json")
        .header("X-Project-ID", "p1")
        .header("X-API-Key", "wrong")
        .body(Body::from(
            serde_json::json!({ "transaction_id": "t-1" }).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid credentials pass the middleware; the missing transaction id is
    // then the client's problem.
    let request = Request::builder()
        .method("POST")
        .uri("/api/verify/apple")
        .header("Content-Type", "application/json")
        .header("X-Project-ID", "p1")
        .header("X-API-Key", "key-p1")
        .body(Body::from(serde_json::json!({ "transaction_id": "" }).to_string()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    drop(pool);
    drop_file_db(&path);
}

#[tokio::test]
async fn credentials_accepted_as_query_parameters() {
    let (state, pool, path) = seeded_state();
    let app = app(state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/verify/apple?project_id=p1&api_key=key-p1")
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::json!({ "transaction_id": "" }).to_string()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    // Past auth, failing on the empty transaction id.
    assert_eq!(status, StatusCode::BAD_REQUEST);

    drop(pool);
    drop_file_db(&path);
}
