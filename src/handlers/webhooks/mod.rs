//! Store-side webhook ingestion: Apple ASSN V2 and Google Play RTDN.

pub mod apple;
pub mod google;

use axum::routing::post;
use axum::Router;

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhook/apple/production",
            post(apple::appstore_production_webhook),
        )
        .route(
            "/webhook/apple/sandbox",
            post(apple::appstore_sandbox_webhook),
        )
        .route("/webhook/google", post(google::google_play_webhook))
}
