mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use reqwest::Client;

use crate::appstore::client::AppStoreClient;
use crate::appstore::signature::SignatureVerifier;
use crate::googleplay::GooglePlayVerifier;
use crate::notifier::OutboundNotifier;
use crate::replay::ReplayGuard;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state. Every collaborator is assembled once at process start
/// and passed down explicitly; no component reaches for ambient state.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Shared HTTP client for App Store calls and tenant lookups.
    pub http: Client,
    pub appstore: Arc<AppStoreClient>,
    pub signature_verifier: Arc<SignatureVerifier>,
    pub replay_guard: Arc<ReplayGuard>,
    pub notifier: Arc<OutboundNotifier>,
    pub google_play: Arc<dyn GooglePlayVerifier>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
    });
    Pool::builder().max_size(10).build(manager)
}
