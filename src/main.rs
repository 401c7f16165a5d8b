use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unionhub::appstore::{AppStoreClient, SignatureVerifier};
use unionhub::config::Config;
use unionhub::db::{create_pool, init_db, queries, AppState};
use unionhub::googleplay::UnconfiguredGooglePlay;
use unionhub::handlers;
use unionhub::models::CreateProject;
use unionhub::notifier::OutboundNotifier;
use unionhub::replay::{self, ReplayGuard};

#[derive(Parser, Debug)]
#[command(name = "unionhub")]
#[command(about = "Multi-tenant IAP trust hub")]
struct Cli {
    /// Seed the database with a dev project
    #[arg(long)]
    seed: bool,
}

/// Seeds a development project so webhooks and verifies have a tenant to
/// land on. Only runs when the project table is empty.
fn seed_dev_project(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_projects(&conn).expect("Failed to count projects");
    if count > 0 {
        tracing::info!("Projects already exist, skipping seed");
        return;
    }

    let api_key = uuid::Uuid::new_v4().to_string();
    let input = CreateProject {
        project_id: "dev".to_string(),
        project_name: "Dev Project".to_string(),
        api_key: api_key.clone(),
        bundle_id: Some("com.example.app".to_string()),
        package_name: Some("com.example.app".to_string()),
        callback_url: None,
        signing_secret: None,
        tenant_base_url: None,
        plan_map: Default::default(),
    };

    let project = queries::create_project(&conn, &input).expect("Failed to seed dev project");

    tracing::info!("============================================");
    tracing::info!("DEV PROJECT SEEDED");
    tracing::info!("Project ID: {}", project.project_id);
    tracing::info!("API Key: {}", api_key);
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unionhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");

    if config.auto_migrate {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    } else {
        tracing::info!("AUTO_MIGRATE disabled, skipping schema init");
    }

    if !config.appstore.is_configured() {
        tracing::warn!(
            "App Store API credentials not configured; iOS transaction verification will fail"
        );
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");

    let replay_guard = Arc::new(ReplayGuard::new());

    let state = AppState {
        db: db_pool,
        http: http.clone(),
        appstore: Arc::new(AppStoreClient::new(config.appstore.clone(), http)),
        signature_verifier: Arc::new(SignatureVerifier::new()),
        replay_guard: replay_guard.clone(),
        notifier: Arc::new(OutboundNotifier::new()),
        google_play: Arc::new(UnconfiguredGooglePlay),
    };

    if cli.seed {
        seed_dev_project(&state);
    }

    replay::spawn_sweeper(replay_guard);

    let app = Router::new()
        .merge(handlers::health_router())
        .merge(handlers::subscription::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::verify_apple::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("UnionHub server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
