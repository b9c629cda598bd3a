//! Application entry point and server initialization
//!
//! Loads environment configuration, opens the database, runs the
//! recovery sweep for pending scheduled posts, and starts the HTTP
//! server with graceful shutdown support.

use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod delivery;
mod error;
mod handler;
mod metrics;
mod middleware;
mod model;
mod rewriter;
mod route;
mod scheduler;
mod store;

use config::Config;
use database::{init_db, AppState};
use delivery::{DeliverySink, TelegramSink};
use metrics::Metrics;
use rewriter::{HttpRedirectResolver, RedirectResolver};
use route::create_app;
use scheduler::Scheduler;
use store::ScheduleStore;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if it exists
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter("afflink=debug,tower_http=debug")
        .init();

    let config = Arc::new(Config::from_env().expect("Invalid configuration"));

    let db = init_db(&config.database_path).expect("Failed to initialize database");
    let store = ScheduleStore::new(Arc::new(db));

    let metrics = Arc::new(Metrics::default());
    let resolver: Arc<dyn RedirectResolver> = Arc::new(HttpRedirectResolver::new());
    // The sink is only reached when a target channel is configured, in
    // which case the credential is guaranteed present by Config.
    let sink: Arc<dyn DeliverySink> = Arc::new(TelegramSink::new(
        config.bot_credential.clone().unwrap_or_default(),
    ));

    let scheduler = Scheduler::new(
        store,
        Arc::clone(&sink),
        Arc::clone(&resolver),
        Arc::clone(&config),
        Arc::clone(&metrics),
    );

    // Re-arm timers for posts scheduled before the last shutdown. Posts
    // whose target time already passed are delivered immediately.
    let recovered = scheduler
        .recover()
        .expect("Failed to recover pending scheduled posts");
    tracing::info!(recovered, "startup recovery sweep complete");

    let state = AppState {
        config: Arc::clone(&config),
        metrics,
        scheduler,
        resolver,
        sink,
    };

    let app = create_app(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    println!("🚀 Server running at http://localhost:{}", config.port);
    println!("📂 Using database: {}", config.database_path);
    println!("🏷️ Affiliate tag: {}", config.affiliate_tag);

    // The server continues running until it receives SIGTERM or SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Resolves when a shutdown signal is received:
/// - SIGINT (Ctrl+C) from the terminal
/// - SIGTERM (common in Docker/Kubernetes)
///
/// Open connections are then allowed to complete and database
/// transactions are properly closed before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    println!("\n🛑 Shutdown signal received, stopping server.");
}
