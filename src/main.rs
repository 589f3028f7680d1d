use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volunteer_system::{
    config::Config, controllers, services::sync::sync_salesforce_events, AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Volunteer Events API");

    let state = AppState::new(config.clone())
        .await
        .expect("Failed to connect to database");
    info!("Database connected");

    state
        .db
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    // --- Start background tasks ---

    // Periodic CRM sync, sharing the entry point with the manual trigger.
    // Overlapping runs are possible; there is no fencing between the timer
    // and the HTTP endpoint.
    if state.config.sync.scheduler_enabled {
        let sync_state = state.clone();
        let interval = Duration::from_secs(state.config.sync.interval_secs);
        task::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let outcome =
                    sync_salesforce_events(&sync_state.db.pool, &sync_state.salesforce).await;
                if !outcome.success {
                    error!(
                        "Scheduled sync failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        });
        info!(
            "Sync scheduler enabled (every {}s)",
            state.config.sync.interval_secs
        );
    }

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Volunteer Events API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .await
        .unwrap();
}
