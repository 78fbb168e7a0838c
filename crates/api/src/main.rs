//! Courier API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::streams::RedisStreamBroker;
use courier_publisher::publisher::{DEFAULT_CAPACITY, NotificationPublisher};

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courier_api=debug,courier_publisher=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Courier API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect the broker
    let broker = RedisStreamBroker::connect(&config.redis_url).await?;

    let (publisher, publish_task) = NotificationPublisher::spawn(
        broker,
        config.notification_topic.clone(),
        DEFAULT_CAPACITY,
    );

    // Build application state
    let port = config.api_port;
    let state = AppState::new(publisher, config)?;

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    // The router is gone, so the publish task drains its queue and exits
    publish_task.await?;
    tracing::info!("Courier API server stopped.");

    Ok(())
}
