use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openoms_backend::{config::Config, database, handlers, AppState};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url, &config.pool).await?;

    database::migrate(&db_pool).await?;

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState::from_config(db_pool, &config, shutdown.clone())?);

    let app = handlers::router(app_state.clone()).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Automation service running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Draining background automation and webhook tasks");
    if tokio::time::timeout(DRAIN_TIMEOUT, app_state.drain()).await.is_err() {
        tracing::warn!("Background tasks still running after {:?}, cancelling", DRAIN_TIMEOUT);
        shutdown.cancel();
        app_state.drain().await;
    }

    Ok(())
}
