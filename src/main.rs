// Comment Stream Server - posts, threaded comments, real-time fan-out

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use comment_stream::{api::create_router, app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        backend = %config.storage.backend,
        "initializing storage backend"
    );

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;

    // Build main application router
    let app = create_router(app_state.clone()).layer(CorsLayer::permissive());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("comment stream server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain live subscribers before the storage goes away.
    app_state.broadcaster.close().await;
    app_state.storage.close().await?;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
