use axum::Router;
use tokio::net::TcpListener;

use anyhow::anyhow;

use voxrelay::{ServerConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();
    println!("Starting server on {address}");

    // Create application state (initializes the ASR pool)
    let app_state = AppState::new(config).await;

    // Public health check route
    let public_routes = Router::new().route(
        "/",
        axum::routing::get(voxrelay::handlers::api::health_check),
    );

    // Combine all routes: public + api + websocket
    let app = public_routes
        .merge(routes::api::create_api_router())
        .merge(routes::ws::create_ws_router())
        .with_state(app_state.clone());

    // Create listener
    let listener = TcpListener::bind(&address).await?;

    println!("Server listening on {address}");

    // Start server; stop on ctrl-c so the pool can close its connections
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    app_state.pool.shutdown().await;

    Ok(())
}
