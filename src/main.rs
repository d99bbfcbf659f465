use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use summary_relay::{AppState, api::routes::create_router, config::Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::load()?;
    let server_addr = config.server_addr;

    // Create application state
    let app_state = AppState::new(config);

    // Relay per-URL progress updates onto the client channel
    let _progress_relay = app_state.bridge.spawn_progress_relay(&app_state.progress);

    // Build the router with routes
    let app = create_router(app_state);

    // Create the listener
    let listener = TcpListener::bind(server_addr).await?;

    tracing::info!(%server_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
