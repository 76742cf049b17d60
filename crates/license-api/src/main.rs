//! `license-api` binary entry point.
//!
//! Starts the Axum HTTP server over the license-issuance and
//! key-management trust plane. Binds to `API_PORT` (default 8080).

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = license_api::config::Config::from_env().map_err(|e| {
        tracing::error!("configuration error: {e}");
        e
    })?;

    let port = config.api_port;

    let state = license_api::bootstrap::bootstrap(config).await.map_err(|e| {
        tracing::error!("bootstrap failed: {e}");
        e
    })?;

    let app = license_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "license-api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
