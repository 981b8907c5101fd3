use std::time::Duration;

use phishguard::{app, build_state, spawn_cache_purge, AppConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads RUST_LOG, defaults to info.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    let port = config.listen_port;
    let state = build_state(config)?;
    tracing::info!(classifier = %state.classifier_url, "phishing guard starting");
    let _purge = spawn_cache_purge(&state, Duration::from_secs(60));
    let app = app(state);

    // Local companion service only; the browser shim talks to loopback.
    let addr: std::net::SocketAddr = ([127, 0, 0, 1], port).into();

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
