//! Scriba transcription server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use scriba_core::StubFactory;
use scriba_server::config::ServerConfig;
use scriba_server::{build_state, router};

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SCRIBA_CONFIG").ok())
        .unwrap_or_else(|| "scriba.yaml".into())
        .into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load(&config_path())?;
    let (host, port) = config.bind_addr();

    // The stub factory keeps the server runnable without model weights;
    // deployments with real bindings swap in their own factory here.
    let state = build_state(config, Box::new(StubFactory));
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(host = host.as_str(), port, "scriba server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutting down — releasing models");
    state.manager.unload_all();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
    }
}
