use muster_broadcast::WsGateway;
use muster_core::{logging, Config};
use muster_gateway::{router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init_from_config(&config.logging);

    let state = Arc::new(AppState::new(config.clone())?);

    let gateway = Arc::new(WsGateway::new(
        Arc::clone(&state.hub),
        Arc::clone(&state.identities),
    ));
    let ws_addr = config.server.ws_addr;
    tokio::spawn(async move {
        if let Err(e) = gateway.run(ws_addr).await {
            error!(error = %e, "WebSocket gateway stopped");
        }
    });

    let listener = TcpListener::bind(config.server.http_addr).await?;
    info!(
        http_addr = %config.server.http_addr,
        ws_addr = %config.server.ws_addr,
        "Muster gateway listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Muster gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
