use chat_relay::{AppError, Config, serve};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::load()?);
    let ct = CancellationToken::new();

    tokio::spawn(shutdown_task(ct.clone()));

    let listener = TcpListener::bind(SocketAddr::new(config.host, config.port)).await?;
    serve(listener, config, ct).await
}

async fn shutdown_task(ct: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutting down...");
            ct.cancel();
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }
}
