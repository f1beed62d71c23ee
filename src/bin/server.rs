//! Telemon server entry point.
//!
//! Serves the HTTP API (and the gRPC API when a gRPC address is set) over
//! the configured repository until Ctrl+C or SIGTERM, then stops the
//! listeners and flushes the repository.

use clap::Parser;
use telemon::{
    codec::{Decryptor, Signer},
    config::{ServerArgs, ServerConfig},
    server::{AppState, TrustedSubnet, serve_grpc, serve_http, spawn_linked},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,telemon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load(ServerArgs::parse())?;
    tracing::info!(
        address = %config.address,
        grpc_address = ?config.grpc_address,
        store_interval = ?config.store_interval,
        file = ?config.file_storage_path,
        restore = config.restore,
        database = config.database_dsn.is_some(),
        trusted_subnet = ?config.trusted_subnet,
        "Telemon server starting"
    );

    let decryptor = config
        .crypto_key
        .as_ref()
        .map(Decryptor::from_pem_file)
        .transpose()?;
    let repo = config.repository().build().await?;
    let state = AppState::new(repo.clone())
        .with_verifier(config.signing_key().map(Signer::new))
        .with_decryptor(decryptor)
        .with_trusted_subnet(config.trusted_subnet.map(TrustedSubnet::new));

    let shutdown = CancellationToken::new();
    let http_listener = TcpListener::bind(&config.address).await?;
    let grpc_listener = match &config.grpc_address {
        Some(address) => Some(TcpListener::bind(address).await?),
        None => None,
    };

    let http = spawn_linked(
        &shutdown,
        serve_http(http_listener, state.clone(), shutdown.clone()),
    );
    let grpc = grpc_listener.map(|listener| {
        spawn_linked(&shutdown, serve_grpc(listener, state.clone(), shutdown.clone()))
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let http_result = http.await?;
    if let Err(e) = &http_result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    if let Some(grpc) = grpc {
        if let Err(e) = grpc.await? {
            tracing::error!(error = %e, "gRPC server failed");
        }
    }

    tracing::info!("Shutting down repository...");
    if let Err(e) = repo.stop().await {
        tracing::error!(error = %e, "Failed to stop repository");
    }

    http_result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
