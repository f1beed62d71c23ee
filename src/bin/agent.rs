//! Telemon agent entry point.
//!
//! Samples runtime statistics and reports them to a collector until
//! Ctrl+C or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use telemon::{
    agent::{DEFAULT_STOP_DEADLINE, RuntimeSampler, Scheduler},
    codec::{Codec, Encryptor, Signer},
    config::{AgentArgs, AgentConfig},
    delivery::{
        DEFAULT_ATTEMPT_TIMEOUT, DeliveryClient, GrpcTransport, HttpTransport, Transport,
        outbound_ip,
    },
    retry::RetryPolicy,
};
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

    let config = AgentConfig::load(AgentArgs::parse())?;
    tracing::info!(
        address = %config.address,
        grpc_address = ?config.grpc_address,
        poll = ?config.poll_interval,
        report = ?config.report_interval,
        rate_limit = config.rate_limit,
        signed = config.signing_key().is_some(),
        encrypted = config.crypto_key.is_some(),
        "Telemon agent starting"
    );

    let transport = build_transport(&config)?;
    let client = DeliveryClient::with_options(
        transport,
        config.rate_limit,
        RetryPolicy::default(),
        DEFAULT_ATTEMPT_TIMEOUT,
    );
    let handle = Scheduler::new(RuntimeSampler::new(), client)
        .start(config.poll_interval, config.report_interval)?;

    shutdown_signal().await;

    tracing::info!("Stopping scheduler...");
    if !handle.stop(DEFAULT_STOP_DEADLINE).await? {
        tracing::warn!("Some reports were still in flight at shutdown");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_transport(config: &AgentConfig) -> Result<Arc<dyn Transport>, Box<dyn std::error::Error>> {
    let signer = config.signing_key().map(Signer::new);

    if let Some(address) = &config.grpc_address {
        let transport = GrpcTransport::new(address)?
            .with_signer(signer)
            .with_real_ip(outbound_ip(host_port(address)));
        return Ok(Arc::new(transport));
    }

    let mut codec = Codec::new();
    if let Some(signer) = signer {
        codec = codec.with_signer(signer);
    }
    if let Some(path) = &config.crypto_key {
        codec = codec.with_encryptor(Encryptor::from_pem_file(path)?);
    }
    let transport = HttpTransport::new(&config.address, codec)?
        .with_real_ip(outbound_ip(host_port(&config.address)));
    tracing::info!(url = transport.url(), "Reporting over HTTP");
    Ok(Arc::new(transport))
}

/// `host:port` part of an address that may carry a scheme or path.
fn host_port(address: &str) -> &str {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
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
