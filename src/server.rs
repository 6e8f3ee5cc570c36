use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fiat_shamir_auth::{AuthServer, Modulus, ServerConfig};

#[derive(Parser)]
#[command(name = "fs-auth-server")]
#[command(about = "Fiat-Shamir zero-knowledge authentication server")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 12345)]
    port: u16,

    /// Bit length of the generated modulus N
    #[arg(short, long)]
    bits: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fiat_shamir_auth=info,fs_auth_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env().context("invalid server configuration")?;
    config.bind_address = SocketAddr::new(cli.host, cli.port);
    if let Some(bits) = cli.bits {
        config.modulus_bits = bits;
    }

    tracing::info!(bits = config.modulus_bits, "generating modulus");
    let modulus = Modulus::generate(config.modulus_bits)?;
    tracing::info!(
        bits = modulus.bits(),
        fingerprint = %modulus.fingerprint(),
        n = %modulus.value(),
        "modulus ready"
    );

    let server = AuthServer::bind(&config, modulus)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(
        addr = %server.local_addr()?,
        rounds = config.total_rounds,
        users_file = %config.users_file.display(),
        "server listening"
    );

    server.run_until(shutdown_signal()).await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("graceful shutdown initiated");
}
