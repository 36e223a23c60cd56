use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usenet_streamer::config::AppConfig;
use usenet_streamer::http::{router, AppState};
use usenet_streamer::nntp::ConnectionPool;
use usenet_streamer::session::SessionManager;

#[derive(Parser, Debug)]
#[command(name = "usenet-streamer")]
struct Cli {
    /// Path to a config.toml; falls back to ./config.toml, then env vars.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(providers = config.providers.len(), "starting usenet-streamer");

    let pools: Vec<ConnectionPool> = config.providers.iter().cloned().map(ConnectionPool::new).collect();
    let mut healthy = 0usize;
    for pool in &pools {
        match pool.validate().await {
            Ok(()) => healthy += 1,
            Err(e) => {
                tracing::warn!(provider = pool.provider_name(), error = %e, "provider failed to validate at startup");
            }
        }
    }
    if healthy == 0 {
        tracing::error!("no configured provider validated successfully, refusing to start");
        std::process::exit(1);
    }
    let connections_per_loader = pools.iter().map(|p| p.max_connections()).sum::<usize>().max(1);

    let sessions = SessionManager::new(pools, config.session_ttl());
    let state = AppState { sessions, connections_per_loader };

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
