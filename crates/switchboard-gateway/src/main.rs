use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use switchboard_gateway::app;

#[derive(Parser, Debug)]
#[command(name = "switchboard-gateway", about = "LLM protocol translation proxy")]
struct Args {
    /// Path to switchboard.toml (default: ~/.switchboard/switchboard.toml).
    #[arg(long)]
    config: Option<String>,

    /// Directory for request/response snapshots (disabled when unset).
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("SWITCHBOARD_CONFIG").ok());
    let config = switchboard_core::config::SwitchboardConfig::load(config_path.as_deref())?;

    // relative profile/schema paths resolve against the config directory
    let base_dir = config_path
        .as_deref()
        .map(Path::new)
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // missing profiles are a startup error, not a per-request surprise
    let state = Arc::new(app::AppState::new(config, base_dir, args.snapshot_dir)?);
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("switchboard gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
