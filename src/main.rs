use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use doorway::config::Config;
use doorway::logging::init_tracing;
use doorway::server::{DoorServer, ServerContext};

/// Multi-user door server.
#[derive(Parser)]
#[command(name = "doorway")]
#[command(about = "Multi-user terminal door server with resumable sessions")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/doorway/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind_addr
    #[arg(short, long, value_name = "HOST:PORT")]
    bind: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(bind) = &cli.bind {
        config.server.bind_addr = bind.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    if cli.check_config {
        println!("Configuration OK");
        return Ok(());
    }

    let mut server = DoorServer::new(ServerContext::new(config));
    let addr = server.bind().await?;
    println!("doorway listening on {}", addr);

    let shutdown = server.context().shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown.wait_for_signal().await {
            tracing::error!(error = %e, "Failed to install signal handlers");
            shutdown.signal_shutdown();
        }
    });

    server.run().await?;
    tracing::info!("Server stopped");
    Ok(())
}
