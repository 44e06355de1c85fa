use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use godis::{AeLoop, Config, Server, config};

/// godis server
#[derive(Parser, Debug)]
#[command(name = "godis", version)]
#[command(about = "Single-threaded in-memory key-value server")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(level) = args.log_level {
        cfg.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = godis::VERSION, "starting godis");

    let mut server = Server::new(cfg).context("failed to start server")?;
    let mut el = AeLoop::new();
    server.register(&mut el).context("failed to register server events")?;
    el.run(&mut server);

    info!("godis stopped");
    Ok(())
}
