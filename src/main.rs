use anyhow::Context;
use clap::Parser;
use session_protocol::auth::MemoryAccountStore;
use session_protocol::config::ServerConfig;
use session_protocol::security::BanStore;
use session_protocol::server::{Server, SessionServer};
use session_protocol::utils::logging::init_logging;
use session_protocol::utils::metrics::Metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Session server for the xVector game protocol.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// IPv4 bind address override (e.g. 0.0.0.0:24020)
    #[arg(short, long, value_name = "ADDRESS")]
    bind: Option<String>,

    /// Force JSON log output
    #[arg(long)]
    json_logs: bool,

    /// Print a configuration file with every default and exit
    #[arg(long)]
    print_example_config: bool,
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    config.apply_env();
    if let Some(bind) = &args.bind {
        config.network.address = bind.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate_strict()?;
    Ok(config)
}

fn load_bans(config: &ServerConfig) -> anyhow::Result<BanStore> {
    match &config.bans.file {
        Some(path) if path.exists() => {
            BanStore::load(path).with_context(|| format!("loading bans from {}", path.display()))
        }
        Some(path) => {
            warn!(path = %path.display(), "Ban file not found, starting with an empty ban list");
            Ok(BanStore::new())
        }
        None => Ok(BanStore::new()),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    init_logging(&config.logging)?;
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let bans = load_bans(&config)?;
    let config = Arc::new(config);
    let server = Server::new(
        Arc::clone(&config),
        Box::new(MemoryAccountStore::new()),
        bans,
        Arc::new(Metrics::new()),
    );

    let bound = SessionServer::bind(server).await?;
    info!(
        server_name = %config.general.server_name,
        addresses = ?bound.local_addrs(),
        "Session server started"
    );
    bound.run().await?;
    info!("Session server stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.print_example_config {
        println!("{}", ServerConfig::example_config());
        return;
    }

    if let Err(e) = run(args).await {
        eprintln!("session-server: {e:#}");
        std::process::exit(1);
    }
}
