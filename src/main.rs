//! Relaychat server
//!
//! Usage:
//!   relaychat server                          # default ports 15681/15682
//!   relaychat server --config relaychat.json  # JSON config file
//!   relaychat server --tcp 0.0.0.0:5000 --udp 0.0.0.0:5001
//!
//! Log level is taken from RUST_LOG (default: info).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use relaychat::{ChatServer, ServerConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "relaychat", version, about = "TCP command / UDP relay chat server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the chat server
    Server(ServerArgs),
}

#[derive(Debug, Args)]
struct ServerArgs {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP listen address, overrides the config file
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// UDP bind address, overrides the config file
    #[arg(long)]
    udp: Option<SocketAddr>,
}

impl ServerArgs {
    fn load(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(tcp) = self.tcp {
            config.tcp_addr = tcp;
        }
        if let Some(udp) = self.udp {
            config.udp_addr = udp;
        }
        Ok(config)
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args.load()?).await,
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    info!("Configuration:");
    info!("  - TCP address: {}", config.tcp_addr);
    info!("  - UDP address: {}", config.udp_addr);
    info!("  - Max message size: {}", config.max_message_size);
    info!("  - Max datagram size: {}", config.multiplexer.max_datagram_size);
    info!("  - Per-peer queue: {}", config.multiplexer.queue_capacity);

    let server = ChatServer::bind(config).await?;
    server.start_tcp()?;
    server.start_udp();

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    server.quit().await;
    Ok(())
}
