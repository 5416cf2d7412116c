use clap::Parser;
use dungeon_server::config::ServerConfig;
use dungeon_server::network::Server;
use log::{error, info};
use std::path::PathBuf;

/// Command line arguments; flags override values from the config file
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Simulation rate
    #[arg(short, long)]
    turns_per_second: Option<f64>,
    /// Maximum number of connected clients
    #[arg(short, long)]
    max_clients: Option<usize>,
    /// Seed for the demo map and creature behaviour
    #[arg(short, long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(rate) = self.turns_per_second {
            config.turns_per_second = rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Hint: set RUST_LOG=info (or debug) to see server logs");
    }
    env_logger::init();

    let config = Args::parse().into_config()?;
    let server = Server::bind(config).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.stop();
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped with a fatal error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
