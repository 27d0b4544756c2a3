//! Roomcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, rooms under /ws/, files from .
//! roomcast
//!
//! # Config file, with flags taking precedence
//! roomcast --config roomcast.json --port 9000 --debug
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roomcast::{Result, Server, ServerConfig, ServerConfigBuilder};

// ============================================================================
// Arguments
// ============================================================================

/// Room-based WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path prefix of room endpoints
    #[arg(long)]
    room_prefix: Option<String>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Outbound queue capacity per client
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Directory served for non-WebSocket requests
    #[arg(long)]
    static_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_server(config).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initializes tracing; `RUST_LOG` overrides the default filter.
fn init_logging(debug: bool) {
    let default = if debug { "roomcast=debug" } else { "roomcast=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the config file if given, then applies command-line overrides.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let base = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };

    let mut builder = ServerConfigBuilder::from(base);
    if let Some(ip) = args.bind {
        builder = builder.bind_ip(ip);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(prefix) = &args.room_prefix {
        builder = builder.room_prefix(prefix.clone());
    }
    if let Some(max) = args.max_connections {
        builder = builder.max_connections(max);
    }
    if let Some(capacity) = args.queue_capacity {
        builder = builder.queue_capacity(capacity);
    }
    if let Some(root) = &args.static_root {
        builder = builder.static_root(root.clone());
    }

    builder.build()
}

/// Runs the server until Ctrl+C.
async fn run_server(config: ServerConfig) -> Result<()> {
    let server = Server::bind(config).await?;
    info!(addr = %server.local_addr(), "Roomcast started");

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Roomcast stopped");
    Ok(())
}
