//! `MatchChat` chat server — WebSocket live channel plus REST history.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5005
//! cargo run --bin matchchat-server
//!
//! # Run on custom address
//! cargo run --bin matchchat-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! MATCHCHAT_ADDR=127.0.0.1:8080 cargo run --bin matchchat-server
//! ```

use clap::Parser;
use matchchat_server::config::{ServerCliArgs, ServerConfig};
use matchchat_server::server;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting matchchat server");

    match server::start_server(&config.bind_addr).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "chat server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "chat server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start chat server");
            std::process::exit(1);
        }
    }
}
