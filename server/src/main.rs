use clap::Parser;
use log::{error, info};
use server::auth::InMemoryAuthProvider;
use server::config::ServerConfig;
use server::server::Server;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, starts the server and runs until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    info!(
        "Starting session server on {}:{} ({} Hz, {:?} framing, {:?} re-auth)",
        config.host, config.port, config.tick_rate, config.framing, config.reauth_policy
    );

    let server = Server::new(config, Arc::new(InMemoryAuthProvider::new()));
    if let Err(e) = server.start().await {
        error!("{}", e);
        return Err(e.into());
    }

    // Handle shutdown gracefully
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop().await;

    Ok(())
}
