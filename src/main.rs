//! qnet: demo QNet server and one-shot client.
//!
//! Without `--send`, serves the default handler on the configured address
//! (`localhost:4099` unless overridden) until a client sends `shutdown`.
//!
//! With `--send <MESSAGE>`, connects to that address instead, runs one
//! conversation and prints the response.

use qnet::config::Config;
use qnet::{Connection, DefaultHandler, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.send.clone() {
        Some(message) => run_client(&config, &message),
        None => run_server(config),
    }
}

/// Serve with the default handler until shutdown.
fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        port = config.port,
        queue_size = config.queue_size,
        auto_strip = config.auto_strip,
        hostname = %qnet::get_address(),
        "Starting QNet server"
    );

    let handler = DefaultHandler::new(config.name.clone(), config.motd.clone());
    let mut server = Server::new(config.server_options(), handler);
    server.serve()?;

    info!("Server stopped");
    Ok(())
}

/// Run one conversation and print the response.
fn run_client(config: &Config, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let connection = Connection::new(config.host.clone(), config.port).with_codec(config.codec);
    let response = connection.converse(message)?;
    println!("{}", String::from_utf8_lossy(&response));
    Ok(())
}
