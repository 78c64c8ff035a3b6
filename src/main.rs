//! Ripple chat server
//!
//! Ephemeral channel-based group chat over QUIC. Clients declare a channel
//! and a display name, exchange posts in real time, and vote posts up or
//! down; heavily downvoted posts are removed automatically.
//!
//! Usage:
//!   cargo run -- server                    # Run the chat server
//!   cargo run -- server --port 4433        # Run on specific port
//!   cargo run -- selfcheck                 # Run the in-process basic check

use ripple::RippleServer;
use ripple::server::ripple_server::ServerConfig;
use ripple::store::MemoryStore;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "selfcheck" => {
            ripple::selfcheck::run_basic_check().await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Ripple - Ephemeral Channel Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    selfcheck           Run the in-process basic check");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!("    --geofence          Filter posts by location radius as well as channel");
    println!();
    println!("PROTOCOL:");
    println!("    One bidirectional QUIC stream per client carries the handshake,");
    println!("    settings updates, posts and votes inbound, and snapshots, live");
    println!("    posts, vote tallies and deletions outbound.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000 --geofence");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433 // default port
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    10000 // default
}

fn parse_geofence(args: &[String]) -> bool {
    args.iter().any(|a| a == "--geofence")
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Starting Ripple chat server...");

    let port = parse_port(args);
    let max_connections = parse_max_connections(args);
    let geofence = parse_geofence(args);

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        idle_timeout: Duration::from_secs(300),
        geofence,
        ..Default::default()
    };

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Snapshot limit: {}", config.snapshot_limit);
    info!("  - Downvote threshold: {}", config.downvote_threshold);
    info!("  - Geofence filtering: {}", config.geofence);

    let store = Arc::new(MemoryStore::new());
    let mut server = RippleServer::new(config, store);

    // Start server (this will run indefinitely)
    if let Err(e) = server.start().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
