//! # ultimate-mcp
//!
//! MCP server that exposes a Commodore 64 Ultimate (Ultimate 64, Ultimate-II+)
//! to AI agents. Runs either as a stdio JSON-RPC server launched by the agent
//! host, or as an HTTP server with SSE sessions and a direct PRG upload
//! endpoint.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ultimate_mcp::config::{self, Cli, Transport};
use ultimate_mcp::{http, mcp, ConnectionState, HttpDevice, McpHandler, ToolRegistry};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs always go to stderr; stdout carries the stdio transport.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let resolved = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ultimate-mcp: configuration error: {e}");
            std::process::exit(1);
        }
    };

    match &resolved.initial {
        Some(c) => info!(
            device = %c.base_url(),
            "ultimate-mcp v{} starting",
            env!("CARGO_PKG_VERSION")
        ),
        None => info!(
            "ultimate-mcp v{} starting without a device; call ultimate_set_connection",
            env!("CARGO_PKG_VERSION")
        ),
    }

    let connection = Arc::new(ConnectionState::new(resolved.initial));
    let device = match HttpDevice::new(connection.clone()) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            eprintln!("ultimate-mcp: {e}");
            std::process::exit(1);
        }
    };
    let registry = match ToolRegistry::builtin(device, connection) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ultimate-mcp: {e}");
            std::process::exit(1);
        }
    };
    info!(tools = registry.list_tools().len(), "tool registry ready");
    let handler = McpHandler::new(Arc::new(registry));

    match resolved.transport {
        Transport::Stdio => mcp::run_stdio(handler).await,
        Transport::Http(addr) => {
            if let Err(e) = http::serve(http::AppState::new(handler), addr).await {
                eprintln!("ultimate-mcp: server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
