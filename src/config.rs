//! Command-line and environment configuration.
//!
//! The initial device comes from the positional `URL` argument, falling back
//! to `C64_HOST`. Without either the bridge still starts; tools then report
//! `connection_error` until `ultimate_set_connection` is called.
//!
//! The HTTP listen address is `--host`:`--port`, unless `ULTIMATE_MCP_LISTEN`
//! holds a full `addr:port`.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::connection::Connection;

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug)]
#[command(
    name = "ultimate-mcp",
    version,
    about = "MCP server for the Commodore 64 Ultimate REST API"
)]
pub struct Cli {
    /// Ultimate device URL or host (e.g. 192.168.1.64 or https://c64.example.net)
    #[arg(env = "C64_HOST")]
    pub url: Option<String>,

    /// Speak MCP over stdin/stdout instead of HTTP/SSE
    #[arg(long)]
    pub stdio: bool,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port for the HTTP server
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// How the bridge talks to its MCP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http(SocketAddr),
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub initial: Option<Connection>,
    pub transport: Transport,
}

/// Resolve the CLI plus process environment.
pub fn load_config(cli: &Cli) -> Result<ResolvedConfig, String> {
    let listen = std::env::var("ULTIMATE_MCP_LISTEN").ok();
    resolve(cli, listen.as_deref())
}

/// Resolve with an explicit listen-address override.
pub fn resolve(cli: &Cli, listen_override: Option<&str>) -> Result<ResolvedConfig, String> {
    let initial = match cli.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Some(
            Connection::parse(url, None).map_err(|e| format!("Invalid device URL '{url}': {e}"))?,
        ),
        None => None,
    };

    let transport = if cli.stdio {
        Transport::Stdio
    } else {
        let addr = match listen_override.map(str::trim).filter(|l| !l.is_empty()) {
            Some(listen) => listen
                .parse::<SocketAddr>()
                .map_err(|e| format!("Invalid ULTIMATE_MCP_LISTEN '{listen}': {e}"))?,
            None => SocketAddr::new(cli.host, cli.port),
        };
        Transport::Http(addr)
    };

    Ok(ResolvedConfig { initial, transport })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["ultimate-mcp"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_to_http_on_port_8000() {
        let c = cli(&["http://192.168.1.64"]);
        let resolved = resolve(&c, None).unwrap();
        assert_eq!(resolved.initial, Some(Connection::new("192.168.1.64", 80)));
        assert_eq!(
            resolved.transport,
            Transport::Http("0.0.0.0:8000".parse().unwrap())
        );
    }

    #[test]
    fn stdio_flag_and_custom_port() {
        let c = cli(&["--stdio", "c64.local:6464"]);
        let resolved = resolve(&c, Some("127.0.0.1:9000")).unwrap();
        assert_eq!(resolved.transport, Transport::Stdio);
        assert_eq!(resolved.initial, Some(Connection::new("c64.local", 6464)));
    }

    #[test]
    fn listen_override_wins() {
        let c = cli(&["--host", "127.0.0.1", "--port", "8100", "c64"]);
        let resolved = resolve(&c, Some("127.0.0.1:9000")).unwrap();
        assert_eq!(
            resolved.transport,
            Transport::Http("127.0.0.1:9000".parse().unwrap())
        );
        assert!(resolve(&c, Some("not an address")).is_err());
    }

    #[test]
    fn blank_or_bad_url() {
        let mut c = cli(&["c64"]);
        c.url = Some("  ".into());
        assert_eq!(resolve(&c, None).unwrap().initial, None);

        c.url = Some("ftp://c64.local".into());
        assert!(resolve(&c, None).is_err());

        c.url = Some("https://c64.local".into());
        let initial = resolve(&c, None).unwrap().initial.unwrap();
        assert_eq!(initial.base_url(), "https://c64.local");
    }
}
