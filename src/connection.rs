//! The single active device target.
//!
//! [`ConnectionState`] is created once at startup (seeded from `C64_HOST` or
//! the positional CLI URL) and shared as `Arc<ConnectionState>` by the device
//! client, the tool registry and the HTTP adapter. The only writer is the
//! `ultimate_set_connection` tool.
//!
//! Replacement is atomic and last-writer-wins. A device call reads the target
//! once when it builds its request; a concurrent `set` does not affect a
//! request that is already in flight.

use serde::Serialize;
use tokio::sync::RwLock;

/// Default port of the Ultimate REST API.
pub const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// What the Ultimate itself serves.
    #[default]
    Http,
    /// For devices reached through a TLS-terminating proxy.
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => DEFAULT_PORT,
            Scheme::Https => 443,
        }
    }
}

/// A device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Connection {
    /// Plain-http endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Parse `host`, `host:port` or `http[s]://host[:port][/]`. Without a
    /// scheme the device is assumed to speak plain http.
    ///
    /// An explicit `port` overrides any port embedded in `input`.
    pub fn parse(input: &str, port: Option<u16>) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("host must not be empty".into());
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let url = reqwest::Url::parse(&with_scheme)
            .map_err(|e| format!("invalid host '{trimmed}': {e}"))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(format!(
                    "unsupported scheme '{other}' (expected http or https)"
                ))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("invalid host '{trimmed}'"))?;

        let port = port.or(url.port()).unwrap_or(scheme.default_port());
        if port == 0 {
            return Err("port must be between 1 and 65535".into());
        }

        Ok(Self::new(host, port).with_scheme(scheme))
    }

    /// `scheme://host[:port]`, port omitted when it is the scheme's default.
    pub fn base_url(&self) -> String {
        let scheme = self.scheme.as_str();
        if self.port == self.scheme.default_port() {
            format!("{scheme}://{}", self.host)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }

    /// Root of the versioned REST API.
    pub fn api_base(&self) -> String {
        format!("{}/v1", self.base_url())
    }
}

/// Process-wide holder of the current [`Connection`].
#[derive(Debug, Default)]
pub struct ConnectionState {
    current: RwLock<Option<Connection>>,
}

impl ConnectionState {
    pub fn new(initial: Option<Connection>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Snapshot of the current target, if any.
    pub async fn get(&self) -> Option<Connection> {
        self.current.read().await.clone()
    }

    /// Replace the target unconditionally and return the previous one.
    pub async fn set(&self, connection: Connection) -> Option<Connection> {
        let mut current = self.current.write().await;
        current.replace(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn parse_bare_host_defaults_to_port_80() {
        let c = Connection::parse("192.168.1.64", None).unwrap();
        assert_eq!(c, Connection::new("192.168.1.64", 80));
        assert_eq!(c.base_url(), "http://192.168.1.64");
        assert_eq!(c.api_base(), "http://192.168.1.64/v1");
    }

    #[test]
    fn parse_url_with_port_and_trailing_slash() {
        let c = Connection::parse("http://c64.local:8080/", None).unwrap();
        assert_eq!(c, Connection::new("c64.local", 8080));
        assert_eq!(c.base_url(), "http://c64.local:8080");
    }

    #[test]
    fn explicit_port_overrides_embedded_port() {
        let c = Connection::parse("c64.local:8080", Some(6510)).unwrap();
        assert_eq!(c.port, 6510);
    }

    #[test]
    fn parse_keeps_https_and_its_default_port() {
        let c = Connection::parse("https://c64.example.net/", None).unwrap();
        assert_eq!(c.scheme, Scheme::Https);
        assert_eq!(c.port, 443);
        assert_eq!(c.api_base(), "https://c64.example.net/v1");

        let c = Connection::parse("HTTPS://c64.example.net:8443", None).unwrap();
        assert_eq!(c.base_url(), "https://c64.example.net:8443");
    }

    #[test]
    fn parse_rejects_empty_and_unknown_schemes() {
        assert!(Connection::parse("   ", None).is_err());
        assert!(Connection::parse("ftp://c64.local", None).is_err());
        assert!(Connection::parse("c64.local", Some(0)).is_err());
    }

    #[tokio::test]
    async fn set_returns_previous_and_get_returns_last() {
        let state = ConnectionState::new(None);
        assert_eq!(state.get().await, None);

        let prev = state.set(Connection::new("10.0.0.1", 80)).await;
        assert_eq!(prev, None);
        let prev = state.set(Connection::new("10.0.0.2", 8080)).await;
        assert_eq!(prev, Some(Connection::new("10.0.0.1", 80)));
        assert_eq!(state.get().await, Some(Connection::new("10.0.0.2", 8080)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_set_and_get_never_invent_a_host() {
        let state = Arc::new(ConnectionState::new(None));
        let hosts: Vec<String> = (0..8).map(|i| format!("10.0.0.{i}")).collect();

        let mut tasks = Vec::new();
        for host in hosts.clone() {
            let state = Arc::clone(&state);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    state.set(Connection::new(host.clone(), 80)).await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for _ in 0..4 {
            let state = Arc::clone(&state);
            let hosts = hosts.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    if let Some(c) = state.get().await {
                        assert!(hosts.contains(&c.host), "unexpected host {}", c.host);
                        assert_eq!(c.port, 80);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let last = state.get().await.unwrap();
        assert!(hosts.contains(&last.host));
    }
}
