//! Configuration schema structs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub echo: EchoConfig,
}

/// Chat listener and registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (default: 0.0.0.0)
    pub host: String,
    /// Chat port (default: 4040)
    pub port: u16,
    /// Capacity of the registry intake channel (default: 8)
    pub intake_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4040,
            intake_capacity: 8,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Outbound mailbox capacity per session (default: 8)
    pub outbox_capacity: usize,
    /// Inactivity window before a session is disconnected (default: 300)
    pub idle_timeout_secs: u64,
    /// Longest accepted inbound line in bytes (default: 65536)
    pub max_line_length: usize,
    /// How long a departing session may spend flushing its outbox (default: 5)
    pub drain_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 8,
            idle_timeout_secs: 300,
            max_line_length: parley_protocol::DEFAULT_MAX_LINE_LENGTH,
            drain_timeout_secs: 5,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Websocket echo/handshake endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Serve the endpoint at all (default: true)
    pub enabled: bool,
    pub host: String,
    /// HTTP port (default: 4041)
    pub port: u16,
    /// Deadline for one request/reply exchange (default: 10)
    pub read_timeout_secs: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 4041,
            read_timeout_secs: 10,
        }
    }
}

impl EchoConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 4040);
        assert_eq!(config.session.outbox_capacity, 8);
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(5 * 60));
        assert_eq!(config.session.drain_timeout(), Duration::from_secs(5));
        assert_eq!(config.echo.port, 4041);
        assert_eq!(config.echo.read_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_listen_addr() {
        let mut server = ServerConfig::default();
        server.host = "127.0.0.1".into();
        server.port = 9000;
        assert_eq!(server.listen_addr(), "127.0.0.1:9000");
        assert_eq!(EchoConfig::default().listen_addr(), "0.0.0.0:4041");
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [session]
            idle_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.session.idle_timeout_secs, 30);
        assert_eq!(config.session.outbox_capacity, 8);
        assert_eq!(config.server, ServerConfig::default());
    }
}
