//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `HOSTGATE_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `hostgate.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! max_sessions = 64
//!
//! [gateway]
//! connect_timeout_secs = 30
//! channel_timeout_secs = 3
//! default_upload_dir = "/root"
//! terminal_cols = 80
//! terminal_rows = 24
//!
//! [logging]
//! level = "info"
//!
//! [[hosts]]
//! id = "op-1"
//! host = "10.0.0.5"
//! port = 22
//! username = "deploy"
//! password = "secret"
//! display_name = "staging box"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::inventory::HostEntry;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Static host table consumed by the inventory directory.
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent gateway sessions across both variants (default 64).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Remote-connection policy shared by the shell and query gateways.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Remote connect timeout in seconds (default 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Channel-open timeout in seconds (default 3).
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
    /// Directory uploads fall back to when the requested one is unusable
    /// (default `/root`).
    #[serde(default = "default_upload_dir")]
    pub default_upload_dir: String,
    /// Terminal width requested for the remote PTY (default 80).
    #[serde(default = "default_terminal_cols")]
    pub terminal_cols: u32,
    /// Terminal height requested for the remote PTY (default 24).
    #[serde(default = "default_terminal_rows")]
    pub terminal_rows: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_sessions() -> usize {
    64
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_channel_timeout_secs() -> u64 {
    3
}
fn default_upload_dir() -> String {
    "/root".to_string()
}
fn default_terminal_cols() -> u32 {
    80
}
fn default_terminal_rows() -> u32 {
    24
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            channel_timeout_secs: default_channel_timeout_secs(),
            default_upload_dir: default_upload_dir(),
            terminal_cols: default_terminal_cols(),
            terminal_rows: default_terminal_rows(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `hostgate.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("hostgate.toml").exists() {
            let content =
                std::fs::read_to_string("hostgate.toml").expect("Failed to read hostgate.toml");
            toml::from_str(&content).expect("Failed to parse hostgate.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                gateway: GatewayConfig::default(),
                logging: LoggingConfig::default(),
                hosts: Vec::new(),
            }
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("HOSTGATE_LISTEN") {
            config.server.listen = listen;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.max_sessions, 64);
        assert_eq!(config.gateway.connect_timeout_secs, 30);
        assert_eq!(config.gateway.channel_timeout_secs, 3);
        assert_eq!(config.gateway.default_upload_dir, "/root");
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn parses_host_table() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"

            [[hosts]]
            id = "op-1"
            host = "10.0.0.5"
            port = 2222
            username = "deploy"
            password = "secret"
            display_name = "staging"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].id, "op-1");
        assert_eq!(config.hosts[0].descriptor.port, 2222);
    }
}
