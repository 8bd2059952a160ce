//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (WSCHAT_HOST, WSCHAT_PORT)
//! - TOML configuration file (`-c`, or the default search paths)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wschat_core::{config as core_config, HubConfig, SessionConfig};

/// Paths tried, in order, when no config file is given.
pub const SEARCH_PATHS: [&str; 3] = [
    "wschat.toml",
    "/etc/wschat/wschat.toml",
    "~/.config/wschat/wschat.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `template/home.html`. The built-in page is served
    /// when unset.
    #[serde(default)]
    pub base_dir: Option<String>,

    /// Session timings and limits.
    #[serde(default)]
    pub session: SessionSection,

    /// Hub configuration.
    #[serde(default)]
    pub hub: HubSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Session timings and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Deadline for each outbound write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,

    /// Read window in milliseconds. Pings go out at 9/10 of it.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per participant.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Capacity of the hub's event queue.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("WSCHAT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("WSCHAT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_write_wait() -> u64 {
    core_config::DEFAULT_WRITE_WAIT.as_millis() as u64
}

fn default_pong_wait() -> u64 {
    core_config::DEFAULT_PONG_WAIT.as_millis() as u64
}

fn default_max_message_size() -> usize {
    wschat_protocol::MAX_MESSAGE_SIZE
}

fn default_send_buffer() -> usize {
    core_config::DEFAULT_SEND_BUFFER
}

fn default_event_buffer() -> usize {
    core_config::DEFAULT_EVENT_BUFFER
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_dir: None,
            session: SessionSection::default(),
            hub: HubSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            write_wait_ms: default_write_wait(),
            pong_wait_ms: default_pong_wait(),
            max_message_size: default_max_message_size(),
            send_buffer: default_send_buffer(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the given file, or from the first search path
    /// that exists, or fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        for path in &SEARCH_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.session.pong_wait_ms < 10 {
            bail!("session.pong_wait_ms must be at least 10");
        }
        if self.session.write_wait_ms == 0 {
            bail!("session.write_wait_ms must be positive");
        }
        if self.session.max_message_size == 0 {
            bail!("session.max_message_size must be positive");
        }
        if self.session.send_buffer == 0 {
            bail!("session.send_buffer must be positive");
        }
        if self.hub.event_buffer == 0 {
            bail!("hub.event_buffer must be positive");
        }
        Ok(())
    }

    /// Resolve the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))
    }

    /// Path of the home page template, if a base directory is configured.
    #[must_use]
    pub fn home_template(&self) -> Option<PathBuf> {
        self.base_dir.as_ref().map(|dir| {
            PathBuf::from(shellexpand::tilde(dir).as_ref())
                .join("template")
                .join("home.html")
        })
    }

    /// Session settings for the core.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default()
            .with_pong_wait(Duration::from_millis(self.session.pong_wait_ms))
            .with_write_wait(Duration::from_millis(self.session.write_wait_ms))
            .with_send_buffer(self.session.send_buffer);
        config.max_message_size = self.session.max_message_size;
        config
    }

    /// Hub settings for the core.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_buffer: self.hub.event_buffer,
        }
    }
}
