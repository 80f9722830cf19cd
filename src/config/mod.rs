use crate::subscription::DEFAULT_QUEUE_CAPACITY;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Complete worldcast configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldcastConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under /static
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Subscriber fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Per-subscriber outbound queue capacity. Updates beyond it are dropped
    /// for that subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WorldcastConfig {
    /// Apply WORLDCAST_* environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, ignoring values that fail to parse
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WORLDCAST_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("WORLDCAST_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %v, "Ignoring invalid WORLDCAST_PORT"),
            }
        }
        if let Some(v) = lookup("WORLDCAST_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WORLDCAST_QUEUE_CAPACITY") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.hub.queue_capacity = n,
                _ => warn!(value = %v, "Ignoring invalid WORLDCAST_QUEUE_CAPACITY"),
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<WorldcastConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: WorldcastConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent
pub fn load_or_default(path: impl AsRef<Path>) -> Result<WorldcastConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return Ok(WorldcastConfig::default());
    }
    load_config(path)
}
