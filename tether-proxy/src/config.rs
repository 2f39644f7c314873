//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration. File: ~/.config/tether/config.toml or /etc/tether/config.toml.
/// Env overrides: TETHER_LISTEN_ADDR, TETHER_UPSTREAM_HOST, TETHER_UPSTREAM_PORT,
/// TETHER_LOG, TETHER_LOG_PACKETS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address game clients connect to (default 127.0.0.1:25566).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Upstream server host (default 127.0.0.1).
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    /// Upstream server port (default 25565).
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    /// tracing filter directive (default "info"). RUST_LOG wins when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Attach the packet logger to every session.
    #[serde(default)]
    pub log_packets: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:25566".to_string()
}
fn default_upstream_host() -> String {
    "127.0.0.1".to_string()
}
fn default_upstream_port() -> u16 {
    25565
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            log_filter: default_log_filter(),
            log_packets: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: an explicit file must exist and parse. Otherwise merge default,
/// then the first config file found (if present), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_file()?.unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("TETHER_LISTEN_ADDR") {
        c.listen_addr = s;
    }
    if let Some(s) = var("TETHER_UPSTREAM_HOST") {
        c.upstream_host = s;
    }
    if let Some(s) = var("TETHER_UPSTREAM_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.upstream_port = p;
        }
    }
    if let Some(s) = var("TETHER_LOG") {
        c.log_filter = s;
    }
    if let Some(s) = var("TETHER_LOG_PACKETS") {
        c.log_packets = matches!(s.as_str(), "1" | "true" | "yes");
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tether/config.toml"));
    }
    out.push(PathBuf::from("/etc/tether/config.toml"));
    out
}

fn load_file() -> Result<Option<Config>, ConfigError> {
    for p in config_paths() {
        if p.exists() {
            return read_file(&p).map(Some);
        }
    }
    Ok(None)
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
