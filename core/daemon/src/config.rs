//! Daemon configuration.
//!
//! Loaded from `~/.formtrace/config.toml` unless a path is given. A missing
//! file means defaults; a malformed one is an error.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::ingest::PastePolicy;
use crate::report::DEFAULT_CHANGE_BUFFER;

const CONFIG_DIR: &str = ".formtrace";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served for any GET that is not an API route.
    #[serde(default = "default_client_dir")]
    pub client_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_dir: default_client_dir(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidAddress {
                addr: self.host.clone(),
                source,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7080
}

fn default_client_dir() -> PathBuf {
    PathBuf::from("client")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub paste_policy: PastePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Record changes buffered for the reporter before it starts skipping.
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            change_buffer: default_change_buffer(),
        }
    }
}

fn default_change_buffer() -> usize {
    DEFAULT_CHANGE_BUFFER
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}
