//! Configuration management for Muster.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
#[cfg(feature = "toml")]
use std::path::Path;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::types::Role;

/// Environment variable naming the TOML configuration file
pub const CONFIG_PATH_ENV: &str = "MUSTER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Static session table for the development identity provider
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Attendance REST surface
    pub http_addr: SocketAddr,
    /// Real-time location channel
    pub ws_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Per-connection outbound queue depth; a full queue drops the message
    pub outbound_queue_capacity: usize,
    /// Per-connection inbound queue depth
    pub inbound_queue_capacity: usize,
    /// Room used when a sample carries no incident binding
    pub default_room: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            inbound_queue_capacity: 64,
            default_room: "global".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// SQLite file; `None` keeps records in memory
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub token: String,
    pub user_id: String,
    pub role: Role,
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `MUSTER_CONFIG` when set, then apply `MUSTER_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            #[cfg(feature = "toml")]
            Ok(path) => Self::from_file(path)?,
            #[cfg(not(feature = "toml"))]
            Ok(_) => {
                return Err(CoreError::Config(
                    "TOML support not compiled in".to_string(),
                ))
            }
            Err(_) => {
                info!("{} not set, using built-in defaults", CONFIG_PATH_ENV);
                Self::default_config()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MUSTER_HTTP_ADDR`, `MUSTER_WS_ADDR` and `MUSTER_DATABASE_PATH`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("MUSTER_HTTP_ADDR") {
            self.server.http_addr = parse_addr("MUSTER_HTTP_ADDR", &addr)?;
            debug!(http_addr = %self.server.http_addr, "Override from MUSTER_HTTP_ADDR");
        }
        if let Some(addr) = lookup("MUSTER_WS_ADDR") {
            self.server.ws_addr = parse_addr("MUSTER_WS_ADDR", &addr)?;
            debug!(ws_addr = %self.server.ws_addr, "Override from MUSTER_WS_ADDR");
        }
        if let Some(path) = lookup("MUSTER_DATABASE_PATH") {
            debug!(path = %path, "Override from MUSTER_DATABASE_PATH");
            self.attendance.database_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broadcast.outbound_queue_capacity == 0 {
            return Err(CoreError::Config(
                "broadcast.outbound_queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.broadcast.inbound_queue_capacity == 0 {
            return Err(CoreError::Config(
                "broadcast.inbound_queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.broadcast.default_room.trim().is_empty() {
            return Err(CoreError::Config(
                "broadcast.default_room must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            broadcast: BroadcastConfig::default(),
            attendance: AttendanceConfig::default(),
            logging: LoggingConfig::default(),
            identities: Vec::new(),
        }
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| CoreError::Config(format!("{} is not a socket address: {}", key, e)))
}
