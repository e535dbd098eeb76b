//! TOML configuration for the stratad daemon.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use strata_types::config::{DEFAULT_MAX_OPERATION_SIZE, DEFAULT_STRIPE_SIZE};

/// Top-level daemon configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings.
    pub server: ServerSection,
    /// Object backend selection.
    pub object: ObjectSection,
    /// KV backend selection.
    pub kv: KvSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// TCP port to listen on.
    pub port: u16,
    /// Per-connection scratch region size in bytes.
    pub stripe_size: Option<usize>,
    /// Cap on a single operation's payload; clients must match.
    pub max_operation_size: Option<u64>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 4711,
            stripe_size: None,
            max_operation_size: None,
        }
    }
}

/// `[object]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ObjectSection {
    /// Backend implementation: `"posix"` (default) or `"memory"`.
    pub backend: String,
    /// Storage directory for disk-backed implementations.
    pub path: Option<PathBuf>,
}

impl Default for ObjectSection {
    fn default() -> Self {
        Self {
            backend: "posix".to_string(),
            path: None,
        }
    }
}

/// `[kv]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KvSection {
    /// Backend implementation: `"fjall"` (default) or `"memory"`.
    pub backend: String,
    /// Storage directory for disk-backed implementations.
    pub path: Option<PathBuf>,
}

impl Default for KvSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
            path: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective scratch region size.
    pub fn stripe_size(&self) -> usize {
        self.server.stripe_size.unwrap_or(DEFAULT_STRIPE_SIZE)
    }

    /// Effective per-operation payload cap.
    pub fn max_operation_size(&self) -> u64 {
        self.server
            .max_operation_size
            .unwrap_or(DEFAULT_MAX_OPERATION_SIZE)
    }

    /// Base data directory: `~/.strata`, or `./.strata` without a home.
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".strata"))
            .unwrap_or_else(|| PathBuf::from(".strata"))
    }

    /// Effective object storage path.
    pub fn object_path(&self) -> PathBuf {
        self.object
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("objects"))
    }

    /// Effective KV storage path.
    pub fn kv_path(&self) -> PathBuf {
        self.kv
            .path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("kv"))
    }
}
