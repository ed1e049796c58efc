use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use canopen_network::{BusConfig, NetworkConfig};

/// A node to register on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u8,
    /// EDS file describing the node's object dictionary.
    #[serde(default)]
    pub eds: Option<PathBuf>,
}

/// A periodic SDO read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    pub node: u8,
    pub index: u16,
    #[serde(default)]
    pub subindex: u8,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub network: NetworkConfig,
    pub nodes: Vec<NodeConfig>,
    pub polls: Vec<PollConfig>,
    pub sdo_timeout_ms: u64,
    /// Broadcast NMT start once connected.
    pub start_nodes: bool,
    pub enable_logging: bool,
    pub log_directory: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            network: NetworkConfig::default(),
            nodes: Vec::new(),
            polls: Vec::new(),
            sdo_timeout_ms: 1000,
            start_nodes: false,
            enable_logging: true,
            log_directory: None,
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "canopen", "canopen-monitor")
}

impl AppConfig {
    /// Get the path to the config file
    pub fn config_file_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load `path` (or the default config file); falls back to defaults if
    /// the file is missing or invalid.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::config_file_path) else {
            return Self::default();
        };
        if !path.exists() {
            info!("No configuration at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save to `path`, or to the default config file.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::config_file_path)
            .context("Could not determine config file path")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        info!("Saved configuration to {}", path.display());
        Ok(path)
    }

    /// Get the default log directory path
    pub fn default_log_directory() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_local_dir().join("logs"))
    }

    pub fn log_directory(&self) -> Option<PathBuf> {
        self.log_directory
            .as_ref()
            .map(PathBuf::from)
            .or_else(Self::default_log_directory)
    }
}
