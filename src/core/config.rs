/*
 * Persisted user settings: loading behaviour, export verification, logging
 * level and the list of recently opened datasets. Settings live in
 * `settings.json` inside the per-user configuration directory.
 *
 * A missing or unreadable settings file is not an error: loading falls back
 * to the defaults and logs why. Unknown fields are ignored and missing fields
 * take their default, so older and newer settings files stay readable.
 *
 * Storage goes through `ConfigManagerOperations` so callers can substitute
 * another backend; `CoreConfigManager` is the file-based implementation.
 */
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::core::path_utils;

pub const APP_NAME: &str = "bidsio";
const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Serde(serde_json::Error),
    NoConfigDirectory,
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serde(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {e}"),
            ConfigError::Serde(e) => write!(f, "Configuration file format error: {e}"),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine the configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_recent_items() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidsConfig {
    #[serde(default)]
    pub lazy_loading: bool,
    #[serde(default = "default_true")]
    pub load_sidecars_eagerly: bool,
    #[serde(default = "default_true")]
    pub load_ieeg_data: bool,
    #[serde(default)]
    pub verify_exports: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub recent_datasets: Vec<PathBuf>,
    #[serde(default = "default_max_recent_items")]
    pub max_recent_items: usize,
}

impl Default for BidsConfig {
    fn default() -> Self {
        BidsConfig {
            lazy_loading: false,
            load_sidecars_eagerly: true,
            load_ieeg_data: true,
            verify_exports: false,
            log_level: default_log_level(),
            log_file: None,
            recent_datasets: Vec::new(),
            max_recent_items: default_max_recent_items(),
        }
    }
}

impl BidsConfig {
    /*
     * Moves `path` to the front of the recent list, dropping an older entry
     * for the same path and trimming the list to `max_recent_items`.
     */
    pub fn add_recent_dataset(&mut self, path: &Path) {
        self.recent_datasets.retain(|p| p != path);
        self.recent_datasets.insert(0, path.to_path_buf());
        self.recent_datasets.truncate(self.max_recent_items);
    }
}

pub trait ConfigManagerOperations: Send + Sync {
    fn load_config(&self) -> BidsConfig;
    fn save_config(&self, config: &BidsConfig) -> Result<()>;
}

pub struct CoreConfigManager {
    config_dir: Option<PathBuf>,
}

impl CoreConfigManager {
    pub fn new() -> Self {
        CoreConfigManager { config_dir: None }
    }

    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        CoreConfigManager {
            config_dir: Some(dir.into()),
        }
    }

    fn settings_path(&self) -> Option<PathBuf> {
        let dir = match &self.config_dir {
            Some(dir) => path_utils::ensure_dir(dir)?,
            None => path_utils::get_base_app_config_local_dir(APP_NAME)?,
        };
        Some(dir.join(SETTINGS_FILENAME))
    }

    fn read_config(path: &Path) -> Result<BidsConfig> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for CoreConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManagerOperations for CoreConfigManager {
    fn load_config(&self) -> BidsConfig {
        let Some(file_path) = self.settings_path() else {
            log::warn!("CoreConfigManager: No configuration directory, using default settings.");
            return BidsConfig::default();
        };
        if !file_path.exists() {
            log::debug!("CoreConfigManager: Settings file {file_path:?} does not exist.");
            return BidsConfig::default();
        }
        match Self::read_config(&file_path) {
            Ok(config) => {
                log::debug!("CoreConfigManager: Loaded settings from {file_path:?}.");
                config
            }
            Err(e) => {
                log::warn!(
                    "CoreConfigManager: Could not read settings from {file_path:?}, using defaults: {e}"
                );
                BidsConfig::default()
            }
        }
    }

    fn save_config(&self, config: &BidsConfig) -> Result<()> {
        let file_path = self.settings_path().ok_or(ConfigError::NoConfigDirectory)?;
        let writer = BufWriter::new(File::create(&file_path)?);
        serde_json::to_writer_pretty(writer, config)?;
        log::debug!("CoreConfigManager: Saved settings to {file_path:?}.");
        Ok(())
    }
}
