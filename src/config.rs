//! Configuration system using TOML files.
//!
//! Config is read from the OS-standard config directory:
//! - Windows: %APPDATA%\navidrome-restore\config.toml
//! - macOS: ~/Library/Application Support/navidrome-restore/config.toml
//! - Linux: ~/.config/navidrome-restore/config.toml
//!
//! or from the file given with `--config`. Command-line flags override
//! anything set here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::DEFAULT_DB_NAME;
use crate::error::{Error, Result};
use crate::matcher::DEFAULT_FUZZY_THRESHOLD;

/// Default catalog export filename.
pub const DEFAULT_LIBRARY_NAME: &str = "Library.xml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target server database
    pub store: StoreConfig,

    /// Source catalog export
    pub source: SourceConfig,

    /// Track matching
    pub matching: MatchingConfig,

    /// What `migrate` writes
    pub migrate: MigrateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the server database file
    pub path: PathBuf,

    /// Directory store paths are relative to (for tag fixes, and to strip
    /// absolute store paths before matching)
    pub music_root: Option<PathBuf>,

    /// Target user id or username
    pub user: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_NAME),
            music_root: None,
            user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Path to the exported Library.xml
    pub library: PathBuf,

    /// Location prefix to strip (auto-detected when unset)
    pub music_prefix: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from(DEFAULT_LIBRARY_NAME),
            music_prefix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum title similarity (0.0 - 1.0) for a fuzzy match
    pub fuzzy_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Mirror ordinary playlists
    pub playlists: bool,

    /// Carry over date-added
    pub date_added: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            playlists: true,
            date_added: true,
        }
    }
}

impl Config {
    fn validate(self) -> Result<Self> {
        let t = self.matching.fuzzy_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(Error::config(format!(
                "matching.fuzzy_threshold must be between 0 and 1, got {t}"
            )));
        }
        Ok(self)
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("navidrome-restore"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    toml::from_str::<Config>(contents)
        .map_err(|e| Error::config(e.to_string()))?
        .validate()
}

/// Load configuration.
///
/// An explicit path must exist and parse. Otherwise the default location
/// is tried, and a missing or broken default file falls back to defaults.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config = parse(&contents).map_err(|e| e.context(path.display().to_string()))?;
        tracing::info!("Loaded config from {:?}", path);
        return Ok(config);
    }

    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Ok(Config::default());
    };

    if !path.exists() {
        tracing::debug!("No config file found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match parse(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Ok(Config::default())
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Ok(Config::default())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
