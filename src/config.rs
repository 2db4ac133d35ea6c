use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sync::ForumSort;
use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// User id the CLI acts as; unset means signed out
    #[serde(default)]
    pub identity: Option<String>,
    /// Name shown on forum posts and comments
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub forum_sort: ForumSort,
    #[serde(default = "default_recent_activity_limit")]
    pub recent_activity_limit: usize,
    /// `tracing` filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            identity: None,
            author_name: None,
            forum_sort: ForumSort::default(),
            recent_activity_limit: default_recent_activity_limit(),
            log_filter: default_log_filter(),
            config_version: Some(CURRENT_CONFIG_VERSION),
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    // This is a fallback - actual profile will be determined at load time
    Config::default_database_path_for_profile(utils::Profile::Prod)
}

fn default_recent_activity_limit() -> usize {
    5
}

fn default_log_filter() -> String {
    "warn".to_string()
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

impl Config {
    /// Load configuration from file, or create default if missing
    /// Uses the provided profile to determine config and database paths
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;
        let database_path = Self::default_database_path_for_profile(profile);

        if config_path.exists() {
            let mut config = Self::load_from_path(&config_path)?;
            // Ensure database path matches profile (in case config was manually edited)
            config.database_path = database_path;
            Ok(config)
        } else {
            let mut config = Config {
                database_path,
                ..Config::default()
            };
            if let Err(e) = config.save_to_path(&config_path) {
                tracing::error!(path = %config_path.display(), error = %e, "failed to save config file");
                return Err(e);
            }
            Ok(config)
        }
    }

    /// Load configuration from an explicit file; a missing file yields defaults
    /// without writing anything
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Config::default());
        }
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_path(&mut self, config_path: &Path) -> Result<(), ConfigError> {
        // Ensure config version is set before saving
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(config_path, toml_string).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile).ok_or_else(|| {
            ConfigError::ConfigDirError("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get default database path for a specific profile
    fn default_database_path_for_profile(profile: utils::Profile) -> String {
        if let Some(data_dir) = utils::get_data_dir(profile) {
            data_dir.join("deskboard.db").to_string_lossy().to_string()
        } else {
            // Fallback paths - platform-specific
            #[cfg(target_os = "macos")]
            {
                format!("~/Library/Application Support/{}/deskboard.db", profile.app_name())
            }
            #[cfg(not(target_os = "macos"))]
            {
                format!("~/.local/share/{}/deskboard.db", profile.app_name())
            }
        }
    }

    /// Get the expanded database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        utils::expand_path(&self.database_path)
    }

    /// Author name for forum entries, falling back to the identity
    pub fn display_name(&self) -> Option<&str> {
        self.author_name
            .as_deref()
            .or(self.identity.as_deref())
            .filter(|name| !name.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "identity = \"u1\"\nforum_sort = \"popular\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();

        assert_eq!(config.identity.as_deref(), Some("u1"));
        assert_eq!(config.forum_sort, ForumSort::Popular);
        assert_eq!(config.recent_activity_limit, 5);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config {
            author_name: Some("Ana".to_string()),
            ..Config::default()
        };

        config.save_to_path(&path).unwrap();

        assert_eq!(Config::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "forum_sort = \"sideways\"").unwrap();

        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_display_name_falls_back_to_identity() {
        let config = Config {
            identity: Some("u1".to_string()),
            ..Config::default()
        };
        assert_eq!(config.display_name(), Some("u1"));
    }
}
