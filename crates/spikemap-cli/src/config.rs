//! Configuration management for the spikemap CLI

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spikemap_build::BuildConfig;

use crate::error::{CliError, CliResult};

/// Global CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Machine settings used for every build
    pub build: BuildConfig,

    /// User preferences
    pub preferences: UserPreferences,
}

/// Output preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// Show progress bars
    pub show_progress: bool,

    /// File name of the build manifest
    pub manifest_name: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            show_progress: true,
            manifest_name: "manifest.json".to_string(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| CliError::config(format!("Invalid config file {}: {}", path.display(), e)))?;
            config.build.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file named on the command line, or the user's default one
    pub fn resolve(explicit: Option<&Path>) -> CliResult<Self> {
        match explicit {
            Some(path) if !path.exists() => Err(CliError::missing_resource(format!(
                "config file {}",
                path.display()
            ))),
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Ok(path) => Self::load_from_file(&path),
                Err(_) => Ok(Self::default()),
            },
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::config("Could not determine config directory"))?;
        Ok(config_dir.join("spikemap").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = CliConfig::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = CliConfig::default();
        config.build.machine_time_step_us = 100;
        config.preferences.show_progress = false;
        config.save_to_file(&path).unwrap();
        assert_eq!(CliConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[build]\nmax_delay_stages = 4\n").unwrap();
        let config = CliConfig::load_from_file(&path).unwrap();
        assert_eq!(config.build.max_delay_stages, 4);
        assert_eq!(config.build.machine_time_step_us, 1000);
        assert!(config.preferences.show_progress);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = CliConfig::resolve(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, CliError::MissingResource(_)));
    }
}
