// ESX Doctor - platform/config.rs
//
// Home-directory path resolution and optional configuration file.
// The data directory is `<home>/.esx-doctor/`; it holds the custom template
// store and an optional config.toml. A missing or malformed config is never
// fatal; the engine falls back to defaults with a warning.

use crate::util::constants;
use directories::UserDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Resolved per-user paths for ESX Doctor persisted state.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Data directory (e.g. ~/.esx-doctor/).
    pub data_dir: PathBuf,

    /// Custom template store file (data_dir/templates.json).
    pub templates_path: PathBuf,

    /// Optional configuration file (data_dir/config.toml).
    pub config_path: PathBuf,
}

impl PlatformPaths {
    /// Resolve paths under the user's home directory.
    ///
    /// Falls back to the current directory if the home directory cannot be
    /// determined (e.g. a stripped-down container environment).
    pub fn resolve() -> Self {
        let base = match UserDirs::new() {
            Some(dirs) => dirs.home_dir().to_path_buf(),
            None => {
                tracing::warn!("Could not determine home directory, using current directory");
                PathBuf::from(".")
            }
        };

        let data_dir = base.join(constants::DATA_DIR_NAME);
        let templates_path = data_dir.join(constants::TEMPLATES_FILE_NAME);
        let config_path = data_dir.join(constants::CONFIG_FILE_NAME);

        tracing::debug!(
            data = %data_dir.display(),
            "Platform paths resolved"
        );

        Self {
            data_dir,
            templates_path,
            config_path,
        }
    }
}

// =============================================================================
// Configuration file
// =============================================================================

/// Optional configuration loaded from `config.toml`.
///
/// All fields have defaults; CLI flags override config values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen port handed to the transport layer.
    pub port: u16,

    /// Log level when RUST_LOG and --debug are absent.
    pub log_level: Option<String>,

    /// Session idle TTL in hours.
    pub session_ttl_hours: i64,

    /// Expiration sweep interval in minutes.
    pub sweep_interval_mins: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            log_level: None,
            session_ttl_hours: constants::SESSION_TTL_HOURS,
            sweep_interval_mins: constants::SWEEP_INTERVAL_MINS,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`.
    ///
    /// Returns defaults when the file is missing. A malformed file also
    /// yields defaults (with a warning) so a typo never blocks startup.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot read config file");
                }
                return Self::default();
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Config file is malformed, using defaults"
                );
                Self::default()
            }
        }
    }
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("config.toml"));
        assert_eq!(config.port, constants::DEFAULT_PORT);
        assert_eq!(config.session_ttl_hours, constants::SESSION_TTL_HOURS);
    }

    #[test]
    fn test_config_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 9090\n").unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.port, 9090);
        assert_eq!(config.sweep_interval_mins, constants::SWEEP_INTERVAL_MINS);
    }

    #[test]
    fn test_config_malformed_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = {{{{").unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.port, constants::DEFAULT_PORT);
    }
}
