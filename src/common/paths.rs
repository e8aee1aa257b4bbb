//! Configuration paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/stepwise/`
//! - macOS: `~/Library/Application Support/stepwise/`
//! - Windows: `%APPDATA%\stepwise\`

use std::path::PathBuf;

/// Application name used for config and data directories
const APP_NAME: &str = "stepwise";

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "STEPWISE_CONFIG";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
///
/// `$STEPWISE_CONFIG` wins over the platform location.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    config_dir().map(|dir| dir.join("config.toml"))
}
