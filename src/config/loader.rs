//! Configuration loading from file system

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::types::Config;

/// Default location of config.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("LonghornThemeManager").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("longhorn-theme.json"))
}

/// Load configuration from `path`, or from [`default_config_path`] when `None`.
///
/// Returns Config::default() if the file is missing or cannot be parsed.
#[instrument(name = "load_config")]
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return Config::default();
    }

    let contents = match fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to read config, using defaults");
            return Config::default();
        }
    };

    match serde_json::from_str::<Config>(&contents) {
        Ok(config) => {
            info!(path = %config_path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            let hint = if e.to_string().contains("invalid type") {
                "\n\nHint: timing values are plain milliseconds, e.g. \"processExitTimeoutMs\": 2000"
            } else {
                ""
            };
            warn!(
                error = %e,
                path = %config_path.display(),
                hint = %hint,
                "Failed to parse config JSON, using defaults"
            );
            Config::default()
        }
    }
}
