//! Configuration module - timing, paths and platform names
//!
//! This module provides functionality for:
//! - Loading configuration from `<config dir>/LonghornThemeManager/config.json`
//! - Default values for all settings
//! - Type definitions for config structures
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, TimingConfig, etc.)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{
    DEFAULT_BENIGN_ACTIVATION_CODE, DEFAULT_REPORTING_SERVICE, DEFAULT_SHELL_PROCESS_NAME,
    TASKBAR_WINDOW_CLASSES,
};

pub use types::{Config, NativeConfig, ShellConfig, TimingConfig};

pub use loader::{default_config_path, load_config};

#[cfg(test)]
pub use defaults::{
    DEFAULT_ACTIVATION_RESTORE_MS, DEFAULT_APPLY_RESTORE_MS, DEFAULT_BROADCAST_TIMEOUT_MS,
    DEFAULT_PROCESS_EXIT_TIMEOUT_MS, DEFAULT_SERVICE_RESTART_MS, DEFAULT_SHELL_SETTLE_TIMEOUT_MS,
};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
