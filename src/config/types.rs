//! Configuration type definitions
//!
//! This module contains all the struct definitions for configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;

// ============================================
// TIMING
// ============================================

/// Every delay and bounded wait used while applying a theme
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Error-mode restoration delay after native activation (default: 10000)
    #[serde(default = "default_activation_restore_ms")]
    pub activation_restore_ms: u64,
    /// Error-mode restoration delay for the whole apply flow (default: 5000)
    #[serde(default = "default_apply_restore_ms")]
    pub apply_restore_ms: u64,
    /// Delay before the reporting service is started again (default: 5000)
    #[serde(default = "default_service_restart_ms")]
    pub service_restart_ms: u64,
    /// Wait for the reporting service to stop/start (default: 5000)
    #[serde(default = "default_service_wait_ms")]
    pub service_wait_ms: u64,
    /// Timeout per settings-changed broadcast (default: 1000)
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    /// Exit wait per terminated shell process (default: 2000)
    #[serde(default = "default_process_exit_timeout_ms")]
    pub process_exit_timeout_ms: u64,
    /// Upper bound on waiting for the new shell's windows (default: 3000)
    #[serde(default = "default_shell_settle_timeout_ms")]
    pub shell_settle_timeout_ms: u64,
    /// Window set must be stable this long to count as settled (default: 500)
    #[serde(default = "default_shell_settle_quiet_ms")]
    pub shell_settle_quiet_ms: u64,
    /// Poll interval for all bounded waits (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on the native activation sequence, 0 = unbounded (default: 60000)
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,
}

fn default_activation_restore_ms() -> u64 {
    DEFAULT_ACTIVATION_RESTORE_MS
}
fn default_apply_restore_ms() -> u64 {
    DEFAULT_APPLY_RESTORE_MS
}
fn default_service_restart_ms() -> u64 {
    DEFAULT_SERVICE_RESTART_MS
}
fn default_service_wait_ms() -> u64 {
    DEFAULT_SERVICE_WAIT_MS
}
fn default_broadcast_timeout_ms() -> u64 {
    DEFAULT_BROADCAST_TIMEOUT_MS
}
fn default_process_exit_timeout_ms() -> u64 {
    DEFAULT_PROCESS_EXIT_TIMEOUT_MS
}
fn default_shell_settle_timeout_ms() -> u64 {
    DEFAULT_SHELL_SETTLE_TIMEOUT_MS
}
fn default_shell_settle_quiet_ms() -> u64 {
    DEFAULT_SHELL_SETTLE_QUIET_MS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_activation_timeout_ms() -> u64 {
    DEFAULT_ACTIVATION_TIMEOUT_MS
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            activation_restore_ms: DEFAULT_ACTIVATION_RESTORE_MS,
            apply_restore_ms: DEFAULT_APPLY_RESTORE_MS,
            service_restart_ms: DEFAULT_SERVICE_RESTART_MS,
            service_wait_ms: DEFAULT_SERVICE_WAIT_MS,
            broadcast_timeout_ms: DEFAULT_BROADCAST_TIMEOUT_MS,
            process_exit_timeout_ms: DEFAULT_PROCESS_EXIT_TIMEOUT_MS,
            shell_settle_timeout_ms: DEFAULT_SHELL_SETTLE_TIMEOUT_MS,
            shell_settle_quiet_ms: DEFAULT_SHELL_SETTLE_QUIET_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            activation_timeout_ms: DEFAULT_ACTIVATION_TIMEOUT_MS,
        }
    }
}

impl TimingConfig {
    /// All delays zero except a tiny poll interval; used by tests and dry runs.
    pub fn immediate() -> Self {
        TimingConfig {
            activation_restore_ms: 0,
            apply_restore_ms: 0,
            service_restart_ms: 0,
            service_wait_ms: 0,
            broadcast_timeout_ms: 0,
            process_exit_timeout_ms: 0,
            shell_settle_timeout_ms: 0,
            shell_settle_quiet_ms: 0,
            poll_interval_ms: 1,
            activation_timeout_ms: 0,
        }
    }

    pub fn activation_restore(&self) -> Duration {
        Duration::from_millis(self.activation_restore_ms)
    }
    pub fn apply_restore(&self) -> Duration {
        Duration::from_millis(self.apply_restore_ms)
    }
    pub fn service_restart(&self) -> Duration {
        Duration::from_millis(self.service_restart_ms)
    }
    pub fn service_wait(&self) -> Duration {
        Duration::from_millis(self.service_wait_ms)
    }
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
    pub fn process_exit_timeout(&self) -> Duration {
        Duration::from_millis(self.process_exit_timeout_ms)
    }
    pub fn shell_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_settle_timeout_ms)
    }
    pub fn shell_settle_quiet(&self) -> Duration {
        Duration::from_millis(self.shell_settle_quiet_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
    /// `None` means wait for the native engine indefinitely.
    pub fn activation_timeout(&self) -> Option<Duration> {
        match self.activation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// ============================================
// SHELL
// ============================================

/// Which process is the desktop shell and which of its windows survive a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    /// Executable name of the shell (default: "explorer.exe")
    #[serde(default = "default_shell_process_name")]
    pub process_name: String,
    /// Window classes preserved in addition to the taskbar classes
    #[serde(default = "default_extra_preserved_classes")]
    pub extra_preserved_classes: Vec<String>,
}

fn default_shell_process_name() -> String {
    DEFAULT_SHELL_PROCESS_NAME.to_string()
}
fn default_extra_preserved_classes() -> Vec<String> {
    DEFAULT_EXTRA_PRESERVED_CLASSES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            process_name: default_shell_process_name(),
            extra_preserved_classes: default_extra_preserved_classes(),
        }
    }
}

impl ShellConfig {
    /// Taskbar classes first, then the configured extras
    pub fn preserved_classes(&self) -> Vec<String> {
        TASKBAR_WINDOW_CLASSES
            .iter()
            .map(|s| s.to_string())
            .chain(self.extra_preserved_classes.iter().cloned())
            .collect()
    }
}

// ============================================
// NATIVE
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeConfig {
    /// Path or name of the native theming library (default: "LongbridgeThemeCore.dll")
    #[serde(default = "default_native_library")]
    pub library_path: String,
    /// Non-zero set-active status treated as success (default: 0x800700B7)
    #[serde(default = "default_benign_activation_code")]
    pub benign_activation_code: u32,
    /// Error-reporting service stopped around activation (default: "WerSvc")
    #[serde(default = "default_reporting_service")]
    pub reporting_service: String,
}

fn default_native_library() -> String {
    DEFAULT_NATIVE_LIBRARY.to_string()
}
fn default_benign_activation_code() -> u32 {
    DEFAULT_BENIGN_ACTIVATION_CODE
}
fn default_reporting_service() -> String {
    DEFAULT_REPORTING_SERVICE.to_string()
}

impl Default for NativeConfig {
    fn default() -> Self {
        NativeConfig {
            library_path: default_native_library(),
            benign_activation_code: DEFAULT_BENIGN_ACTIVATION_CODE,
            reporting_service: default_reporting_service(),
        }
    }
}

// ============================================
// MAIN CONFIG
// ============================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory of the bundled themes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes_dir: Option<String>,
    /// Directory custom themes are saved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_themes_dir: Option<String>,
    /// Directory scanned for installed start-menu skins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skins_dir: Option<String>,
    /// Where the disposable theme copy is staged (default: OS temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
    /// Where the failure record is written (default: next to the executable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_dir: Option<String>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub native: NativeConfig,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Same settings with every delay dropped; the recording platform has
    /// nothing to wait for.
    pub fn for_dry_run(self) -> Self {
        Self {
            timing: TimingConfig::immediate(),
            ..self
        }
    }

    pub fn get_themes_dir(&self) -> PathBuf {
        self.themes_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_THEMES_DIR))
    }

    pub fn get_custom_themes_dir(&self) -> PathBuf {
        self.custom_themes_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CUSTOM_THEMES_DIR))
    }

    pub fn get_skins_dir(&self) -> PathBuf {
        self.skins_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SKINS_DIR))
    }

    pub fn get_staging_dir(&self) -> PathBuf {
        self.staging_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Falls back to the current directory when the executable path is unknown
    pub fn get_diagnostics_dir(&self) -> PathBuf {
        if let Some(dir) = self.diagnostics_dir.as_deref() {
            return expand(dir);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
