//! OS seams used by the theme application flow.
//!
//! Every stateful OS subsystem the flow touches sits behind a trait:
//!
//! | Trait | Windows implementation |
//! |---|---|
//! | [`ThemeEngine`] | native theming DLL + `SendMessageTimeoutW` + `SystemParametersInfoW` |
//! | [`SettingsStore`] | `HKEY_CURRENT_USER` registry |
//! | [`ShellHost`] | `sysinfo` process table + `EnumWindows` |
//! | [`ErrorModeControl`] | process error mode (`SetErrorMode`) |
//! | [`ReportingService`] | `sc.exe` against the error-reporting service |
//!
//! The `recording` implementations perform no OS mutation; they back `--dry-run`
//! and the test suites.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;

pub mod recording;
mod system;
#[cfg(windows)]
mod windows;

pub use recording::{
    EngineCall, RecordingErrorMode, RecordingPlatform, RecordingReportingService,
    RecordingSettingsStore, RecordingShellHost, RecordingThemeEngine, ShellAction,
};
pub use system::{ScReportingService, SystemShellHost};

/// Status returned by a native theming entry point. 0 is success.
pub type NativeStatus = u32;

/// System-wide notification sent after the active theme changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// `WM_SETTINGCHANGE` scoped to "Policy"
    PolicySettingChange,
    /// `WM_THEMECHANGED`
    ThemeChanged,
}

/// The native theming subsystem
pub trait ThemeEngine: Send + Sync {
    fn signature_fix(&self, theme: &Path) -> NativeStatus;
    fn init(&self) -> NativeStatus;
    fn set_active(&self, theme: &Path) -> NativeStatus;
    /// Broadcast with "abort if hung" semantics, bounded by `timeout`.
    fn broadcast(&self, notification: Broadcast, timeout: Duration) -> Result<()>;
    /// Set the desktop wallpaper, updating the user profile and notifying windows.
    fn set_wallpaper(&self, image: &Path) -> Result<()>;
}

/// A typed registry value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    String(String),
    Dword(u32),
    MultiString(Vec<String>),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::String(s) => write!(f, "{}", s),
            SettingValue::Dword(d) => write!(f, "0x{:08X}", d),
            SettingValue::MultiString(items) => write!(f, "{}", items.join("|")),
        }
    }
}

/// Per-user key/value settings (the registry on Windows)
pub trait SettingsStore: Send + Sync {
    /// Create `key` if needed and write `name = value`.
    fn write(&self, key: &str, name: &str, value: SettingValue) -> Result<()>;
    /// Read a string value; `Ok(None)` when the key or value does not exist.
    fn read_string(&self, key: &str, name: &str) -> Result<Option<String>>;
}

/// How the new shell instance is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchMode {
    /// Start minimized through the command interpreter so previously open
    /// file-browser windows are not restored
    NoWindowRestore,
    /// Plain re-exec of the shell executable
    Bare,
}

/// A top-level window owned by a shell process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellWindow {
    pub handle: isize,
    pub pid: u32,
    pub class_name: String,
}

/// Desktop shell process and window control
pub trait ShellHost: Send + Sync {
    /// PIDs of every running process whose executable name matches `name`.
    fn find_processes(&self, name: &str) -> Vec<u32>;
    /// Request termination. Does not wait.
    fn terminate(&self, pid: u32) -> Result<()>;
    fn is_running(&self, pid: u32) -> bool;
    fn launch(&self, executable: &str, mode: LaunchMode) -> Result<()>;
    /// Visible, unowned top-level windows belonging to `pids`.
    fn top_level_windows(&self, pids: &[u32]) -> Vec<ShellWindow>;
    /// Post a close request. Fire-and-forget.
    fn close_window(&self, handle: isize) -> Result<()>;
}

/// Critical-error dialog policy of the current process
pub trait ErrorModeControl: Send + Sync {
    /// Switch to the "no fault dialogs" policy, returning the previous mode.
    fn suppress(&self) -> Result<u32>;
    fn restore(&self, previous: u32) -> Result<()>;
}

/// Background crash-reporting service
pub trait ReportingService: Send + Sync {
    fn is_running(&self) -> Result<bool>;
    fn stop(&self, wait: Duration) -> Result<()>;
    fn start(&self, wait: Duration) -> Result<()>;
}

/// The set of OS seams one apply run works against
#[derive(Clone)]
pub struct Platform {
    pub engine: Arc<dyn ThemeEngine>,
    pub settings: Arc<dyn SettingsStore>,
    pub shell: Arc<dyn ShellHost>,
    pub error_mode: Arc<dyn ErrorModeControl>,
    pub reporting: Arc<dyn ReportingService>,
}

impl Platform {
    /// Real OS implementations. Fails where native theming is unavailable.
    #[cfg(windows)]
    pub fn system(config: &Config) -> Result<Self> {
        use anyhow::Context;

        let engine = windows::NativeThemeEngine::load(&config.native.library_path)
            .with_context(|| format!("Loading {}", config.native.library_path))?;
        Ok(Self {
            engine: Arc::new(engine),
            settings: Arc::new(windows::RegistryStore),
            shell: Arc::new(SystemShellHost::new()),
            error_mode: Arc::new(windows::ProcessErrorMode),
            reporting: Arc::new(ScReportingService::new(&config.native.reporting_service)),
        })
    }

    #[cfg(not(windows))]
    pub fn system(_config: &Config) -> Result<Self> {
        Err(crate::error::ThemeError::Unsupported("Native theme activation").into())
    }
}
