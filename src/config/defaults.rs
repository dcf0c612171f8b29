//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Error-mode restoration delay after native activation
pub const DEFAULT_ACTIVATION_RESTORE_MS: u64 = 10_000;
/// Error-mode restoration delay for the outer apply flow
pub const DEFAULT_APPLY_RESTORE_MS: u64 = 5_000;
/// Delay before the error-reporting service is started again
pub const DEFAULT_SERVICE_RESTART_MS: u64 = 5_000;
/// How long to wait for the reporting service to reach the requested state
pub const DEFAULT_SERVICE_WAIT_MS: u64 = 5_000;

/// Timeout for each settings-changed broadcast
pub const DEFAULT_BROADCAST_TIMEOUT_MS: u64 = 1_000;

/// Per-process exit wait after termination was requested
pub const DEFAULT_PROCESS_EXIT_TIMEOUT_MS: u64 = 2_000;
/// Upper bound on waiting for the new shell to create its windows
pub const DEFAULT_SHELL_SETTLE_TIMEOUT_MS: u64 = 3_000;
/// The shell counts as settled once its window set is unchanged for this long
pub const DEFAULT_SHELL_SETTLE_QUIET_MS: u64 = 500;
/// Poll interval for every bounded wait
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Upper bound on the native activation sequence (0 = unbounded)
pub const DEFAULT_ACTIVATION_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_SHELL_PROCESS_NAME: &str = "explorer.exe";

/// Window classes of the taskbar. These are never sent a close request.
pub const TASKBAR_WINDOW_CLASSES: &[&str] = &["Shell_TrayWnd", "Shell_SecondaryTrayWnd"];

/// Desktop windows owned by the shell that are preserved as well by default
pub const DEFAULT_EXTRA_PRESERVED_CLASSES: &[&str] = &["Progman", "WorkerW"];

pub const DEFAULT_NATIVE_LIBRARY: &str = "LongbridgeThemeCore.dll";

/// HRESULT_FROM_WIN32(ERROR_ALREADY_EXISTS), returned when the theme is already active
pub const DEFAULT_BENIGN_ACTIVATION_CODE: u32 = 0x8007_00B7;

pub const DEFAULT_REPORTING_SERVICE: &str = "WerSvc";

pub const DEFAULT_THEMES_DIR: &str = r"C:\Windows\Resources\Themes";
pub const DEFAULT_CUSTOM_THEMES_DIR: &str = r"C:\Windows\Resources\Themes\Custom";
/// Installed start-menu skins (`*.skin7` for Win7 style, `*.skin` otherwise)
pub const DEFAULT_SKINS_DIR: &str = r"C:\Program Files\Open-Shell\Skins";
