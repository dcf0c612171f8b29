//! In-memory implementations of the platform seams.
//!
//! Nothing here touches the OS. Each implementation records what it was asked
//! to do so `--dry-run` can report it and tests can assert on it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    Broadcast, ErrorModeControl, LaunchMode, NativeStatus, Platform, ReportingService,
    SettingValue, SettingsStore, ShellHost, ShellWindow, ThemeEngine,
};

/// Error mode after suppression: fail critical errors + no GP fault box
const SUPPRESSED_MODE: u32 = 0x0001 | 0x0002;

// ============================================================================
// Theme engine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `existed` is whether the path was present on disk at call time
    SignatureFix { path: PathBuf, existed: bool },
    Init,
    SetActive(PathBuf),
    Broadcast(Broadcast),
    SetWallpaper(PathBuf),
}

#[derive(Debug, Default)]
pub struct RecordingThemeEngine {
    calls: Mutex<Vec<EngineCall>>,
    signature_fix_status: AtomicU32,
    init_status: AtomicU32,
    set_active_status: AtomicU32,
    set_active_delay: Mutex<Option<Duration>>,
    fail_broadcasts: AtomicBool,
}

impl RecordingThemeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature_fix_status(self, status: NativeStatus) -> Self {
        self.signature_fix_status.store(status, Ordering::SeqCst);
        self
    }

    pub fn with_init_status(self, status: NativeStatus) -> Self {
        self.init_status.store(status, Ordering::SeqCst);
        self
    }

    pub fn with_set_active_status(self, status: NativeStatus) -> Self {
        self.set_active_status.store(status, Ordering::SeqCst);
        self
    }

    /// Make `set_active` block, simulating a hung native call
    pub fn with_set_active_delay(self, delay: Duration) -> Self {
        *self.set_active_delay.lock() = Some(delay);
        self
    }

    pub fn with_failing_broadcasts(self) -> Self {
        self.fail_broadcasts.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: EngineCall) {
        debug!(?call, "Recorded theme engine call");
        self.calls.lock().push(call);
    }
}

impl ThemeEngine for RecordingThemeEngine {
    fn signature_fix(&self, theme: &Path) -> NativeStatus {
        self.record(EngineCall::SignatureFix {
            path: theme.to_path_buf(),
            existed: theme.exists(),
        });
        self.signature_fix_status.load(Ordering::SeqCst)
    }

    fn init(&self) -> NativeStatus {
        self.record(EngineCall::Init);
        self.init_status.load(Ordering::SeqCst)
    }

    fn set_active(&self, theme: &Path) -> NativeStatus {
        self.record(EngineCall::SetActive(theme.to_path_buf()));
        let delay = *self.set_active_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.set_active_status.load(Ordering::SeqCst)
    }

    fn broadcast(&self, notification: Broadcast, _timeout: Duration) -> Result<()> {
        self.record(EngineCall::Broadcast(notification));
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            bail!("broadcast of {:?} timed out", notification);
        }
        Ok(())
    }

    fn set_wallpaper(&self, image: &Path) -> Result<()> {
        self.record(EngineCall::SetWallpaper(image.to_path_buf()));
        Ok(())
    }
}

// ============================================================================
// Settings store
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingSettingsStore {
    values: Mutex<BTreeMap<(String, String), SettingValue>>,
    writes: Mutex<Vec<(String, String, SettingValue)>>,
    fail_writes: AtomicBool,
}

impl RecordingSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Seed a value without recording it as a write
    pub fn seed(&self, key: &str, name: &str, value: SettingValue) {
        self.values
            .lock()
            .insert((key.to_string(), name.to_string()), value);
    }

    pub fn get(&self, key: &str, name: &str) -> Option<SettingValue> {
        self.values
            .lock()
            .get(&(key.to_string(), name.to_string()))
            .cloned()
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(String, String, SettingValue)> {
        self.writes.lock().clone()
    }
}

impl SettingsStore for RecordingSettingsStore {
    fn write(&self, key: &str, name: &str, value: SettingValue) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("access denied writing {}\\{}", key, name);
        }
        debug!(key, name, %value, "Recorded settings write");
        self.writes
            .lock()
            .push((key.to_string(), name.to_string(), value.clone()));
        self.values
            .lock()
            .insert((key.to_string(), name.to_string()), value);
        Ok(())
    }

    fn read_string(&self, key: &str, name: &str) -> Result<Option<String>> {
        match self.get(key, name) {
            Some(SettingValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(anyhow!("{}\\{} is not a string: {}", key, name, other)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Shell host
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    Terminate(u32),
    Launch(LaunchMode),
    Close { handle: isize, class_name: String },
}

#[derive(Debug, Default)]
struct ShellState {
    next_pid: u32,
    next_handle: isize,
    running: Vec<u32>,
    windows: Vec<ShellWindow>,
    actions: Vec<ShellAction>,
    /// Processes that ignore termination requests
    stubborn: HashSet<u32>,
    failing_launches: HashSet<LaunchMode>,
    windows_on_launch: Vec<String>,
}

impl ShellState {
    fn spawn(&mut self, classes: &[String]) -> u32 {
        self.next_pid += 1;
        let pid = 1000 + self.next_pid;
        self.running.push(pid);
        for class_name in classes {
            self.next_handle += 1;
            self.windows.push(ShellWindow {
                handle: 0x1000 + self.next_handle,
                pid,
                class_name: class_name.clone(),
            });
        }
        pid
    }
}

#[derive(Debug, Default)]
pub struct RecordingShellHost {
    state: Mutex<ShellState>,
}

impl RecordingShellHost {
    /// No shell running; a launch creates one with no windows
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running shell process owning windows of the given classes
    pub fn with_running_shell(self, classes: &[&str]) -> Self {
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        self.state.lock().spawn(&classes);
        self
    }

    /// Add a running shell process that ignores termination
    pub fn with_stubborn_shell(self) -> Self {
        {
            let mut state = self.state.lock();
            let pid = state.spawn(&[]);
            state.stubborn.insert(pid);
        }
        self
    }

    /// Window classes the next launched shell creates
    pub fn with_windows_on_launch(self, classes: &[&str]) -> Self {
        self.state.lock().windows_on_launch = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_failing_launch(self, mode: LaunchMode) -> Self {
        self.state.lock().failing_launches.insert(mode);
        self
    }

    pub fn actions(&self) -> Vec<ShellAction> {
        self.state.lock().actions.clone()
    }

    pub fn running(&self) -> Vec<u32> {
        self.state.lock().running.clone()
    }

    /// Class names of the windows still open
    pub fn open_window_classes(&self) -> Vec<String> {
        self.state
            .lock()
            .windows
            .iter()
            .map(|w| w.class_name.clone())
            .collect()
    }
}

impl ShellHost for RecordingShellHost {
    fn find_processes(&self, name: &str) -> Vec<u32> {
        debug!(name, "Recorded process query");
        self.state.lock().running.clone()
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.actions.push(ShellAction::Terminate(pid));
        if !state.running.contains(&pid) {
            bail!("process {} does not exist", pid);
        }
        if state.stubborn.contains(&pid) {
            return Ok(());
        }
        state.running.retain(|p| *p != pid);
        state.windows.retain(|w| w.pid != pid);
        Ok(())
    }

    fn is_running(&self, pid: u32) -> bool {
        self.state.lock().running.contains(&pid)
    }

    fn launch(&self, executable: &str, mode: LaunchMode) -> Result<()> {
        let mut state = self.state.lock();
        state.actions.push(ShellAction::Launch(mode));
        if state.failing_launches.contains(&mode) {
            bail!("could not start {} ({:?})", executable, mode);
        }
        let classes = state.windows_on_launch.clone();
        state.spawn(&classes);
        Ok(())
    }

    fn top_level_windows(&self, pids: &[u32]) -> Vec<ShellWindow> {
        self.state
            .lock()
            .windows
            .iter()
            .filter(|w| pids.contains(&w.pid))
            .cloned()
            .collect()
    }

    fn close_window(&self, handle: isize) -> Result<()> {
        let mut state = self.state.lock();
        let Some(index) = state.windows.iter().position(|w| w.handle == handle) else {
            bail!("window {:#x} does not exist", handle);
        };
        let window = state.windows.remove(index);
        state.actions.push(ShellAction::Close {
            handle,
            class_name: window.class_name,
        });
        Ok(())
    }
}

// ============================================================================
// Error mode and reporting service
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingErrorMode {
    current: AtomicU32,
    suppress_calls: AtomicU32,
    restore_calls: AtomicU32,
    fail: AtomicBool,
}

impl RecordingErrorMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_mode(self, mode: u32) -> Self {
        self.current.store(mode, Ordering::SeqCst);
        self
    }

    pub fn with_failures(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn suppress_calls(&self) -> u32 {
        self.suppress_calls.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> u32 {
        self.restore_calls.load(Ordering::SeqCst)
    }
}

impl ErrorModeControl for RecordingErrorMode {
    fn suppress(&self) -> Result<u32> {
        self.suppress_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("error mode is not writable");
        }
        Ok(self.current.swap(SUPPRESSED_MODE, Ordering::SeqCst))
    }

    fn restore(&self, previous: u32) -> Result<()> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("error mode is not writable");
        }
        self.current.store(previous, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct RecordingReportingService {
    running: AtomicBool,
    stops: AtomicU32,
    starts: AtomicU32,
    fail: AtomicBool,
    stop_delay: Duration,
}

impl Default for RecordingReportingService {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            stops: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            stop_delay: Duration::ZERO,
        }
    }
}

impl RecordingReportingService {
    /// A service that is currently running
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopped() -> Self {
        let service = Self::default();
        service.running.store(false, Ordering::SeqCst);
        service
    }

    pub fn with_failures(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Make `stop` take this long, like a slow service control manager
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ReportingService for RecordingReportingService {
    fn is_running(&self) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("service control manager unavailable");
        }
        Ok(self.running())
    }

    fn stop(&self, _wait: Duration) -> Result<()> {
        std::thread::sleep(self.stop_delay);
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("service control manager unavailable");
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self, _wait: Duration) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("service control manager unavailable");
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Concrete recording implementations, kept typed so callers can inspect them
#[derive(Debug, Clone, Default)]
pub struct RecordingPlatform {
    pub engine: Arc<RecordingThemeEngine>,
    pub settings: Arc<RecordingSettingsStore>,
    pub shell: Arc<RecordingShellHost>,
    pub error_mode: Arc<RecordingErrorMode>,
    pub reporting: Arc<RecordingReportingService>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plausible desktop for `--dry-run`: one shell with a taskbar and an
    /// open folder window, and a relaunch that restores a folder window.
    pub fn dry_run() -> Self {
        Self {
            shell: Arc::new(
                RecordingShellHost::new()
                    .with_running_shell(&["Shell_TrayWnd", "CabinetWClass"])
                    .with_windows_on_launch(&["Shell_TrayWnd", "Progman", "CabinetWClass"]),
            ),
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: RecordingThemeEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn with_settings(mut self, settings: RecordingSettingsStore) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_shell(mut self, shell: RecordingShellHost) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    pub fn with_error_mode(mut self, error_mode: RecordingErrorMode) -> Self {
        self.error_mode = Arc::new(error_mode);
        self
    }

    pub fn with_reporting(mut self, reporting: RecordingReportingService) -> Self {
        self.reporting = Arc::new(reporting);
        self
    }

    pub fn platform(&self) -> Platform {
        Platform {
            engine: self.engine.clone(),
            settings: self.settings.clone(),
            shell: self.shell.clone(),
            error_mode: self.error_mode.clone(),
            reporting: self.reporting.clone(),
        }
    }
}
