//! Desktop shell restart
//!
//! Kill every shell process, start a fresh one without restoring the previous
//! file-browser windows, wait for it to settle, then close whatever top-level
//! windows it still opened. Taskbar windows (and any configured extra classes)
//! are never closed.
//!
//! Waits are poll loops bounded by [`ShellSettings`]. Nothing here is fatal:
//! every problem is collected into the [`RestartReport`] and surfaces as a
//! caveat on the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::config::{Config, TASKBAR_WINDOW_CLASSES};
use crate::outcome::ApplyOutcome;
use crate::platform::{LaunchMode, ShellHost, ShellWindow};

#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub process_name: String,
    /// Window classes never closed. Always includes the taskbar classes.
    pub preserved_classes: Vec<String>,
    pub exit_timeout: Duration,
    pub settle_timeout: Duration,
    /// The window set must be unchanged this long before the close pass
    pub settle_quiet: Duration,
    pub poll_interval: Duration,
}

impl ShellSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            process_name: config.shell.process_name.clone(),
            preserved_classes: config.shell.preserved_classes(),
            exit_timeout: config.timing.process_exit_timeout(),
            settle_timeout: config.timing.shell_settle_timeout(),
            settle_quiet: config.timing.shell_settle_quiet(),
            poll_interval: config.timing.poll_interval(),
        }
    }

    fn is_preserved(&self, class_name: &str) -> bool {
        TASKBAR_WINDOW_CLASSES
            .iter()
            .copied()
            .chain(self.preserved_classes.iter().map(String::as_str))
            .any(|preserved| preserved.eq_ignore_ascii_case(class_name))
    }
}

/// What one restart did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartReport {
    pub terminated: Vec<u32>,
    pub launched_with: Option<LaunchMode>,
    /// Class names of the windows a close request was sent to
    pub closed: Vec<String>,
    pub preserved: Vec<String>,
    pub problems: Vec<String>,
}

impl RestartReport {
    pub fn outcome(&self) -> ApplyOutcome {
        let detail = match self.launched_with {
            Some(_) => "Explorer restarted",
            None => "Explorer was stopped but could not be restarted",
        };
        ApplyOutcome::succeeded(detail).with_caveats(self.problems.clone())
    }
}

pub struct ShellLifecycleManager {
    shell: Arc<dyn ShellHost>,
    settings: ShellSettings,
}

impl ShellLifecycleManager {
    pub fn new(shell: Arc<dyn ShellHost>, settings: ShellSettings) -> Self {
        Self { shell, settings }
    }

    /// Restart the shell. Safe to call when no shell is running.
    pub fn restart(&self) -> ApplyOutcome {
        self.restart_with_report().outcome()
    }

    #[instrument(skip(self), fields(process = %self.settings.process_name))]
    pub fn restart_with_report(&self) -> RestartReport {
        let mut report = RestartReport::default();

        self.stop_all(&mut report);
        self.start(&mut report);
        self.wait_for_settle();
        self.close_stray_windows(&mut report);

        if report.problems.is_empty() {
            info!(
                event_type = "shell",
                terminated = report.terminated.len(),
                closed = report.closed.len(),
                "Shell restarted"
            );
        } else {
            warn!(
                event_type = "shell",
                problems = ?report.problems,
                "Shell restarted with problems"
            );
        }
        report
    }

    fn stop_all(&self, report: &mut RestartReport) {
        let pids = self.shell.find_processes(&self.settings.process_name);
        if pids.is_empty() {
            debug!("No shell process running");
        }
        for pid in pids {
            if let Err(e) = self.shell.terminate(pid) {
                warn!(pid, error = %e, "Could not terminate shell process");
                report.problems.push(format!("could not terminate process {}: {}", pid, e));
                continue;
            }
            if self.wait_for_exit(pid) {
                debug!(pid, "Shell process exited");
                report.terminated.push(pid);
            } else {
                warn!(pid, timeout_ms = self.settings.exit_timeout.as_millis() as u64, "Shell process did not exit");
                report.problems.push(format!(
                    "process {} did not exit within {}ms",
                    pid,
                    self.settings.exit_timeout.as_millis()
                ));
            }
        }
    }

    /// Poll until `pid` is gone or the exit timeout passes
    fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.settings.exit_timeout;
        loop {
            if !self.shell.is_running(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    fn start(&self, report: &mut RestartReport) {
        let executable = &self.settings.process_name;
        for mode in [LaunchMode::NoWindowRestore, LaunchMode::Bare] {
            match self.shell.launch(executable, mode) {
                Ok(()) => {
                    report.launched_with = Some(mode);
                    return;
                }
                Err(e) => warn!(?mode, error = %e, "Shell launch failed"),
            }
        }
        report
            .problems
            .push(format!("could not start {}", executable));
    }

    fn shell_windows(&self) -> Vec<ShellWindow> {
        let pids = self.shell.find_processes(&self.settings.process_name);
        self.shell.top_level_windows(&pids)
    }

    /// Wait until a taskbar window exists and the window set has stopped
    /// changing, or the settle timeout passes.
    fn wait_for_settle(&self) {
        let started = Instant::now();
        let deadline = started + self.settings.settle_timeout;
        let mut last_seen: Vec<isize> = Vec::new();
        let mut last_change = started;

        loop {
            let windows = self.shell_windows();
            let mut handles: Vec<isize> = windows.iter().map(|w| w.handle).collect();
            handles.sort_unstable();
            let now = Instant::now();
            if handles != last_seen {
                last_seen = handles;
                last_change = now;
            }

            let tray_up = windows
                .iter()
                .any(|w| TASKBAR_WINDOW_CLASSES.contains(&w.class_name.as_str()));
            if tray_up && now.duration_since(last_change) >= self.settings.settle_quiet {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    windows = last_seen.len(),
                    "Shell settled"
                );
                return;
            }
            if now >= deadline {
                debug!(tray_up, "Shell settle timeout reached");
                return;
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    fn close_stray_windows(&self, report: &mut RestartReport) {
        for window in self.shell_windows() {
            if self.settings.is_preserved(&window.class_name) {
                report.preserved.push(window.class_name);
                continue;
            }
            match self.shell.close_window(window.handle) {
                Ok(()) => {
                    debug!(handle = window.handle, class = %window.class_name, "Close requested");
                    report.closed.push(window.class_name);
                }
                Err(e) => {
                    warn!(handle = window.handle, class = %window.class_name, error = %e, "Could not close window");
                    report
                        .problems
                        .push(format!("could not close {} window: {}", window.class_name, e));
                }
            }
        }
    }
}
