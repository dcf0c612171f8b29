//! Process-table and service-control implementations shared by every platform.
//!
//! Process enumeration and termination go through `sysinfo`; the window half of
//! [`ShellHost`] is only available on Windows. The reporting service is driven
//! through `sc.exe`, the same way the process manager shells out to `kill`.

use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::{LaunchMode, ReportingService, ShellHost, ShellWindow};

/// Flag for `CreateProcess` that keeps the interpreter console hidden
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Poll interval while waiting for a service state change
const SERVICE_POLL: Duration = Duration::from_millis(100);

/// `explorer.exe` matches both `explorer.exe` and `explorer`
fn name_matches(process_name: &str, wanted: &str) -> bool {
    if process_name.eq_ignore_ascii_case(wanted) {
        return true;
    }
    let strip = |s: &str| {
        let lower = s.to_ascii_lowercase();
        lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
    };
    strip(process_name) == strip(wanted)
}

/// Real shell host. Re-queries the process table on every call.
#[derive(Debug, Default)]
pub struct SystemShellHost;

impl SystemShellHost {
    pub fn new() -> Self {
        Self
    }

    fn refreshed(pid: Option<u32>) -> System {
        let mut system = System::new();
        match pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
            }
            None => {
                system.refresh_processes(ProcessesToUpdate::All, true);
            }
        }
        system
    }
}

impl ShellHost for SystemShellHost {
    fn find_processes(&self, name: &str) -> Vec<u32> {
        let system = Self::refreshed(None);
        let pids: Vec<u32> = system
            .processes()
            .values()
            .filter(|p| name_matches(&p.name().to_string_lossy(), name))
            .map(|p| p.pid().as_u32())
            .collect();
        debug!(name, count = pids.len(), "Enumerated shell processes");
        pids
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let system = Self::refreshed(Some(pid));
        let process = system
            .process(Pid::from_u32(pid))
            .ok_or_else(|| anyhow!("process {} already exited", pid))?;
        if !process.kill() {
            bail!("termination of process {} was refused", pid);
        }
        Ok(())
    }

    fn is_running(&self, pid: u32) -> bool {
        Self::refreshed(Some(pid))
            .process(Pid::from_u32(pid))
            .is_some()
    }

    fn launch(&self, executable: &str, mode: LaunchMode) -> Result<()> {
        let mut command = match mode {
            LaunchMode::NoWindowRestore => {
                let mut command = Command::new("cmd.exe");
                command.args(["/c", "start", "/min", executable]);
                #[cfg(windows)]
                {
                    use std::os::windows::process::CommandExt;
                    command.creation_flags(CREATE_NO_WINDOW);
                }
                command
            }
            LaunchMode::Bare => Command::new(executable),
        };

        let child = command
            .spawn()
            .with_context(|| format!("Starting {} ({:?})", executable, mode))?;
        info!(pid = child.id(), ?mode, executable, "Shell launch requested");
        Ok(())
    }

    #[cfg(windows)]
    fn top_level_windows(&self, pids: &[u32]) -> Vec<ShellWindow> {
        super::windows::top_level_windows(pids)
    }

    #[cfg(not(windows))]
    fn top_level_windows(&self, _pids: &[u32]) -> Vec<ShellWindow> {
        debug!("top_level_windows: no-op on non-Windows platform");
        Vec::new()
    }

    #[cfg(windows)]
    fn close_window(&self, handle: isize) -> Result<()> {
        super::windows::post_close(handle)
    }

    #[cfg(not(windows))]
    fn close_window(&self, _handle: isize) -> Result<()> {
        Err(crate::error::ThemeError::Unsupported("Closing shell windows").into())
    }
}

// ============================================================================
// Reporting service via sc.exe
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    Other,
}

/// Extract the state from `sc query` output, e.g. `STATE : 4  RUNNING`
fn parse_sc_state(output: &str) -> Option<ServiceState> {
    let line = output
        .lines()
        .find(|line| line.trim_start().starts_with("STATE"))?;
    let state = if line.contains("STOP_PENDING") {
        ServiceState::StopPending
    } else if line.contains("START_PENDING") {
        ServiceState::StartPending
    } else if line.contains("RUNNING") {
        ServiceState::Running
    } else if line.contains("STOPPED") {
        ServiceState::Stopped
    } else {
        ServiceState::Other
    };
    Some(state)
}

#[derive(Debug, Clone)]
pub struct ScReportingService {
    name: String,
}

impl ScReportingService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    fn sc(&self, verb: &str) -> Result<String> {
        let output = Command::new("sc")
            .args([verb, &self.name])
            .output()
            .with_context(|| format!("Running sc {} {}", verb, self.name))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        // sc exits non-zero for "already running"/"not started"; callers re-query state
        if !output.status.success() {
            debug!(
                verb,
                service = %self.name,
                status = ?output.status.code(),
                "sc returned non-zero"
            );
        }
        Ok(stdout)
    }

    fn state(&self) -> Result<ServiceState> {
        let stdout = self.sc("query")?;
        parse_sc_state(&stdout)
            .ok_or_else(|| anyhow!("sc query {} returned no state", self.name))
    }

    fn wait_for(&self, wanted: ServiceState, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        loop {
            let state = self.state()?;
            if state == wanted {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!(
                    "service {} is {:?} after {}ms, expected {:?}",
                    self.name,
                    state,
                    wait.as_millis(),
                    wanted
                );
            }
            std::thread::sleep(SERVICE_POLL);
        }
    }
}

impl ReportingService for ScReportingService {
    fn is_running(&self) -> Result<bool> {
        Ok(self.state()? == ServiceState::Running)
    }

    fn stop(&self, wait: Duration) -> Result<()> {
        self.sc("stop")?;
        let result = self.wait_for(ServiceState::Stopped, wait);
        if let Err(e) = &result {
            warn!(error = %e, service = %self.name, "Service did not stop in time");
        }
        result
    }

    fn start(&self, wait: Duration) -> Result<()> {
        self.sc("start")?;
        self.wait_for(ServiceState::Running, wait)
    }
}
