//! Error isolation around the native activation call.
//!
//! Two independent suppressions are managed here:
//! - the process error mode (no critical-error or GP-fault dialogs)
//! - the background crash-reporting service
//!
//! Both are ref-counted, each under its own lock so a slow service stop never
//! holds up the error-mode half. The first token captures the previous state,
//! the last token to be released restores it, so overlapping or nested scopes
//! compose and restoration happens exactly once. Tokens restore on drop; `release_after`
//! hands the token to a background thread that drops it after a delay.
//!
//! Failures to capture or restore are logged and never abort the caller.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ResultExt;
use crate::platform::{ErrorModeControl, Platform, ReportingService};

#[derive(Debug, Default)]
struct ModeState {
    depth: usize,
    /// `None` while inactive, or when capturing the mode failed
    previous: Option<u32>,
}

/// Held across service stop/start, which can take up to `service_wait`
#[derive(Debug, Default)]
struct ServiceState {
    depth: usize,
    was_running: bool,
}

struct Shared {
    error_mode: Arc<dyn ErrorModeControl>,
    reporting: Arc<dyn ReportingService>,
    service_wait: Duration,
    mode: Mutex<ModeState>,
    service: Mutex<ServiceState>,
}

impl Shared {
    fn release_mode(&self) {
        let mut state = self.mode.lock();
        if state.depth == 0 {
            crate::debug_panic!("error mode released more times than entered");
            return;
        }
        state.depth -= 1;
        if state.depth > 0 {
            debug!(depth = state.depth, "Error mode still held by another scope");
            return;
        }
        if let Some(previous) = state.previous.take() {
            if self.error_mode.restore(previous).log_err().is_some() {
                info!(
                    event_type = "isolation",
                    mode = format_args!("{:#x}", previous),
                    "Error mode restored"
                );
            }
        }
    }

    fn release_reporting(&self) {
        let mut state = self.service.lock();
        if state.depth == 0 {
            crate::debug_panic!("reporting service released more times than suppressed");
            return;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        if std::mem::take(&mut state.was_running) {
            if self.reporting.start(self.service_wait).warn_on_err().is_some() {
                info!(event_type = "isolation", "Error reporting service restarted");
            }
        }
    }
}

/// Move `token` to a named thread that drops it after `delay`. If the thread
/// cannot be created the closure is dropped with it, releasing immediately.
fn drop_later<T: Send + 'static>(name: &str, delay: Duration, token: T) -> Option<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            std::thread::sleep(delay);
            drop(token);
        })
        .map_err(|e| warn!(error = %e, thread = name, "Deferred release failed, released now"))
        .ok()
}

/// Scope that suppresses the process error mode while held
#[must_use = "dropping the token ends the suppression immediately"]
pub struct ErrorModeToken {
    shared: Option<Arc<Shared>>,
}

impl ErrorModeToken {
    /// Restore now (if this is the last holder)
    pub fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_mode();
        }
    }

    /// Restore after `delay` on a background thread. Not cancellable.
    pub fn release_after(self, delay: Duration) -> Option<JoinHandle<()>> {
        drop_later("error-mode-restore", delay, self)
    }
}

impl Drop for ErrorModeToken {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_mode();
        }
    }
}

/// Scope that keeps the crash-reporting service stopped while held
#[must_use = "dropping the token restarts the service immediately"]
pub struct ReportingToken {
    shared: Option<Arc<Shared>>,
}

impl ReportingToken {
    pub fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_reporting();
        }
    }

    /// Restart the service after `delay` on a background thread. Not cancellable.
    pub fn release_after(self, delay: Duration) -> Option<JoinHandle<()>> {
        drop_later("reporting-restart", delay, self)
    }
}

impl Drop for ReportingToken {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_reporting();
        }
    }
}

/// Shared owner of the isolation state. Cheap to clone.
#[derive(Clone)]
pub struct ErrorIsolationGuard {
    shared: Arc<Shared>,
}

impl ErrorIsolationGuard {
    /// `service_wait` bounds each stop/start of the reporting service.
    pub fn new(platform: &Platform, service_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                error_mode: platform.error_mode.clone(),
                reporting: platform.reporting.clone(),
                service_wait,
                mode: Mutex::new(ModeState::default()),
                service: Mutex::new(ServiceState::default()),
            }),
        }
    }

    /// Suppress fault dialogs. The first holder captures the previous mode.
    pub fn enter(&self) -> ErrorModeToken {
        let mut state = self.shared.mode.lock();
        state.depth += 1;
        if state.depth == 1 {
            state.previous = self.shared.error_mode.suppress().log_err();
            if let Some(previous) = state.previous {
                info!(
                    event_type = "isolation",
                    previous = format_args!("{:#x}", previous),
                    "Fault dialogs suppressed"
                );
            }
        } else {
            debug!(depth = state.depth, "Joined existing error mode suppression");
        }
        ErrorModeToken {
            shared: Some(self.shared.clone()),
        }
    }

    /// Restore immediately. Same as dropping the token.
    pub fn exit(&self, token: ErrorModeToken) {
        token.release();
    }

    /// Stop the crash-reporting service. It is only restarted later if it was
    /// running when the first holder stopped it.
    pub fn suppress_reporting(&self) -> ReportingToken {
        let mut state = self.shared.service.lock();
        state.depth += 1;
        if state.depth == 1 {
            let running = self.shared.reporting.is_running().warn_on_err();
            state.was_running = running == Some(true);
            if state.was_running {
                if self
                    .shared
                    .reporting
                    .stop(self.shared.service_wait)
                    .warn_on_err()
                    .is_some()
                {
                    info!(event_type = "isolation", "Error reporting service stopped");
                }
            } else {
                debug!(?running, "Error reporting service not running, nothing to stop");
            }
        }
        ReportingToken {
            shared: Some(self.shared.clone()),
        }
    }

    /// Whether any error-mode scope is currently held
    pub fn is_active(&self) -> bool {
        self.shared.mode.lock().depth > 0
    }
}
