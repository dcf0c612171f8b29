//! Theme application orchestrator
//!
//! Sequences validation, native activation, registry configuration and the
//! shell restart, and reports one [`ApplyOutcome`] per run.
//!
//! ```text
//! Idle -> Validating -> Activating -> ConfiguringRegistry -> RestartingShell -> Done
//!              |            |                 |
//!              v            v                 +--> Done (settings write failed)
//!            Failed       Failed
//! ```
//!
//! Only validation and activation can fail the run. Once the theme is active,
//! later problems become caveats on a `PartialFailure`. The skin flow has no
//! separate registry stage: writing the selection is its activation, so it goes
//! `Activating -> RestartingShell`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, instrument};

use crate::activation::{ActivationReport, ActivationSettings, NativeActivationBridge};
use crate::config::Config;
use crate::diagnostics::{self, DiagnosticRecord};
use crate::error::ThemeError;
use crate::isolation::ErrorIsolationGuard;
use crate::logging;
use crate::outcome::ApplyOutcome;
use crate::platform::Platform;
use crate::shell::{ShellLifecycleManager, ShellSettings};
use crate::skin::{MenuStyle, SkinRegistryConfigurator, SkinSelection, START_MENU_SETTINGS_KEY};
use crate::taskbar::TaskbarConfigurator;
use crate::theme_package;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    Validating,
    Activating,
    ConfiguringRegistry,
    RestartingShell,
    Done,
    Failed,
}

impl ApplyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyState::Idle => "Idle",
            ApplyState::Validating => "Validating",
            ApplyState::Activating => "Activating",
            ApplyState::ConfiguringRegistry => "ConfiguringRegistry",
            ApplyState::RestartingShell => "RestartingShell",
            ApplyState::Done => "Done",
            ApplyState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplyState::Done | ApplyState::Failed)
    }

    pub fn can_transition_to(&self, next: ApplyState) -> bool {
        use ApplyState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Activating)
                | (Validating, Failed)
                | (Activating, ConfiguringRegistry)
                | (Activating, RestartingShell)
                | (Activating, Failed)
                | (ConfiguringRegistry, RestartingShell)
                | (ConfiguringRegistry, Done)
                | (RestartingShell, Done)
        )
    }
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one run produced
#[derive(Debug)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    /// Every state entered, starting with `Idle`
    pub states: Vec<ApplyState>,
    /// Failure record, when one was written
    pub diagnostic: Option<PathBuf>,
    /// Deferred restorations still running. Joining them is optional.
    pub pending: Vec<JoinHandle<()>>,
}

/// Settings read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentStatus {
    pub theme_file: Option<String>,
    pub skin: SkinSelection,
}

/// Tracks the state of one run
struct Run {
    flow: &'static str,
    states: Vec<ApplyState>,
}

impl Run {
    fn new(flow: &'static str) -> Self {
        Self {
            flow,
            states: vec![ApplyState::Idle],
        }
    }

    fn current(&self) -> ApplyState {
        self.states.last().copied().unwrap_or(ApplyState::Idle)
    }

    fn advance(&mut self, next: ApplyState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            crate::debug_panic!("{}: illegal transition {} -> {}", self.flow, current, next);
        }
        logging::log_transition(self.flow, current.as_str(), next.as_str());
        self.states.push(next);
    }
}

pub struct ThemeApplicationOrchestrator {
    isolation: ErrorIsolationGuard,
    bridge: NativeActivationBridge,
    skins: SkinRegistryConfigurator,
    taskbar: TaskbarConfigurator,
    shell: ShellLifecycleManager,
    diagnostics_dir: PathBuf,
    apply_restore: Duration,
    service_restart: Duration,
}

impl ThemeApplicationOrchestrator {
    pub fn new(platform: Platform, config: &Config) -> Self {
        let isolation = ErrorIsolationGuard::new(&platform, config.timing.service_wait());
        Self {
            bridge: NativeActivationBridge::new(
                platform.engine.clone(),
                isolation.clone(),
                ActivationSettings::from_config(config),
            ),
            skins: SkinRegistryConfigurator::new(platform.settings.clone()),
            taskbar: TaskbarConfigurator::new(platform.settings.clone()),
            shell: ShellLifecycleManager::new(platform.shell.clone(), ShellSettings::from_config(config)),
            isolation,
            diagnostics_dir: config.get_diagnostics_dir(),
            apply_restore: config.timing.apply_restore(),
            service_restart: config.timing.service_restart(),
        }
    }

    /// Apply the theme file at `path`.
    pub fn apply_theme(&self, path: &Path) -> ApplyOutcome {
        self.apply_theme_traced(path).outcome
    }

    #[instrument(skip(self, path), fields(theme = %path.display()))]
    pub fn apply_theme_traced(&self, path: &Path) -> ApplyReport {
        let mut run = Run::new("apply_theme");
        let theme_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        run.advance(ApplyState::Validating);
        let package = match theme_package::check(path) {
            Ok(package) => package,
            Err(e) => {
                let outcome = ApplyOutcome::ValidationFailed {
                    detail: e.to_string(),
                };
                return self.fail(&mut run, &theme_name, path, outcome, Some(&e));
            }
        };

        run.advance(ApplyState::Activating);
        logging::log("APPLY", &format!("Applying {}", theme_name));
        let apply_scope = self.isolation.enter();
        let reporting = self.isolation.suppress_reporting();
        let (activation, activation_restore) = self.bridge.run_tracked(path);
        let mut report = self.configure_after(&mut run, path, &theme_name, &package, activation);
        report.pending.extend(activation_restore);
        report.pending.extend(apply_scope.release_after(self.apply_restore));
        report.pending.extend(reporting.release_after(self.service_restart));
        report
    }

    fn configure_after(
        &self,
        run: &mut Run,
        path: &Path,
        theme_name: &str,
        package: &theme_package::ThemePackage,
        activation: crate::error::Result<ActivationReport>,
    ) -> ApplyReport {
        if let Err(e) = activation {
            let outcome = ApplyOutcome::activation_failed(&e);
            return self.fail(run, theme_name, path, outcome, Some(&e));
        }
        let mut outcome = ApplyOutcome::succeeded(format!("Successfully applied {}", theme_name));

        run.advance(ApplyState::ConfiguringRegistry);
        logging::log("APPLY", "Configuring taskbar...");
        if let Err(e) = self.taskbar.configure(path, package.taskbar_overrides()) {
            logging::log_error("REGISTRY", &e.to_string(), Some("shell restart skipped"));
            outcome = outcome.with_caveats(vec![
                format!("{}", e),
                "Explorer was not restarted".to_string(),
            ]);
            run.advance(ApplyState::Done);
            let diagnostic = self.record(theme_name, path, &outcome, Some(&e));
            return self.finish(run, outcome, diagnostic);
        }

        run.advance(ApplyState::RestartingShell);
        logging::log("APPLY", "Restarting Explorer...");
        let restart = self.shell.restart_with_report();
        outcome = outcome.with_caveats(restart.problems);

        run.advance(ApplyState::Done);
        self.finish(run, outcome, None)
    }

    /// Select a start-menu skin, then restart the shell.
    pub fn apply_skin(&self, style: MenuStyle, skin_name: &str) -> ApplyOutcome {
        self.apply_skin_traced(style, skin_name).outcome
    }

    #[instrument(skip(self))]
    pub fn apply_skin_traced(&self, style: MenuStyle, skin_name: &str) -> ApplyReport {
        let mut run = Run::new("apply_skin");
        let settings_path = Path::new(START_MENU_SETTINGS_KEY);

        run.advance(ApplyState::Validating);
        if skin_name.trim().is_empty() {
            let outcome = ApplyOutcome::ValidationFailed {
                detail: "Please select a skin first".to_string(),
            };
            return self.fail(&mut run, skin_name, settings_path, outcome, None);
        }

        run.advance(ApplyState::Activating);
        if let Err(e) = self.skins.write_skin(style, skin_name) {
            let outcome = ApplyOutcome::activation_failed(&e);
            return self.fail(&mut run, skin_name, settings_path, outcome, Some(&e));
        }
        logging::log(
            "SKIN",
            &format!("Applied skin: {} for {} style. Restarting Explorer...", skin_name, style),
        );

        run.advance(ApplyState::RestartingShell);
        let restart = self.shell.restart_with_report();
        let outcome = ApplyOutcome::succeeded(format!("Skin applied: {}", skin_name))
            .with_caveats(restart.problems);

        run.advance(ApplyState::Done);
        self.finish(&mut run, outcome, None)
    }

    /// Restart the shell on its own
    pub fn restart_shell(&self) -> ApplyOutcome {
        self.shell.restart()
    }

    /// Theme file and skin currently recorded in the settings store
    pub fn status(&self) -> anyhow::Result<CurrentStatus> {
        Ok(CurrentStatus {
            theme_file: self.taskbar.current_theme_file()?,
            skin: self.skins.current()?,
        })
    }

    fn record(
        &self,
        theme: &str,
        path: &Path,
        outcome: &ApplyOutcome,
        source: Option<&ThemeError>,
    ) -> Option<PathBuf> {
        let record = DiagnosticRecord::new(theme, path, outcome, source);
        diagnostics::persist(&self.diagnostics_dir, &record)
    }

    fn fail(
        &self,
        run: &mut Run,
        theme: &str,
        path: &Path,
        outcome: ApplyOutcome,
        source: Option<&ThemeError>,
    ) -> ApplyReport {
        run.advance(ApplyState::Failed);
        logging::log_error(run.flow, outcome.detail(), Some(theme));
        let diagnostic = self.record(theme, path, &outcome, source);
        self.finish(run, outcome, diagnostic)
    }

    fn finish(&self, run: &mut Run, outcome: ApplyOutcome, diagnostic: Option<PathBuf>) -> ApplyReport {
        info!(
            event_type = "apply_outcome",
            flow = run.flow,
            state = %run.current(),
            exit_code = outcome.exit_code(),
            "{}",
            outcome
        );
        ApplyReport {
            outcome,
            states: std::mem::take(&mut run.states),
            diagnostic,
            pending: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
