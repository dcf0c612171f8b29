use super::*;
use std::fs;

use tempfile::TempDir;

use crate::config::TimingConfig;
use crate::diagnostics::ERROR_LOG_FILE;
use crate::platform::{
    EngineCall, RecordingPlatform, RecordingSettingsStore, RecordingShellHost,
    RecordingThemeEngine, SettingValue, ShellAction,
};
use crate::skin::START_MENU_SETTINGS_KEY;
use crate::taskbar::TASKBAR_KEY;

const AERO_THEME: &str = "[Theme]\r\nDisplayName=Longhorn Aero\r\n\r\n[Control Panel\\Desktop]\r\nWallpaper=aero.jpg\r\nWallpaperStyle=10\r\n\r\n[VisualStyles]\r\nPath=%SystemRoot%\\resources\\themes\\Longhorn\\Longhorn.msstyles\r\nColorStyle=NormalColor\r\nSize=NormalSize\r\n";

struct Harness {
    themes: TempDir,
    staging: TempDir,
    diagnostics: TempDir,
    recording: RecordingPlatform,
}

impl Harness {
    fn new() -> Self {
        Self::with(RecordingPlatform::new().with_shell(desktop()))
    }

    fn with(recording: RecordingPlatform) -> Self {
        Self {
            themes: TempDir::new().unwrap(),
            staging: TempDir::new().unwrap(),
            diagnostics: TempDir::new().unwrap(),
            recording,
        }
    }

    fn config(&self) -> Config {
        Config {
            staging_dir: Some(self.staging.path().to_string_lossy().into_owned()),
            diagnostics_dir: Some(self.diagnostics.path().to_string_lossy().into_owned()),
            timing: TimingConfig::immediate(),
            ..Config::default()
        }
    }

    fn orchestrator(&self) -> ThemeApplicationOrchestrator {
        ThemeApplicationOrchestrator::new(self.recording.platform(), &self.config())
    }

    fn write_theme(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.themes.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn aero(&self) -> PathBuf {
        fs::write(self.themes.path().join("aero.jpg"), b"jpeg").unwrap();
        self.write_theme("LonghornAero.theme", AERO_THEME)
    }

    fn staged_files(&self) -> usize {
        fs::read_dir(self.staging.path()).unwrap().count()
    }

    fn diagnostic_text(&self) -> Option<String> {
        fs::read_to_string(self.diagnostics.path().join(ERROR_LOG_FILE)).ok()
    }
}

/// One shell with a taskbar and a folder window; the relaunch restores a folder window
fn desktop() -> RecordingShellHost {
    RecordingShellHost::new()
        .with_running_shell(&["Shell_TrayWnd", "CabinetWClass"])
        .with_windows_on_launch(&["Shell_TrayWnd", "Shell_SecondaryTrayWnd", "CabinetWClass"])
}

fn join_pending(report: ApplyReport) -> ApplyOutcome {
    for handle in report.pending {
        handle.join().unwrap();
    }
    report.outcome
}

fn assert_untouched(recording: &RecordingPlatform) {
    assert!(recording.engine.calls().is_empty());
    assert!(recording.settings.writes().is_empty());
    assert!(recording.shell.actions().is_empty());
}

#[test]
fn test_aero_theme_applies_end_to_end() {
    let harness = Harness::new();
    let theme = harness.aero();

    let report = harness.orchestrator().apply_theme_traced(&theme);

    assert_eq!(
        report.states,
        [
            ApplyState::Idle,
            ApplyState::Validating,
            ApplyState::Activating,
            ApplyState::ConfiguringRegistry,
            ApplyState::RestartingShell,
            ApplyState::Done,
        ]
    );
    assert!(report.diagnostic.is_none());
    let outcome = join_pending(report);
    assert!(outcome.is_success(), "{:?}", outcome);

    let calls = harness.recording.engine.calls();
    assert!(calls.contains(&EngineCall::SetWallpaper(harness.themes.path().join("aero.jpg"))));

    let settings = &harness.recording.settings;
    assert_eq!(settings.get(TASKBAR_KEY, "TaskbarColor"), Some(SettingValue::Dword(0x0044_3344)));
    assert_eq!(settings.get(TASKBAR_KEY, "TaskbarAlpha"), Some(SettingValue::Dword(112)));
    assert_eq!(
        settings.get(TASKBAR_KEY, "ThemeFile"),
        Some(SettingValue::String("LonghornAero.theme".into()))
    );

    assert_eq!(
        harness.recording.shell.open_window_classes(),
        ["Shell_TrayWnd", "Shell_SecondaryTrayWnd"]
    );
    assert_eq!(harness.staged_files(), 0);
    assert!(harness.diagnostic_text().is_none());
}

#[test]
fn test_isolation_restored_after_run() {
    let harness = Harness::new();
    let theme = harness.aero();

    let report = harness.orchestrator().apply_theme_traced(&theme);
    // Activation scope, apply scope and reporting service
    assert_eq!(report.pending.len(), 3);
    join_pending(report);

    let error_mode = &harness.recording.error_mode;
    assert_eq!(error_mode.suppress_calls(), 1);
    assert_eq!(error_mode.restore_calls(), 1);
    assert_eq!(error_mode.current(), 0);

    let reporting = &harness.recording.reporting;
    assert_eq!(reporting.stops(), 1);
    assert_eq!(reporting.starts(), 1);
    assert!(reporting.running());
}

#[test]
fn test_malformed_theme_mutates_nothing() {
    let harness = Harness::new();
    let cases = [
        ("NoSection.theme", "[Theme]\r\nDisplayName=Broken\r\nPath=x\r\n"),
        ("NoPath.theme", "[VisualStyles]\r\nColorStyle=NormalColor\r\n"),
    ];

    for (name, contents) in cases {
        let theme = harness.write_theme(name, contents);
        let report = harness.orchestrator().apply_theme_traced(&theme);

        assert!(matches!(report.outcome, ApplyOutcome::ValidationFailed { .. }));
        assert_eq!(
            report.states,
            [ApplyState::Idle, ApplyState::Validating, ApplyState::Failed]
        );
        assert!(report.pending.is_empty());
    }

    assert_untouched(&harness.recording);
    assert_eq!(harness.recording.error_mode.suppress_calls(), 0);
    assert_eq!(harness.recording.reporting.stops(), 0);
    assert_eq!(harness.staged_files(), 0);
    assert!(harness.diagnostic_text().unwrap().contains("Theme: NoPath.theme"));
}

#[test]
fn test_missing_theme_file_fails_validation() {
    let harness = Harness::new();
    let outcome = harness
        .orchestrator()
        .apply_theme(&harness.themes.path().join("Nope.theme"));
    assert!(matches!(outcome, ApplyOutcome::ValidationFailed { .. }));
    assert_untouched(&harness.recording);
}

#[test]
fn test_activation_failure_stops_before_registry_and_shell() {
    let harness = Harness::with(
        RecordingPlatform::new()
            .with_shell(desktop())
            .with_engine(RecordingThemeEngine::new().with_init_status(0x8000_FFFF)),
    );
    let theme = harness.aero();

    let report = harness.orchestrator().apply_theme_traced(&theme);
    assert_eq!(report.states.last(), Some(&ApplyState::Failed));
    assert!(report.diagnostic.is_some());

    match join_pending(report) {
        ApplyOutcome::ActivationFailed { code, step, .. } => {
            assert_eq!(code, Some(0x8000_FFFF));
            assert_eq!(step, crate::activation::STEP_INIT);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(harness.recording.settings.writes().is_empty());
    assert!(harness.recording.shell.actions().is_empty());
    assert_eq!(harness.staged_files(), 0);
    let text = harness.diagnostic_text().unwrap();
    assert!(text.contains("Theme: LonghornAero.theme"));
    assert!(text.contains("0x8000FFFF"));

    // Cleanup still ran on the failure path
    assert!(harness.recording.reporting.running());
    assert_eq!(harness.recording.error_mode.restore_calls(), 1);
}

#[test]
fn test_benign_activation_status_proceeds() {
    let harness = Harness::with(
        RecordingPlatform::new()
            .with_shell(desktop())
            .with_engine(RecordingThemeEngine::new().with_set_active_status(0x8007_00B7)),
    );
    let theme = harness.aero();

    let outcome = join_pending(harness.orchestrator().apply_theme_traced(&theme));
    assert!(outcome.is_success(), "{:?}", outcome);
    assert!(!harness.recording.settings.writes().is_empty());
}

#[test]
fn test_settings_failure_after_activation_is_partial_and_skips_restart() {
    let harness = Harness::with(
        RecordingPlatform::new()
            .with_shell(desktop())
            .with_settings(RecordingSettingsStore::new().with_failing_writes()),
    );
    let theme = harness.aero();

    let report = harness.orchestrator().apply_theme_traced(&theme);
    assert_eq!(
        &report.states[3..],
        [ApplyState::ConfiguringRegistry, ApplyState::Done]
    );
    assert!(report.diagnostic.is_some());
    match join_pending(report) {
        ApplyOutcome::PartialFailure { caveats, .. } => {
            assert!(caveats.iter().any(|c| c.contains(TASKBAR_KEY)));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(harness.recording.shell.actions().is_empty());
}

#[test]
fn test_shell_problems_downgrade_to_partial() {
    let harness = Harness::with(
        RecordingPlatform::new().with_shell(
            RecordingShellHost::new()
                .with_stubborn_shell()
                .with_windows_on_launch(&["Shell_TrayWnd"]),
        ),
    );
    let theme = harness.aero();

    let report = harness.orchestrator().apply_theme_traced(&theme);
    assert_eq!(report.states.last(), Some(&ApplyState::Done));
    let outcome = join_pending(report);
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome.detail().contains("LonghornAero.theme"));
}

#[test]
fn test_no_shell_running_still_succeeds() {
    let harness = Harness::with(
        RecordingPlatform::new()
            .with_shell(RecordingShellHost::new().with_windows_on_launch(&["Shell_TrayWnd"])),
    );
    let theme = harness.aero();

    let outcome = join_pending(harness.orchestrator().apply_theme_traced(&theme));
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(harness.recording.shell.running().len(), 1);
}

#[test]
fn test_theme_overrides_taskbar_preset() {
    let harness = Harness::new();
    let theme = harness.write_theme(
        "Custom Aero.theme",
        "[VisualStyles]\r\nPath=x.msstyles\r\n[LonghornThemeManager]\r\nTaskbarColor=255\r\nTaskbarAlpha=40\r\n",
    );

    let outcome = join_pending(harness.orchestrator().apply_theme_traced(&theme));
    assert!(outcome.is_success(), "{:?}", outcome);

    let settings = &harness.recording.settings;
    assert_eq!(settings.get(TASKBAR_KEY, "TaskbarColor"), Some(SettingValue::Dword(255)));
    assert_eq!(settings.get(TASKBAR_KEY, "TaskbarAlpha"), Some(SettingValue::Dword(40)));
    // No wallpaper in this theme
    assert!(!harness
        .recording
        .engine
        .calls()
        .iter()
        .any(|c| matches!(c, EngineCall::SetWallpaper(_))));
}

#[test]
fn test_hillel_skin_flow() {
    let harness = Harness::new();

    let report = harness
        .orchestrator()
        .apply_skin_traced(MenuStyle::Win7, "Longhorn Hillel");
    assert_eq!(
        report.states,
        [
            ApplyState::Idle,
            ApplyState::Validating,
            ApplyState::Activating,
            ApplyState::RestartingShell,
            ApplyState::Done,
        ]
    );
    assert!(report.outcome.is_success(), "{:?}", report.outcome);

    let settings = &harness.recording.settings;
    assert_eq!(
        settings.get(START_MENU_SETTINGS_KEY, "MenuStyle"),
        Some(SettingValue::String("Win7".into()))
    );
    assert_eq!(
        settings.get(START_MENU_SETTINGS_KEY, "SkinW7"),
        Some(SettingValue::String("Longhorn Hillel".into()))
    );
    match settings.get(START_MENU_SETTINGS_KEY, "SkinOptionsW7") {
        Some(SettingValue::MultiString(options)) => {
            assert_eq!(options.len(), 13);
            assert_eq!(options[0], "SMALL_ICONS=1");
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(harness
        .recording
        .shell
        .actions()
        .contains(&ShellAction::Launch(crate::platform::LaunchMode::NoWindowRestore)));
    // Skins never touch the native engine
    assert!(harness.recording.engine.calls().is_empty());
}

#[test]
fn test_empty_skin_name_fails_validation() {
    let harness = Harness::new();
    let outcome = harness.orchestrator().apply_skin(MenuStyle::Win7, "  ");
    assert!(matches!(outcome, ApplyOutcome::ValidationFailed { .. }));
    assert_untouched(&harness.recording);
}

#[test]
fn test_skin_write_failure_is_activation_failure() {
    let harness = Harness::with(
        RecordingPlatform::new()
            .with_shell(desktop())
            .with_settings(RecordingSettingsStore::new().with_failing_writes()),
    );

    let report = harness
        .orchestrator()
        .apply_skin_traced(MenuStyle::Classic2, "Luna");
    assert!(matches!(report.outcome, ApplyOutcome::ActivationFailed { code: None, .. }));
    assert_eq!(report.states.last(), Some(&ApplyState::Failed));
    assert!(harness.recording.shell.actions().is_empty());
    assert!(harness.diagnostic_text().unwrap().contains("Theme: Luna"));
}

#[test]
fn test_status_reads_back_applied_settings() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let theme = harness.aero();

    join_pending(orchestrator.apply_theme_traced(&theme));
    orchestrator.apply_skin(MenuStyle::Win7, "Longhorn Plex");

    let status = orchestrator.status().unwrap();
    assert_eq!(status.theme_file.as_deref(), Some("LonghornAero.theme"));
    assert_eq!(status.skin.style, MenuStyle::Win7);
    assert_eq!(status.skin.skin.as_deref(), Some("Longhorn Plex"));
}

#[test]
fn test_failed_only_reachable_from_validating_or_activating() {
    use ApplyState::*;
    let all = [
        Idle,
        Validating,
        Activating,
        ConfiguringRegistry,
        RestartingShell,
        Done,
        Failed,
    ];
    for state in all {
        let expected = matches!(state, Validating | Activating);
        assert_eq!(state.can_transition_to(Failed), expected, "{}", state);
    }
    for next in all {
        assert!(!Done.can_transition_to(next));
        assert!(!Failed.can_transition_to(next));
    }
    assert!(Done.is_terminal() && Failed.is_terminal());
}
