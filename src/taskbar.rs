//! Taskbar configuration written after a theme is activated.
//!
//! Color and transparency come from a name-based preset (`Aero`, `Dark`), with
//! the theme's own `[LonghornThemeManager]` values taking precedence. Blur is
//! always turned off and the theme file name is always recorded.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, ThemeError};
use crate::platform::{SettingValue, SettingsStore};
use crate::theme_package::TaskbarOverrides;

pub const TASKBAR_KEY: &str = r"Software\StartIsBack";

pub const AERO_COLOR: u32 = 0x0044_3344;
pub const AERO_ALPHA: u32 = 112;

/// Color and transparency for the taskbar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskbarAppearance {
    /// Packed `R | G << 8 | B << 16`
    pub color: Option<u32>,
    /// 0-255
    pub alpha: Option<u32>,
}

/// Preset picked from the theme's file name
pub fn preset_for(file_name: &str) -> TaskbarAppearance {
    let lower = file_name.to_lowercase();
    if lower.contains("aero") {
        TaskbarAppearance {
            color: Some(AERO_COLOR),
            alpha: Some(AERO_ALPHA),
        }
    } else if lower.contains("dark") {
        TaskbarAppearance {
            color: Some(0),
            alpha: Some(255),
        }
    } else {
        TaskbarAppearance {
            color: None,
            alpha: None,
        }
    }
}

/// The preset for `file_name` with `overrides` applied on top
pub fn resolve(file_name: &str, overrides: TaskbarOverrides) -> TaskbarAppearance {
    let preset = preset_for(file_name);
    TaskbarAppearance {
        color: overrides.color.or(preset.color).map(|c| c & 0x00FF_FFFF),
        alpha: overrides.alpha.or(preset.alpha).map(|a| a.min(255)),
    }
}

/// Writes the taskbar-config key
#[derive(Clone)]
pub struct TaskbarConfigurator {
    settings: Arc<dyn SettingsStore>,
}

impl TaskbarConfigurator {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    fn write(&self, name: &str, value: SettingValue) -> Result<()> {
        let shown = format!("{}={}", name, value);
        self.settings
            .write(TASKBAR_KEY, name, value)
            .map_err(|e| ThemeError::ConfigWrite {
                key: TASKBAR_KEY.to_string(),
                value: shown,
                message: format!("{:#}", e),
            })
    }

    /// Configure the taskbar for `theme`. Returns what was written.
    pub fn configure(&self, theme: &Path, overrides: TaskbarOverrides) -> Result<TaskbarAppearance> {
        let file_name = theme
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let appearance = resolve(&file_name, overrides);

        if let Some(color) = appearance.color {
            self.write("TaskbarColor", SettingValue::Dword(color))?;
        }
        if let Some(alpha) = appearance.alpha {
            self.write("TaskbarAlpha", SettingValue::Dword(alpha))?;
        }
        self.write("TaskbarBlur", SettingValue::Dword(0))?;
        self.write("ThemeFile", SettingValue::String(file_name.clone()))?;

        match (appearance.color, appearance.alpha) {
            (None, None) => debug!(theme = %file_name, "No taskbar preset, recorded theme only"),
            (color, alpha) => info!(
                event_type = "taskbar",
                theme = %file_name,
                color = ?color.map(|c| format!("0x{:08X}", c)),
                ?alpha,
                "Taskbar configured"
            ),
        }
        Ok(appearance)
    }

    /// File name of the theme last recorded in the taskbar key
    pub fn current_theme_file(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .settings
            .read_string(TASKBAR_KEY, "ThemeFile")?
            .filter(|name| !name.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::RecordingSettingsStore;

    fn configurator() -> (Arc<RecordingSettingsStore>, TaskbarConfigurator) {
        let store = Arc::new(RecordingSettingsStore::new());
        (store.clone(), TaskbarConfigurator::new(store))
    }

    #[test]
    fn test_aero_preset() {
        let (store, taskbar) = configurator();
        taskbar
            .configure(Path::new("LonghornAero.theme"), TaskbarOverrides::default())
            .unwrap();
        assert_eq!(store.get(TASKBAR_KEY, "TaskbarColor"), Some(SettingValue::Dword(0x0044_3344)));
        assert_eq!(store.get(TASKBAR_KEY, "TaskbarAlpha"), Some(SettingValue::Dword(112)));
        assert_eq!(store.get(TASKBAR_KEY, "TaskbarBlur"), Some(SettingValue::Dword(0)));
        assert_eq!(
            store.get(TASKBAR_KEY, "ThemeFile"),
            Some(SettingValue::String("LonghornAero.theme".into()))
        );
    }

    #[test]
    fn test_dark_preset_and_plain_theme() {
        assert_eq!(
            preset_for("Longhorn DARK.theme"),
            TaskbarAppearance {
                color: Some(0),
                alpha: Some(255)
            }
        );

        let (store, taskbar) = configurator();
        taskbar
            .configure(Path::new("Longhorn.theme"), TaskbarOverrides::default())
            .unwrap();
        let names: Vec<String> = store.writes().into_iter().map(|(_, n, _)| n).collect();
        assert_eq!(names, ["TaskbarBlur", "ThemeFile"]);
    }

    #[test]
    fn test_overrides_win_over_preset() {
        let appearance = resolve(
            "LonghornAero.theme",
            TaskbarOverrides {
                color: Some(0xFF12_3456),
                alpha: None,
            },
        );
        assert_eq!(appearance.color, Some(0x0012_3456));
        assert_eq!(appearance.alpha, Some(AERO_ALPHA));
    }

    #[test]
    fn test_write_failure_is_config_write_error() {
        let taskbar = TaskbarConfigurator::new(Arc::new(RecordingSettingsStore::new().with_failing_writes()));
        let err = taskbar
            .configure(Path::new("LonghornAero.theme"), TaskbarOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ThemeError::ConfigWrite { ref key, .. } if key == TASKBAR_KEY));
    }

    #[test]
    fn test_current_theme_file() {
        let (store, taskbar) = configurator();
        assert_eq!(taskbar.current_theme_file().unwrap(), None);
        store.seed(TASKBAR_KEY, "ThemeFile", SettingValue::String("Longhorn.theme".into()));
        assert_eq!(taskbar.current_theme_file().unwrap().as_deref(), Some("Longhorn.theme"));
    }
}
