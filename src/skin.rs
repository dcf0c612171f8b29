//! Start-menu skin selection
//!
//! A selection is a (style, skin name) pair written under the start-menu
//! settings key. A few built-in skins also carry an option set, a fixed list of
//! `NAME=VALUE` flags written as one multi-string value.
//!
//! Unknown skin names only write the plain selection. Any option set written for
//! an earlier skin stays in place.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, instrument};

use crate::error::{Result, ThemeError};
use crate::outcome::ApplyOutcome;
use crate::platform::{SettingValue, SettingsStore};

pub const START_MENU_SETTINGS_KEY: &str = r"Software\OpenShell\StartMenu\Settings";
pub const MENU_STYLE_VALUE: &str = "MenuStyle";

/// Menu layout the skin applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuStyle {
    Win7,
    /// Two-column classic layout
    Classic2,
}

impl MenuStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuStyle::Win7 => "Win7",
            MenuStyle::Classic2 => "Classic2",
        }
    }

    /// Registry value holding the skin name for this style
    pub fn skin_value_name(&self) -> &'static str {
        match self {
            MenuStyle::Win7 => "SkinW7",
            MenuStyle::Classic2 => "SkinC2",
        }
    }

    pub fn options_value_name(&self) -> &'static str {
        match self {
            MenuStyle::Win7 => "SkinOptionsW7",
            MenuStyle::Classic2 => "SkinOptionsC2",
        }
    }

    pub fn variation_value_name(&self) -> &'static str {
        match self {
            MenuStyle::Win7 => "SkinVariationW7",
            MenuStyle::Classic2 => "SkinVariationC2",
        }
    }

    /// Extension of installed skin files for this style
    pub fn skin_extension(&self) -> &'static str {
        match self {
            MenuStyle::Win7 => "skin7",
            MenuStyle::Classic2 => "skin",
        }
    }
}

impl fmt::Display for MenuStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MenuStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "win7" | "windows7" => Ok(MenuStyle::Win7),
            "classic2" | "xp" => Ok(MenuStyle::Classic2),
            other => Err(format!(
                "unknown menu style '{}', expected win7 or classic2",
                other
            )),
        }
    }
}

/// A built-in skin with a fixed option set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownSkin {
    pub name: &'static str,
    pub style: MenuStyle,
    pub variation: Option<&'static str>,
    pub options: &'static [&'static str],
}

const PLEX_OPTIONS: &[&str] = &[
    "NO_TOP=1",
    "BRANDED=1",
    "USER_IMAGE=0",
    "USER_IMAGE_OUT=0",
    "NO_IMAGE=0",
    "SMALL_ICONS=1",
];

const HILLEL_OPTIONS: &[&str] = &[
    "SMALL_ICONS=1",
    "LARGE_FONT=0",
    "ARROW=1",
    "DISABLE_MASK=1",
    "BLACK_TEXT_GLASS=0",
    "INVERT_SEPARATOR=0",
    "BLACK_SHUTDOWN_TEXT=0",
    "BLACK_BUTTONS=0",
    "STONE_ARROW=0",
    "FLAT_SELECTORS=0",
    "SHUTDOWN_GLYPH=0",
    "RUBY_ORB=0",
    "AMBER_ORB=0",
];

pub const KNOWN_SKINS: &[KnownSkin] = &[
    KnownSkin {
        name: "Longhorn Plex",
        style: MenuStyle::Win7,
        variation: Some("Light"),
        options: PLEX_OPTIONS,
    },
    KnownSkin {
        name: "Longhorn Hillel",
        style: MenuStyle::Win7,
        variation: None,
        options: HILLEL_OPTIONS,
    },
];

/// The built-in skin for this exact (style, name) pair. Names match case-insensitively.
pub fn known_skin(style: MenuStyle, name: &str) -> Option<&'static KnownSkin> {
    KNOWN_SKINS
        .iter()
        .find(|skin| skin.style == style && skin.name.eq_ignore_ascii_case(name.trim()))
}

/// Skin names installed in `dir` for `style`, sorted and deduplicated
pub fn list_skins(dir: &Path, style: MenuStyle) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ThemeError::io(format!("Reading skins directory {}", dir.display()), e))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(style.skin_extension()))
        })
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort_by_key(|name| name.to_lowercase());
    names.dedup();
    debug!(dir = %dir.display(), %style, count = names.len(), "Skins listed");
    Ok(names)
}

/// The selection currently recorded in the settings key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinSelection {
    pub style: MenuStyle,
    pub skin: Option<String>,
}

/// Writes skin selections to the settings store
#[derive(Clone)]
pub struct SkinRegistryConfigurator {
    settings: Arc<dyn SettingsStore>,
}

impl SkinRegistryConfigurator {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    fn write(&self, name: &str, value: SettingValue) -> Result<()> {
        let shown = value.to_string();
        self.settings
            .write(START_MENU_SETTINGS_KEY, name, value)
            .with_context(|| format!("{}\\{}", START_MENU_SETTINGS_KEY, name))
            .map_err(|e| ThemeError::ConfigWrite {
                key: START_MENU_SETTINGS_KEY.to_string(),
                value: format!("{}={}", name, shown),
                message: format!("{:#}", e),
            })
    }

    /// Write the selection and, for a built-in skin, its option set.
    ///
    /// Returns the built-in skin that was matched, if any.
    #[instrument(skip(self))]
    pub fn write_skin(&self, style: MenuStyle, skin_name: &str) -> Result<Option<&'static KnownSkin>> {
        self.write(MENU_STYLE_VALUE, SettingValue::String(style.as_str().to_string()))?;
        self.write(
            style.skin_value_name(),
            SettingValue::String(skin_name.to_string()),
        )?;

        let known = known_skin(style, skin_name);
        match known {
            Some(skin) => {
                if let Some(variation) = skin.variation {
                    self.write(
                        style.variation_value_name(),
                        SettingValue::String(variation.to_string()),
                    )?;
                }
                self.write(
                    style.options_value_name(),
                    SettingValue::MultiString(skin.options.iter().map(|o| o.to_string()).collect()),
                )?;
                info!(
                    event_type = "skin",
                    skin = skin.name,
                    %style,
                    options = skin.options.len(),
                    "Skin option set written"
                );
            }
            None => debug!(skin_name, %style, "No option set for skin, selection only"),
        }
        Ok(known)
    }

    /// [`write_skin`](Self::write_skin) reported as an outcome
    pub fn apply_skin(&self, style: MenuStyle, skin_name: &str) -> ApplyOutcome {
        match self.write_skin(style, skin_name) {
            Ok(_) => ApplyOutcome::succeeded(format!(
                "Applied skin: {} for {} style",
                skin_name,
                style
            )),
            Err(e) => ApplyOutcome::activation_failed(&e),
        }
    }

    /// Read back the recorded style and its skin. A missing style means `Win7`.
    pub fn current(&self) -> anyhow::Result<SkinSelection> {
        let style = self
            .settings
            .read_string(START_MENU_SETTINGS_KEY, MENU_STYLE_VALUE)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(MenuStyle::Win7);
        let skin = self
            .settings
            .read_string(START_MENU_SETTINGS_KEY, style.skin_value_name())?;
        Ok(SkinSelection { style, skin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::RecordingSettingsStore;

    fn configurator() -> (Arc<RecordingSettingsStore>, SkinRegistryConfigurator) {
        let store = Arc::new(RecordingSettingsStore::new());
        (store.clone(), SkinRegistryConfigurator::new(store))
    }

    fn names(store: &RecordingSettingsStore) -> Vec<String> {
        store.writes().into_iter().map(|(_, name, _)| name).collect()
    }

    #[test]
    fn test_hillel_under_win7_writes_selection_and_options() {
        let (store, skins) = configurator();
        assert!(skins.apply_skin(MenuStyle::Win7, "Longhorn Hillel").is_success());

        assert_eq!(
            store.get(START_MENU_SETTINGS_KEY, "MenuStyle"),
            Some(SettingValue::String("Win7".into()))
        );
        assert_eq!(
            store.get(START_MENU_SETTINGS_KEY, "SkinW7"),
            Some(SettingValue::String("Longhorn Hillel".into()))
        );
        match store.get(START_MENU_SETTINGS_KEY, "SkinOptionsW7") {
            Some(SettingValue::MultiString(options)) => {
                assert_eq!(options.len(), 13);
                assert_eq!(options[0], "SMALL_ICONS=1");
                assert_eq!(options[12], "AMBER_ORB=0");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plex_writes_variation() {
        let (store, skins) = configurator();
        let known = skins.write_skin(MenuStyle::Win7, "longhorn plex").unwrap();
        assert_eq!(known.map(|k| k.name), Some("Longhorn Plex"));
        assert_eq!(
            names(&store),
            ["MenuStyle", "SkinW7", "SkinVariationW7", "SkinOptionsW7"]
        );
        assert_eq!(
            store.get(START_MENU_SETTINGS_KEY, "SkinVariationW7"),
            Some(SettingValue::String("Light".into()))
        );
    }

    #[test]
    fn test_skin_name_is_stored_as_given() {
        let (store, skins) = configurator();
        let known = skins.write_skin(MenuStyle::Win7, " Longhorn Hillel ").unwrap();
        // Option lookup tolerates the padding, the stored selection keeps it
        assert!(known.is_some());
        assert_eq!(
            store.get(START_MENU_SETTINGS_KEY, "SkinW7"),
            Some(SettingValue::String(" Longhorn Hillel ".into()))
        );
    }

    #[test]
    fn test_known_skin_under_other_style_writes_selection_only() {
        let (store, skins) = configurator();
        let known = skins.write_skin(MenuStyle::Classic2, "Longhorn Hillel").unwrap();
        assert!(known.is_none());
        assert_eq!(names(&store), ["MenuStyle", "SkinC2"]);
    }

    #[test]
    fn test_unknown_skin_keeps_previous_options() {
        let (store, skins) = configurator();
        skins.write_skin(MenuStyle::Win7, "Longhorn Hillel").unwrap();
        skins.write_skin(MenuStyle::Win7, "Some Other Skin").unwrap();

        assert_eq!(
            store.get(START_MENU_SETTINGS_KEY, "SkinW7"),
            Some(SettingValue::String("Some Other Skin".into()))
        );
        assert!(matches!(
            store.get(START_MENU_SETTINGS_KEY, "SkinOptionsW7"),
            Some(SettingValue::MultiString(ref o)) if o.len() == 13
        ));
    }

    #[test]
    fn test_write_failure_is_activation_failure() {
        let store = Arc::new(RecordingSettingsStore::new().with_failing_writes());
        let skins = SkinRegistryConfigurator::new(store);
        match skins.apply_skin(MenuStyle::Win7, "Longhorn Plex") {
            ApplyOutcome::ActivationFailed { code, detail, .. } => {
                assert_eq!(code, None);
                assert!(detail.contains("MenuStyle"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_current_defaults_to_win7() {
        let (store, skins) = configurator();
        assert_eq!(
            skins.current().unwrap(),
            SkinSelection {
                style: MenuStyle::Win7,
                skin: None
            }
        );

        store.seed(START_MENU_SETTINGS_KEY, "MenuStyle", SettingValue::String("Classic2".into()));
        store.seed(START_MENU_SETTINGS_KEY, "SkinC2", SettingValue::String("XP Luna".into()));
        assert_eq!(
            skins.current().unwrap(),
            SkinSelection {
                style: MenuStyle::Classic2,
                skin: Some("XP Luna".into())
            }
        );
    }

    #[test]
    fn test_menu_style_parsing() {
        assert_eq!("WIN7".parse::<MenuStyle>(), Ok(MenuStyle::Win7));
        assert_eq!("classic2".parse::<MenuStyle>(), Ok(MenuStyle::Classic2));
        assert!("classic1".parse::<MenuStyle>().is_err());
    }

    #[test]
    fn test_list_skins_filters_by_style() {
        let dir = tempfile::TempDir::new().unwrap();
        for file in ["Longhorn Plex.skin7", "Longhorn Hillel.skin7", "Luna.skin", "readme.txt"] {
            std::fs::write(dir.path().join(file), b"").unwrap();
        }
        assert_eq!(
            list_skins(dir.path(), MenuStyle::Win7).unwrap(),
            ["Longhorn Hillel", "Longhorn Plex"]
        );
        assert_eq!(list_skins(dir.path(), MenuStyle::Classic2).unwrap(), ["Luna"]);
        assert!(list_skins(&dir.path().join("missing"), MenuStyle::Win7).is_err());
    }
}
