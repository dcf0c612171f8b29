//! Theme package files (`*.theme`)
//!
//! A theme package is an INI-like text file: `[Section]` headers followed by
//! `Key=Value` lines. Packages are re-read from disk on every operation and
//! never cached, so edits made while the tool is open are always picked up.
//!
//! Sections read here:
//! - `[Theme]` `DisplayName`
//! - `[Control Panel\Desktop]` `Wallpaper`, `WallpaperStyle`
//! - `[VisualStyles]` `Path` (mandatory), `ColorStyle`, `Size`
//! - `[LonghornThemeManager]` `TaskbarColor`, `TaskbarAlpha` (optional overrides)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::{Result, ThemeError};

pub const THEME_SECTION: &str = "Theme";
pub const DESKTOP_SECTION: &str = r"Control Panel\Desktop";
pub const VISUAL_STYLES_SECTION: &str = "VisualStyles";
pub const MANAGER_SECTION: &str = "LonghornThemeManager";

/// Visual style every custom theme points at
pub const LONGHORN_VISUAL_STYLE: &str =
    r"%SystemRoot%\resources\themes\Longhorn\Longhorn.msstyles";

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"%([^%]+)%").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

/// A parsed theme package. Lookups are case-insensitive; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemePackage {
    path: Option<PathBuf>,
    sections: Vec<Section>,
}

/// Taskbar values carried in the package's private section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskbarOverrides {
    /// Packed `R | G << 8 | B << 16`
    pub color: Option<u32>,
    /// 0-255
    pub alpha: Option<u32>,
}

impl TaskbarOverrides {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.alpha.is_none()
    }
}

/// Decode file bytes honouring UTF-8 and UTF-16 byte-order marks
fn decode_text(bytes: &[u8]) -> String {
    fn utf16(body: &[u8], from: fn([u8; 2]) -> u16) -> String {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| from([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }

    if let Some(body) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        utf16(body, u16::from_le_bytes)
    } else if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        utf16(body, u16::from_be_bytes)
    } else if let Some(body) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(body).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn parse_number(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

impl ThemePackage {
    /// Parse package text. Lines outside any section and `;` comments are ignored.
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                sections.push(Section {
                    name: line[1..line.len() - 1].trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }
            let (Some(section), Some((key, value))) = (sections.last_mut(), line.split_once('='))
            else {
                continue;
            };
            section
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        }

        Self {
            path: None,
            sections,
        }
    }

    /// Read and parse a package from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| ThemeError::io(format!("Reading theme file {}", path.display()), e))?;
        let mut package = Self::parse(&decode_text(&bytes));
        package.path = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            sections = package.sections.len(),
            "Theme package loaded"
        );
        Ok(package)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(section))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .filter(|s| s.name.eq_ignore_ascii_case(section))
            .flat_map(|s| s.entries.iter())
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// `[Theme] DisplayName`, else the file stem
    pub fn display_name(&self) -> Option<String> {
        self.get(THEME_SECTION, "DisplayName")
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.path
                    .as_deref()
                    .and_then(Path::file_stem)
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
    }

    pub fn visual_style_path(&self) -> Option<&str> {
        self.get(VISUAL_STYLES_SECTION, "Path")
    }

    /// Raw wallpaper reference, unexpanded. Empty values count as absent.
    pub fn wallpaper_reference(&self) -> Option<&str> {
        self.get(DESKTOP_SECTION, "Wallpaper")
            .filter(|w| !w.is_empty())
    }

    pub fn taskbar_overrides(&self) -> TaskbarOverrides {
        TaskbarOverrides {
            color: self
                .get(MANAGER_SECTION, "TaskbarColor")
                .and_then(parse_number)
                .map(|c| c & 0x00FF_FFFF),
            alpha: self
                .get(MANAGER_SECTION, "TaskbarAlpha")
                .and_then(|a| a.trim().parse::<i64>().ok())
                .map(|a| a.clamp(0, 255) as u32),
        }
    }

    /// Why this package fails the structural gate, if it does
    fn structural_problem(&self) -> Option<&'static str> {
        if !self.has_section(VISUAL_STYLES_SECTION) {
            return Some("missing [VisualStyles] section");
        }
        if self.visual_style_path().is_none() {
            return Some("missing Path= entry in [VisualStyles]");
        }
        None
    }

    /// Resolve the wallpaper reference to an existing file, see [`resolve_wallpaper`].
    pub fn resolve_wallpaper(&self) -> Option<PathBuf> {
        let raw = self.wallpaper_reference()?;
        let theme_dir = self
            .path
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| Path::new("."));
        resolve_wallpaper(raw, theme_dir, windows_dir().as_deref(), |name| {
            std::env::var(name).ok()
        })
    }
}

/// Load `path` and check it carries `[VisualStyles]` with a `Path=` entry.
///
/// Does not check that the referenced visual style exists.
pub fn check(path: &Path) -> Result<ThemePackage> {
    if !path.is_file() {
        return Err(ThemeError::Validation {
            path: path.to_path_buf(),
            reason: "theme file not found".to_string(),
        });
    }
    let package = ThemePackage::load(path).map_err(|e| ThemeError::Validation {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    match package.structural_problem() {
        Some(reason) => Err(ThemeError::Validation {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }),
        None => Ok(package),
    }
}

/// Cheap structural gate. No side effects.
pub fn validate(path: &Path) -> bool {
    check(path).is_ok()
}

/// Theme files (`*.theme`) directly inside `dir`, sorted by name
pub fn list_themes(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ThemeError::io(format!("Reading themes directory {}", dir.display()), e))?;
    let mut themes: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("theme"))
        })
        .collect();
    themes.sort_by_key(|path| path.file_name().map(|n| n.to_string_lossy().to_lowercase()));
    Ok(themes)
}

/// Expand `%NAME%` references. Unknown variables are left untouched.
pub fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// The OS directory (`%SystemRoot%`)
pub fn windows_dir() -> Option<PathBuf> {
    std::env::var_os("SystemRoot")
        .or_else(|| std::env::var_os("windir"))
        .map(PathBuf::from)
}

/// Resolve a wallpaper reference to a file that exists.
///
/// Environment variables are expanded first. An absolute result is used as is.
/// A relative one is tried against, in order: the theme's directory, the OS
/// wallpaper directory (`<windows>\Web\Wallpaper\<file name>`), and a
/// `Wallpaper` folder next to the theme (`<theme dir>\Wallpaper\<file name>`).
pub fn resolve_wallpaper(
    raw: &str,
    theme_dir: &Path,
    windows_dir: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let expanded = PathBuf::from(expand_env_vars(raw.trim(), lookup));

    if expanded.is_absolute() {
        return expanded.is_file().then_some(expanded);
    }

    let file_name = expanded.file_name()?.to_os_string();
    let mut candidates = vec![theme_dir.join(&expanded)];
    if let Some(windows_dir) = windows_dir {
        candidates.push(windows_dir.join("Web").join("Wallpaper").join(&file_name));
    }
    candidates.push(theme_dir.join("Wallpaper").join(&file_name));

    candidates.into_iter().find(|candidate| candidate.is_file())
}

// ============================================================================
// Custom theme authoring
// ============================================================================

/// A user-authored theme: wallpaper plus taskbar color and transparency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomTheme {
    pub display_name: String,
    pub wallpaper: PathBuf,
    /// Packed `R | G << 8 | B << 16`
    pub taskbar_color: u32,
    pub taskbar_alpha: u8,
}

impl CustomTheme {
    /// Black, fully opaque taskbar
    pub fn new(display_name: impl Into<String>, wallpaper: impl Into<PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            wallpaper: wallpaper.into(),
            taskbar_color: 0,
            taskbar_alpha: 255,
        }
    }

    pub fn render(&self) -> String {
        let lines = [
            format!("[{}]", THEME_SECTION),
            format!("DisplayName={}", self.display_name),
            String::new(),
            format!("[{}]", DESKTOP_SECTION),
            format!("Wallpaper={}", self.wallpaper.display()),
            "WallpaperStyle=10".to_string(),
            String::new(),
            format!("[{}]", MANAGER_SECTION),
            format!("TaskbarColor={}", self.taskbar_color & 0x00FF_FFFF),
            format!("TaskbarAlpha={}", self.taskbar_alpha),
            String::new(),
            format!("[{}]", VISUAL_STYLES_SECTION),
            format!("Path={}", LONGHORN_VISUAL_STYLE),
            "ColorStyle=NormalColor".to_string(),
            "Size=NormalSize".to_string(),
        ];
        let mut text = lines.join("\r\n");
        text.push_str("\r\n");
        text
    }

    /// Write the package to `path`, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.wallpaper.as_os_str().is_empty() {
            return Err(ThemeError::Validation {
                path: path.to_path_buf(),
                reason: "a wallpaper is required before saving the theme".to_string(),
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ThemeError::io(format!("Creating {}", parent.display()), e))?;
        }
        fs::write(path, self.render())
            .map_err(|e| ThemeError::io(format!("Writing theme file {}", path.display()), e))?;
        info!(path = %path.display(), name = %self.display_name, "Custom theme saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const AERO: &str = "[Theme]\r\nDisplayName=Longhorn Aero\r\n\r\n[Control Panel\\Desktop]\r\nWallpaper=aero.jpg\r\nWallpaperStyle=10\r\n\r\n[VisualStyles]\r\nPath=%SystemRoot%\\resources\\themes\\Longhorn\\Longhorn.msstyles\r\nColorStyle=NormalColor\r\nSize=NormalSize\r\n";

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_reads_sections_case_insensitively() {
        let package = ThemePackage::parse(AERO);
        assert_eq!(package.get("visualstyles", "path"), Some(LONGHORN_VISUAL_STYLE));
        assert_eq!(package.wallpaper_reference(), Some("aero.jpg"));
        assert_eq!(package.display_name().as_deref(), Some("Longhorn Aero"));
        assert!(package.has_section(DESKTOP_SECTION));
    }

    #[test]
    fn test_validate_accepts_well_formed_theme() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "LonghornAero.theme", AERO.as_bytes());
        assert!(validate(&path));
    }

    #[test]
    fn test_validate_rejects_missing_section_or_key() {
        let dir = TempDir::new().unwrap();
        let no_section = write(&dir, "a.theme", b"[Theme]\nDisplayName=x\nPath=somewhere\n");
        let no_path = write(&dir, "b.theme", b"[VisualStyles]\nColorStyle=NormalColor\n");
        let path_elsewhere = write(
            &dir,
            "c.theme",
            b"[VisualStyles]\nColorStyle=NormalColor\n[Other]\nPath=x\n",
        );
        assert!(!validate(&no_section));
        assert!(!validate(&no_path));
        assert!(!validate(&path_elsewhere));
        assert!(!validate(&dir.path().join("missing.theme")));
    }

    #[test]
    fn test_check_reports_reason() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.theme", b"[Theme]\n");
        match check(&path) {
            Err(ThemeError::Validation { reason, .. }) => assert!(reason.contains("VisualStyles")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_decodes_utf16_le() {
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![0xFF, 0xFE];
        for unit in AERO.encode_utf16() {
            bytes.extend(unit.to_le_bytes());
        }
        let path = write(&dir, "utf16.theme", &bytes);
        assert!(validate(&path));
        let package = ThemePackage::load(&path).unwrap();
        assert_eq!(package.wallpaper_reference(), Some("aero.jpg"));
    }

    #[test]
    fn test_display_name_falls_back_to_file_stem() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Longhorn Dark.theme", b"[VisualStyles]\nPath=x\n");
        let package = ThemePackage::load(&path).unwrap();
        assert_eq!(package.display_name().as_deref(), Some("Longhorn Dark"));
    }

    #[test]
    fn test_taskbar_overrides_mask_and_clamp() {
        let package = ThemePackage::parse(
            "[LonghornThemeManager]\nTaskbarColor=4469572\nTaskbarAlpha=300\n",
        );
        let overrides = package.taskbar_overrides();
        assert_eq!(overrides.color, Some(0x0044_3344));
        assert_eq!(overrides.alpha, Some(255));

        let high_bits = ThemePackage::parse("[LonghornThemeManager]\nTaskbarColor=0xFF112233\n");
        assert_eq!(high_bits.taskbar_overrides().color, Some(0x0011_2233));

        assert!(ThemePackage::parse(AERO).taskbar_overrides().is_empty());
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown() {
        let lookup = |name: &str| (name == "SystemRoot").then(|| "C:\\Windows".to_string());
        assert_eq!(
            expand_env_vars(r"%SystemRoot%\Web\%Nope%\x.jpg", lookup),
            r"C:\Windows\Web\%Nope%\x.jpg"
        );
    }

    #[test]
    fn test_wallpaper_only_read_from_desktop_section() {
        let elsewhere = ThemePackage::parse(
            "[Theme]\r\nWallpaper=theme.jpg\r\n[LonghornThemeManager]\r\nWallpaper=mgr.jpg\r\n[VisualStyles]\r\nPath=x.msstyles\r\n",
        );
        assert_eq!(elsewhere.wallpaper_reference(), None);

        let desktop = ThemePackage::parse(
            "[Theme]\r\nWallpaper=theme.jpg\r\n[Control Panel\\Desktop]\r\nWallpaper=desk.jpg\r\n",
        );
        assert_eq!(desktop.wallpaper_reference(), Some("desk.jpg"));
    }

    #[test]
    fn test_resolve_wallpaper_order() {
        let themes = TempDir::new().unwrap();
        let windows = TempDir::new().unwrap();
        let no_env = |_: &str| None;

        // Only in the OS wallpaper directory
        let web = windows.path().join("Web").join("Wallpaper");
        fs::create_dir_all(&web).unwrap();
        fs::write(web.join("img.jpg"), b"x").unwrap();
        assert_eq!(
            resolve_wallpaper("img.jpg", themes.path(), Some(windows.path()), no_env),
            Some(web.join("img.jpg"))
        );

        // Theme directory wins over the OS directory
        fs::write(themes.path().join("img.jpg"), b"x").unwrap();
        assert_eq!(
            resolve_wallpaper("img.jpg", themes.path(), Some(windows.path()), no_env),
            Some(themes.path().join("img.jpg"))
        );

        // Wallpaper subfolder is the last resort
        let sub = themes.path().join("Wallpaper");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("other.png"), b"x").unwrap();
        assert_eq!(
            resolve_wallpaper("other.png", themes.path(), Some(windows.path()), no_env),
            Some(sub.join("other.png"))
        );

        assert_eq!(
            resolve_wallpaper("absent.png", themes.path(), Some(windows.path()), no_env),
            None
        );
    }

    #[test]
    fn test_resolve_wallpaper_expands_to_absolute() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("abs.jpg");
        fs::write(&image, b"x").unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let lookup = move |name: &str| (name == "WALLROOT").then(|| root.clone());
        let raw = format!("%WALLROOT%{}abs.jpg", std::path::MAIN_SEPARATOR);
        assert_eq!(
            resolve_wallpaper(&raw, Path::new("unused"), None, lookup),
            Some(image)
        );
    }

    #[test]
    fn test_custom_theme_round_trips_through_parser() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Custom").join("Mine.theme");
        let theme = CustomTheme {
            display_name: "Mine".to_string(),
            wallpaper: PathBuf::from(r"C:\walls\blue.jpg"),
            taskbar_color: 0x0011_2233,
            taskbar_alpha: 128,
        };
        theme.save(&path).unwrap();

        assert!(validate(&path));
        let package = ThemePackage::load(&path).unwrap();
        assert_eq!(package.display_name().as_deref(), Some("Mine"));
        assert_eq!(package.get(DESKTOP_SECTION, "WallpaperStyle"), Some("10"));
        assert_eq!(
            package.taskbar_overrides(),
            TaskbarOverrides {
                color: Some(0x0011_2233),
                alpha: Some(128)
            }
        );
    }

    #[test]
    fn test_list_themes_only_returns_theme_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.theme", AERO.as_bytes());
        write(&dir, "A.THEME", AERO.as_bytes());
        write(&dir, "aero.jpg", b"x");
        fs::create_dir(dir.path().join("Custom.theme")).unwrap();

        let names: Vec<String> = list_themes(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["A.THEME", "b.theme"]);
    }

    #[test]
    fn test_custom_theme_requires_wallpaper() {
        let dir = TempDir::new().unwrap();
        let theme = CustomTheme::new("Empty", "");
        assert!(theme.save(&dir.path().join("x.theme")).is_err());
        assert!(!dir.path().join("x.theme").exists());
    }
}
