//! Command-line front end for the Longhorn Theme Manager.
//!
//! ```bash
//! longhorn-theme apply LonghornAero.theme
//! longhorn-theme skin "Longhorn Hillel" --style win7
//! longhorn-theme --dry-run apply C:\Themes\Mine.theme
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use longhorn_theme::config::{self, Config};
use longhorn_theme::instance::{self, InstanceLock};
use longhorn_theme::platform::{Platform, RecordingPlatform};
use longhorn_theme::skin::{self, MenuStyle};
use longhorn_theme::theme_package::{self, CustomTheme};
use longhorn_theme::{logging, ApplyOutcome, ApplyReport, ThemeApplicationOrchestrator, ThemeError};

#[derive(Parser, Debug)]
#[command(name = "longhorn-theme")]
#[command(about = "Applies Longhorn themes and start-menu skins", version)]
struct Cli {
    /// Configuration file (default: <config dir>/LonghornThemeManager/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against an in-memory desktop; nothing on the system is changed
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a theme file (a path, or a name in the themes directory)
    Apply { theme: String },

    /// Select a start-menu skin and restart Explorer
    Skin {
        name: String,
        #[arg(long, default_value = "win7")]
        style: MenuStyle,
    },

    /// Write a custom theme file
    SaveTheme {
        /// Output file; a bare name is saved to the custom themes directory
        out: PathBuf,
        #[arg(long)]
        wallpaper: PathBuf,
        /// Taskbar color packed as R | G << 8 | B << 16
        #[arg(long, default_value_t = 0)]
        color: u32,
        #[arg(long, default_value_t = 255)]
        alpha: u8,
        /// Display name (default: the file stem)
        #[arg(long)]
        name: Option<String>,
    },

    /// Restart Explorer without applying anything
    RestartShell,

    /// Show the recorded theme and start-menu skin
    Status,

    /// List installed themes and skins
    List {
        #[arg(long, default_value = "win7")]
        style: MenuStyle,
    },
}

/// A bare name is looked up in the themes directory, with or without `.theme`
fn locate_theme(config: &Config, theme: &str) -> PathBuf {
    let direct = PathBuf::from(theme);
    if direct.exists() || direct.is_absolute() {
        return direct;
    }
    let themes_dir = config.get_themes_dir();
    let named = themes_dir.join(theme);
    if named.exists() || direct.extension().is_some() {
        return named;
    }
    themes_dir.join(format!("{}.theme", theme))
}

fn custom_theme_path(config: &Config, out: &Path) -> PathBuf {
    let with_extension = if out.extension().is_some() {
        out.to_path_buf()
    } else {
        out.with_extension("theme")
    };
    if with_extension.components().count() > 1 || with_extension.is_absolute() {
        with_extension
    } else {
        config.get_custom_themes_dir().join(with_extension)
    }
}

fn platform_for(cli: &Cli, config: &Config) -> Result<Platform> {
    if cli.dry_run {
        info!("Dry run: using the recording platform");
        return Ok(RecordingPlatform::dry_run().platform());
    }
    Platform::system(config).context("Native theming is not available")
}

fn report(outcome: &ApplyOutcome, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("{}", outcome);
    }
    Ok(ExitCode::from(outcome.exit_code() as u8))
}

/// Print the result, then wait for deferred restorations so they are not cut
/// short by process exit.
fn finish_run(run: ApplyReport, json: bool) -> Result<ExitCode> {
    if let Some(path) = &run.diagnostic {
        eprintln!("Detailed error log created at: {}", path.display());
    }
    let code = report(&run.outcome, json)?;
    for handle in run.pending {
        if handle.join().is_err() {
            warn!("A deferred restoration thread panicked");
        }
    }
    Ok(code)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = config::load_config(cli.config.as_deref());
    if cli.dry_run {
        config = config.for_dry_run();
    }
    let orchestrator = || -> Result<ThemeApplicationOrchestrator> {
        Ok(ThemeApplicationOrchestrator::new(platform_for(&cli, &config)?, &config))
    };

    match &cli.command {
        Command::Apply { theme } => {
            let path = locate_theme(&config, theme);
            finish_run(orchestrator()?.apply_theme_traced(&path), cli.json)
        }
        Command::Skin { name, style } => {
            finish_run(orchestrator()?.apply_skin_traced(*style, name), cli.json)
        }
        Command::RestartShell => report(&orchestrator()?.restart_shell(), cli.json),
        Command::Status => {
            let status = orchestrator()?.status()?;
            println!(
                "Current theme: {}",
                status.theme_file.as_deref().unwrap_or("Unknown")
            );
            println!("Menu style: {}", status.skin.style);
            println!("Skin: {}", status.skin.skin.as_deref().unwrap_or("(none)"));
            Ok(ExitCode::SUCCESS)
        }
        Command::SaveTheme {
            out,
            wallpaper,
            color,
            alpha,
            name,
        } => {
            let path = custom_theme_path(&config, out);
            let display_name = name.clone().unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Custom".to_string())
            });
            let theme = CustomTheme {
                display_name,
                wallpaper: wallpaper.clone(),
                taskbar_color: *color & 0x00FF_FFFF,
                taskbar_alpha: *alpha,
            };
            theme.save(&path)?;
            println!("Theme saved: {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::List { style } => {
            for dir in [config.get_themes_dir(), config.get_custom_themes_dir()] {
                println!("Themes in {}:", dir.display());
                match theme_package::list_themes(&dir) {
                    Ok(themes) => themes
                        .iter()
                        .filter_map(|t| t.file_name())
                        .for_each(|t| println!("  {}", t.to_string_lossy())),
                    Err(e) => println!("  ({})", e),
                }
            }
            let skins_dir = config.get_skins_dir();
            println!("{} skins in {}:", style, skins_dir.display());
            match skin::list_skins(&skins_dir, *style) {
                Ok(skins) => skins.iter().for_each(|s| println!("  {}", s)),
                Err(e) => println!("  ({})", e),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logging = logging::init();

    // One apply at a time across processes
    let _lock = match InstanceLock::acquire(&instance::default_lock_path()) {
        Ok(lock) => Some(lock),
        Err(e @ ThemeError::InstanceLocked { .. }) => {
            eprintln!("{}", e.user_message());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            warn!(error = %e, "Could not take the instance lock, continuing");
            None
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
