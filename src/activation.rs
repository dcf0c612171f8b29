//! Native activation bridge
//!
//! Drives the native theming engine for one theme file:
//! stage a disposable copy, signature fix, init, set active, broadcast the
//! change, then set the wallpaper referenced by the original file.
//!
//! The native sequence runs on a worker thread so the caller can bound how long
//! it waits. The worker owns the staged copy and always deletes it before it
//! reports back, even when the caller already gave up waiting.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, ResultExt, ThemeError};
use crate::isolation::ErrorIsolationGuard;
use crate::outcome::ApplyOutcome;
use crate::platform::{Broadcast, NativeStatus, ThemeEngine};
use crate::theme_package::ThemePackage;

pub const STEP_SIGNATURE_FIX: &str = "Signature fix";
pub const STEP_INIT: &str = "Theme engine initialization";
pub const STEP_SET_ACTIVE: &str = "Theme activation";

/// Tunables for one bridge, normally taken from [`Config`]
#[derive(Debug, Clone)]
pub struct ActivationSettings {
    pub staging_dir: PathBuf,
    pub benign_code: NativeStatus,
    pub broadcast_timeout: Duration,
    /// `None` waits for the native call indefinitely
    pub activation_timeout: Option<Duration>,
    /// How long fault dialogs stay suppressed after the native sequence
    pub restore_delay: Duration,
}

impl ActivationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_dir: config.get_staging_dir(),
            benign_code: config.native.benign_activation_code,
            broadcast_timeout: config.timing.broadcast_timeout(),
            activation_timeout: config.timing.activation_timeout(),
            restore_delay: config.timing.activation_restore(),
        }
    }
}

/// What a successful activation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub staged_path: PathBuf,
    /// Set when `set_active` returned the benign code
    pub benign_status: Option<NativeStatus>,
    pub wallpaper: Option<PathBuf>,
}

/// A disposable copy of the theme file. Deleted on drop.
#[derive(Debug)]
struct StagedTheme {
    path: PathBuf,
}

fn clear_readonly(path: &Path) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

impl StagedTheme {
    fn create(source: &Path, staging_dir: &Path) -> Result<Self> {
        let path = staging_dir.join(format!("lh_{}.theme", Uuid::new_v4().simple()));

        if path.exists() {
            clear_readonly(&path).warn_on_err();
            fs::remove_file(&path)
                .map_err(|e| ThemeError::io(format!("Removing stale {}", path.display()), e))?;
        }
        fs::create_dir_all(staging_dir)
            .map_err(|e| ThemeError::io(format!("Creating {}", staging_dir.display()), e))?;
        fs::copy(source, &path).map_err(|e| {
            ThemeError::io(
                format!("Copying {} to {}", source.display(), path.display()),
                e,
            )
        })?;

        // Own the guard before anything else can fail
        let staged = Self { path };
        clear_readonly(&staged.path)
            .map_err(|e| ThemeError::io(format!("Clearing read-only on {}", staged.path.display()), e))?;
        debug!(path = %staged.path.display(), "Theme staged");
        Ok(staged)
    }
}

impl Drop for StagedTheme {
    fn drop(&mut self) {
        clear_readonly(&self.path).warn_on_err();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Staged theme removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove staged theme"),
        }
    }
}

fn check_status(step: &'static str, code: NativeStatus) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(ThemeError::NativeActivation { step, code })
    }
}

/// Runs the native activation sequence for theme files
#[derive(Clone)]
pub struct NativeActivationBridge {
    engine: Arc<dyn ThemeEngine>,
    isolation: ErrorIsolationGuard,
    settings: ActivationSettings,
}

impl NativeActivationBridge {
    pub fn new(
        engine: Arc<dyn ThemeEngine>,
        isolation: ErrorIsolationGuard,
        settings: ActivationSettings,
    ) -> Self {
        Self {
            engine,
            isolation,
            settings,
        }
    }

    /// Activate `theme` and report the result as an outcome.
    pub fn activate(&self, theme: &Path) -> ApplyOutcome {
        match self.run(theme) {
            Ok(report) => ApplyOutcome::succeeded(match report.wallpaper {
                Some(wallpaper) => format!("Theme activated, wallpaper {}", wallpaper.display()),
                None => "Theme activated".to_string(),
            }),
            Err(e) => ApplyOutcome::activation_failed(&e),
        }
    }

    /// Activate `theme`, bounded by the activation timeout.
    pub fn run(&self, theme: &Path) -> Result<ActivationReport> {
        self.run_tracked(theme).0
    }

    /// [`run`](Self::run), also returning the deferred error-mode restoration
    /// so the caller can wait for it. No handle comes back after a timeout:
    /// the worker still owns it.
    #[instrument(skip(self, theme), fields(theme = %theme.display()))]
    pub fn run_tracked(&self, theme: &Path) -> (Result<ActivationReport>, Option<JoinHandle<()>>) {
        let token = self.isolation.enter();
        let (tx, rx) = mpsc::channel();
        let engine = self.engine.clone();
        let settings = self.settings.clone();
        let source = theme.to_path_buf();
        let started = Instant::now();

        let spawned = std::thread::Builder::new()
            .name("theme-activation".to_string())
            .spawn(move || {
                let result = activate_staged(engine.as_ref(), &settings, &source);
                // Cleanup is finished before the caller hears back
                let restore = token.release_after(settings.restore_delay);
                let _ = tx.send((result, restore));
            });
        if let Err(e) = spawned {
            return (Err(ThemeError::io("Starting theme activation worker", e)), None);
        }

        let received = match self.settings.activation_timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => ThemeError::Timeout {
                    operation: "Native theme activation".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                },
                mpsc::RecvTimeoutError::Disconnected => {
                    ThemeError::Worker("theme activation worker exited without a result".into())
                }
            }),
            None => rx.recv().map_err(|_| {
                ThemeError::Worker("theme activation worker exited without a result".into())
            }),
        };

        let (result, restore) = match received {
            Ok((result, restore)) => (result, restore),
            Err(e) => (Err(e), None),
        };
        match &result {
            Ok(report) => info!(
                event_type = "activation",
                elapsed_ms = started.elapsed().as_millis() as u64,
                staged = %report.staged_path.display(),
                benign = report.benign_status.is_some(),
                "Native activation finished"
            ),
            Err(e) => warn!(
                event_type = "activation",
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "Native activation failed"
            ),
        }
        (result, restore)
    }
}

/// Steps 2-8, on the worker thread
fn activate_staged(
    engine: &dyn ThemeEngine,
    settings: &ActivationSettings,
    source: &Path,
) -> Result<ActivationReport> {
    let staged = StagedTheme::create(source, &settings.staging_dir)?;

    check_status(STEP_SIGNATURE_FIX, engine.signature_fix(&staged.path))?;
    check_status(STEP_INIT, engine.init())?;

    let status = engine.set_active(&staged.path);
    let benign_status = if status != 0 && status == settings.benign_code {
        info!(code = format_args!("0x{:08X}", status), "Activation returned benign status");
        Some(status)
    } else {
        check_status(STEP_SET_ACTIVE, status)?;
        None
    };

    for notification in [Broadcast::PolicySettingChange, Broadcast::ThemeChanged] {
        engine
            .broadcast(notification, settings.broadcast_timeout)
            .warn_on_err();
    }

    let wallpaper = apply_wallpaper(engine, source);

    Ok(ActivationReport {
        staged_path: staged.path.clone(),
        benign_status,
        wallpaper,
    })
}

/// Re-read the original file and set its wallpaper if it resolves to a file
fn apply_wallpaper(engine: &dyn ThemeEngine, source: &Path) -> Option<PathBuf> {
    let package = ThemePackage::load(source).warn_on_err()?;
    let Some(raw) = package.wallpaper_reference() else {
        debug!("Theme has no wallpaper");
        return None;
    };
    let Some(image) = package.resolve_wallpaper() else {
        warn!(wallpaper = raw, "Wallpaper not found, leaving current wallpaper");
        return None;
    };
    engine.set_wallpaper(&image).warn_on_err()?;
    info!(wallpaper = %image.display(), "Wallpaper applied");
    Some(image)
}
