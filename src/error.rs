use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, warn};

/// Error severity for caller display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // informational
    Warning,  // recoverable, nothing was changed or the theme still applied
    Error,    // operation failed
    Critical, // requires user action before retrying
}

/// Domain-specific errors for theme application
#[derive(Error, Debug)]
pub enum ThemeError {
    /// The theme file is missing or lacks the mandatory structure. Nothing was mutated.
    #[error("Theme validation failed for '{}': {reason}", path.display())]
    Validation { path: PathBuf, reason: String },

    /// A native theming call returned a non-benign status code.
    #[error("{step} failed with error: 0x{code:08X}")]
    NativeActivation { step: &'static str, code: u32 },

    /// A background worker stopped without reporting a result.
    #[error("Background task failed: {0}")]
    Worker(String),

    #[error("Failed to write setting '{value}' under '{key}': {message}")]
    ConfigWrite {
        key: String,
        value: String,
        message: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} did not finish within {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("Another instance is already running (pid {pid})")]
    InstanceLocked { pid: u32 },
}

impl ThemeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation { .. } => ErrorSeverity::Warning,
            Self::NativeActivation { .. } => ErrorSeverity::Error,
            Self::Worker(_) => ErrorSeverity::Error,
            Self::ConfigWrite { .. } => ErrorSeverity::Error,
            Self::Io { .. } => ErrorSeverity::Error,
            Self::Timeout { .. } => ErrorSeverity::Error,
            Self::Unsupported(_) => ErrorSeverity::Critical,
            Self::InstanceLocked { .. } => ErrorSeverity::Info,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { .. } => {
                "Invalid theme file structure. Missing required sections.".to_string()
            }
            Self::NativeActivation { step, code } => {
                format!("{} failed (0x{:08X})", step, code)
            }
            Self::Worker(_) => "Theme activation stopped unexpectedly".to_string(),
            Self::ConfigWrite { key, .. } => format!("Could not update settings under {}", key),
            Self::Io { context, .. } => context.clone(),
            Self::Timeout { operation, .. } => format!("{} is not responding", operation),
            Self::Unsupported(what) => format!("{} requires Windows", what),
            Self::InstanceLocked { .. } => {
                "A window of the theme manager is already open.".to_string()
            }
        }
    }

    /// Native status code carried by this error, if any.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::NativeActivation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ThemeError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the flow must keep going.
///
/// # Examples
///
/// ```ignore
/// use longhorn_theme::error::ResultExt;
///
/// // Broadcasts are advisory: log and continue
/// engine.broadcast(notification, timeout).warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

/// Panic in debug mode, log error in release mode.
///
/// Use for "impossible" states that should crash during development
/// but gracefully degrade in production.
#[macro_export]
macro_rules! debug_panic {
    ( $($fmt_arg:tt)* ) => {
        if cfg!(debug_assertions) {
            panic!( $($fmt_arg)* );
        } else {
            tracing::error!("IMPOSSIBLE STATE: {}", format_args!($($fmt_arg)*));
        }
    };
}
