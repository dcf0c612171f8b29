//! Longhorn Theme Manager - theme and start-menu skin application for Windows
//!
//! The library holds the whole apply pipeline: theme package parsing and
//! validation, error isolation around the native theming engine, taskbar and
//! start-menu settings, and the controlled desktop shell restart. Every OS
//! interaction goes through the traits in [`platform`], so the pipeline runs
//! unchanged against the recording implementations in tests and `--dry-run`.

pub mod activation;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod isolation;
pub mod logging;
pub mod orchestrator;
pub mod outcome;
pub mod platform;
pub mod shell;
pub mod skin;
pub mod taskbar;
pub mod theme_package;

pub use error::{ThemeError, ResultExt};
pub use orchestrator::{ApplyReport, ApplyState, ThemeApplicationOrchestrator};
pub use outcome::ApplyOutcome;
